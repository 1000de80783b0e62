//! `VK_EXT_tooling_info`: report this layer as an active tool.

use std::ffi::CStr;

use ash::vk;
use vkshim_core::cstr::write_fixed;

use super::{Call, CallContext, DeviceCapabilities, EmulationModule, ModuleScope};
use crate::entry_points::EntryPoint;
use crate::records::PhysicalDeviceRecord;

pub const NAME: &str = "tooling_info";
pub const EXTENSION: &CStr = c"VK_EXT_tooling_info";
pub const SPEC_VERSION: u32 = 1;

pub const TOOL_NAME: &str = "vkshim";
pub const TOOL_DESCRIPTION: &str = "Emulates Vulkan extensions missing from the driver";

pub struct ToolingInfo;

impl EmulationModule for ToolingInfo {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extension(&self) -> &'static CStr {
        EXTENSION
    }

    fn spec_version(&self) -> u32 {
        SPEC_VERSION
    }

    fn scope(&self) -> ModuleScope {
        ModuleScope::PhysicalDevice
    }

    fn entry_points(&self) -> &'static [EntryPoint] {
        &[EntryPoint::GetPhysicalDeviceToolProperties]
    }

    fn supports(&self, _caps: &DeviceCapabilities) -> bool {
        true
    }

    unsafe fn on_intercepted_call(&self, ctx: &mut CallContext<'_>) -> vk::Result {
        match &ctx.call {
            Call::GetPhysicalDeviceToolProperties {
                physical_device,
                count,
                properties,
            } => unsafe { tool_properties(physical_device, *count, *properties) },
            _ => vk::Result::ERROR_UNKNOWN,
        }
    }
}

/// Fill `properties` in place, keeping the application's `sType`/`pNext`.
pub fn describe_layer(properties: &mut vk::PhysicalDeviceToolProperties<'_>) {
    write_fixed(TOOL_NAME, &mut properties.name);
    write_fixed(env!("CARGO_PKG_VERSION"), &mut properties.version);
    properties.purposes = vk::ToolPurposeFlags::ADDITIONAL_FEATURES | vk::ToolPurposeFlags::MODIFYING_FEATURES;
    write_fixed(TOOL_DESCRIPTION, &mut properties.description);
    write_fixed(crate::LAYER_NAME.to_bytes(), &mut properties.layer);
}

/// Two-call enumeration of the next link's tools followed by this layer.
///
/// # Safety
/// `count` must be valid; `properties` null or valid for `*count` elements.
unsafe fn tool_properties(
    physical_device: &PhysicalDeviceRecord,
    count: *mut u32,
    properties: *mut vk::PhysicalDeviceToolProperties<'_>,
) -> vk::Result {
    if count.is_null() {
        return vk::Result::ERROR_UNKNOWN;
    }
    let dispatch = &physical_device.instance.dispatch;
    let driver = physical_device.driver();
    let native = dispatch
        .get_physical_device_tool_properties
        .filter(|_| physical_device.capabilities.supports_extension(EXTENSION));

    let mut driver_count = 0u32;
    if let Some(next) = native {
        let result = unsafe { next(driver, &mut driver_count, std::ptr::null_mut()) };
        if result != vk::Result::SUCCESS {
            return result;
        }
    }
    let total = driver_count + 1;

    if properties.is_null() {
        unsafe { *count = total };
        return vk::Result::SUCCESS;
    }

    let capacity = unsafe { *count };
    let mut written = 0u32;
    if let Some(next) = native.filter(|_| driver_count > 0) {
        written = capacity.min(driver_count);
        let result = unsafe { next(driver, &mut written, properties) };
        if result.as_raw() < 0 {
            return result;
        }
    }
    if written < capacity {
        unsafe { describe_layer(&mut *properties.add(written as usize)) };
        written += 1;
    }
    unsafe { *count = written };

    if written < total {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}
