//! Instance and physical-device entry points.

use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, info, warn};
use vkshim_core::cstr::{fixed_to_cstr, read_cstr_array};
use vkshim_core::{ApiVersion, ExtensionSet};

use crate::dispatch::{cast_pfn, InstanceDispatch};
use crate::emulation::{Call, CallContext, DeviceCapabilities, ModuleScope};
use crate::entry_points::EntryPoint;
use crate::error::{check, LayerError};
use crate::properties::{self, fill_array, is_this_layer};
use crate::records::{InstanceRecord, InstanceState, PhysicalDeviceRecord, PhysicalDeviceState};
use crate::{layer, loader, Layer};

pub unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    match unsafe { create_instance_inner(p_create_info, p_allocator, p_instance) } {
        Ok(()) => vk::Result::SUCCESS,
        Err(e) => {
            warn!("vkCreateInstance failed: {}", e);
            e.to_vk_result()
        }
    }
}

unsafe fn create_instance_inner(
    p_create_info: *const vk::InstanceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> Result<(), LayerError> {
    let layer = layer();
    layer.negotiator().require_negotiated()?;
    if p_create_info.is_null() || p_instance.is_null() {
        return Err(LayerError::MissingLinkInfo("instance"));
    }
    let create_info = unsafe { &*p_create_info };

    let chain_info = unsafe { loader::instance_link_info(create_info) };
    if chain_info.is_null() {
        return Err(LayerError::MissingLinkInfo("instance"));
    }
    let link = unsafe { (*chain_info).u.p_layer_info };
    if link.is_null() {
        return Err(LayerError::MissingLinkInfo("instance"));
    }
    let next_gipa = unsafe { (*link).pfn_next_get_instance_proc_addr }
        .ok_or(LayerError::MissingLinkInfo("instance"))?;
    let next_gpdpa = unsafe { (*link).pfn_next_get_physical_device_proc_addr };

    // Advance the chain so the next layer finds its own link.
    unsafe { (*chain_info).u.p_layer_info = (*link).p_next };

    let next_create: vk::PFN_vkCreateInstance = unsafe {
        cast_pfn(
            next_gipa(vk::Instance::null(), EntryPoint::CreateInstance.name().as_ptr())
                .ok_or(LayerError::MissingEntryPoint(EntryPoint::CreateInstance.name()))?,
        )
    };
    check(unsafe { next_create(p_create_info, p_allocator, p_instance) })?;
    let instance = unsafe { *p_instance };

    let dispatch = match unsafe { InstanceDispatch::load(instance, next_gipa, next_gpdpa) } {
        Ok(dispatch) => dispatch,
        Err(e) => {
            unsafe { destroy_unusable_instance(next_gipa, instance, p_allocator) };
            return Err(e);
        }
    };

    let api_version = if create_info.p_application_info.is_null() {
        ApiVersion::V1_0
    } else {
        ApiVersion::from_application(unsafe { (*create_info.p_application_info).api_version })
    };
    let enabled_extensions: ExtensionSet = unsafe {
        read_cstr_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count)
    }
    .into_iter()
    .collect();

    let destroy = dispatch.destroy_instance;
    if let Err(e) = layer
        .instances
        .register(instance, InstanceState::new(dispatch, api_version, enabled_extensions))
    {
        unsafe { destroy(instance, p_allocator) };
        return Err(e.into());
    }

    info!(
        instance = format_args!("{:#x}", instance.as_raw()),
        api_version = %api_version,
        "instance created"
    );
    Ok(())
}

/// Tear down an instance the next link created but the layer cannot use.
unsafe fn destroy_unusable_instance(
    next_gipa: vk::PFN_vkGetInstanceProcAddr,
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    if let Some(pfn) = unsafe { next_gipa(instance, EntryPoint::DestroyInstance.name().as_ptr()) } {
        let destroy: vk::PFN_vkDestroyInstance = unsafe { cast_pfn(pfn) };
        unsafe { destroy(instance, p_allocator) };
    }
}

pub unsafe extern "system" fn destroy_instance(
    instance: vk::Instance,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    if instance == vk::Instance::null() {
        return;
    }
    let layer = layer();
    let record = lookup_or!(layer.instances.destroy(instance), "vkDestroyInstance", ());
    for physical_device in record.take_physical_devices() {
        let _ = layer.physical_devices.destroy(physical_device);
    }
    unsafe { (record.dispatch.destroy_instance)(record.driver(), p_allocator) };
    info!(instance = format_args!("{:#x}", instance.as_raw()), "instance destroyed");
}

pub unsafe extern "system" fn enumerate_physical_devices(
    instance: vk::Instance,
    p_physical_device_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(
        layer.instances.get(instance),
        "vkEnumeratePhysicalDevices",
        vk::Result::ERROR_UNKNOWN
    );
    let result = unsafe {
        (record.dispatch.enumerate_physical_devices)(record.driver(), p_physical_device_count, p_physical_devices)
    };
    if result.as_raw() < 0 || p_physical_devices.is_null() {
        return result;
    }
    let count = unsafe { *p_physical_device_count } as usize;
    for i in 0..count {
        let physical_device = unsafe { *p_physical_devices.add(i) };
        if let Err(e) = unsafe { layer.track_physical_device(&record, physical_device) } {
            warn!("vkEnumeratePhysicalDevices: {}", e);
            return e.to_vk_result();
        }
    }
    result
}

pub unsafe extern "system" fn enumerate_physical_device_groups(
    instance: vk::Instance,
    p_group_count: *mut u32,
    p_groups: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(
        layer.instances.get(instance),
        "vkEnumeratePhysicalDeviceGroups",
        vk::Result::ERROR_UNKNOWN
    );
    let Some(next) = record.dispatch.enumerate_physical_device_groups else {
        warn!("vkEnumeratePhysicalDeviceGroups: not provided by the next link");
        return vk::Result::ERROR_UNKNOWN;
    };
    let result = unsafe { next(record.driver(), p_group_count, p_groups) };
    if result.as_raw() < 0 || p_groups.is_null() {
        return result;
    }
    let count = unsafe { *p_group_count } as usize;
    for i in 0..count {
        let group = unsafe { &*p_groups.add(i) };
        let members = (group.physical_device_count as usize).min(group.physical_devices.len());
        for &physical_device in &group.physical_devices[..members] {
            if let Err(e) = unsafe { layer.track_physical_device(&record, physical_device) } {
                warn!("vkEnumeratePhysicalDeviceGroups: {}", e);
                return e.to_vk_result();
            }
        }
    }
    result
}

impl Layer {
    /// Record a physical device the first time it is enumerated. Its
    /// capabilities are queried and the emulation modules probed here, once,
    /// under the map entry, so concurrent enumerations cannot probe twice.
    pub(crate) unsafe fn track_physical_device(
        &self,
        instance: &Arc<InstanceRecord>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Arc<PhysicalDeviceRecord>, LayerError> {
        let record = self.physical_devices.get_or_try_register(physical_device, || {
            let capabilities = unsafe { query_capabilities(instance, physical_device) }?;
            let offered = self.modules().applicable(&capabilities, &self.config().modules);
            let physical_device_scope: Vec<_> = offered
                .iter()
                .filter(|m| m.scope() == ModuleScope::PhysicalDevice)
                .cloned()
                .collect();
            let modules = self.modules().resolve(&physical_device_scope);
            debug!(
                physical_device = format_args!("{:#x}", physical_device.as_raw()),
                device = %capabilities.device_name,
                api_version = %capabilities.api_version,
                offered = ?offered.iter().map(|m| m.name()).collect::<Vec<_>>(),
                "physical device tracked"
            );
            Ok::<_, LayerError>(PhysicalDeviceState {
                instance: Arc::clone(instance),
                capabilities,
                offered,
                modules,
            })
        })?;
        instance.add_physical_device(physical_device);
        Ok(record)
    }
}

/// Ask the next link what `physical_device` supports.
unsafe fn query_capabilities(
    instance: &InstanceRecord,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCapabilities, LayerError> {
    let dispatch = &instance.dispatch;
    let mut props = vk::PhysicalDeviceProperties::default();
    unsafe { (dispatch.get_physical_device_properties)(physical_device, &mut props) };

    let extensions = unsafe {
        properties::enumerate(|count, out| {
            (dispatch.enumerate_device_extension_properties)(physical_device, std::ptr::null(), count, out)
        })
    }
    .map_err(LayerError::Downstream)?;

    Ok(DeviceCapabilities {
        api_version: ApiVersion::from_raw(props.api_version),
        driver_version: props.driver_version,
        device_name: fixed_to_cstr(&props.device_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        extensions: ExtensionSet::from_properties(&extensions),
    })
}

pub unsafe extern "system" fn enumerate_instance_layer_properties(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    unsafe { fill_array(&[properties::layer_properties()], p_property_count, p_properties) }
}

pub unsafe extern "system" fn enumerate_instance_extension_properties(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if unsafe { is_this_layer(p_layer_name) } {
        return unsafe { fill_array(&[], p_property_count, p_properties) };
    }
    vk::Result::ERROR_LAYER_NOT_PRESENT
}

pub unsafe extern "system" fn enumerate_device_layer_properties(
    _physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    unsafe { fill_array(&[properties::layer_properties()], p_property_count, p_properties) }
}

pub unsafe extern "system" fn enumerate_device_extension_properties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(
        layer.physical_devices.get(physical_device),
        "vkEnumerateDeviceExtensionProperties",
        vk::Result::ERROR_UNKNOWN
    );

    if unsafe { is_this_layer(p_layer_name) } {
        let emulated = properties::emulated_extensions(&record);
        return unsafe { fill_array(&emulated, p_property_count, p_properties) };
    }
    if !p_layer_name.is_null() {
        let name = unsafe { CStr::from_ptr(p_layer_name) };
        debug!(layer = ?name, "forwarding extension query for another layer");
        return unsafe {
            (record.instance.dispatch.enumerate_device_extension_properties)(
                record.driver(),
                p_layer_name,
                p_property_count,
                p_properties,
            )
        };
    }

    match unsafe { properties::composed_device_extensions(&record) } {
        Ok(extensions) => unsafe { fill_array(&extensions, p_property_count, p_properties) },
        Err(result) => result,
    }
}

pub unsafe extern "system" fn get_physical_device_features2(
    physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures2<'_>,
) {
    if p_features.is_null() {
        return;
    }
    let layer = layer();
    let record = lookup_or!(
        layer.physical_devices.get(physical_device),
        "vkGetPhysicalDeviceFeatures2",
        ()
    );
    let dispatch = &record.instance.dispatch;
    match dispatch.get_physical_device_features2 {
        Some(next) => unsafe { next(record.driver(), p_features) },
        None => unsafe { (dispatch.get_physical_device_features)(record.driver(), &mut (*p_features).features) },
    }
    for module in &record.offered {
        unsafe { module.patch_features(p_features) };
    }
}

pub unsafe extern "system" fn get_physical_device_tool_properties(
    physical_device: vk::PhysicalDevice,
    p_tool_count: *mut u32,
    p_tool_properties: *mut vk::PhysicalDeviceToolProperties<'_>,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(
        layer.physical_devices.get(physical_device),
        "vkGetPhysicalDeviceToolProperties",
        vk::Result::ERROR_UNKNOWN
    );

    if let Some(module) = record.modules.handler(EntryPoint::GetPhysicalDeviceToolProperties) {
        let mut ctx = CallContext::new(Call::GetPhysicalDeviceToolProperties {
            physical_device: &record,
            count: p_tool_count,
            properties: p_tool_properties.cast(),
        });
        return unsafe { module.on_intercepted_call(&mut ctx) };
    }
    if let Some(next) = record.instance.dispatch.get_physical_device_tool_properties {
        return unsafe { next(record.driver(), p_tool_count, p_tool_properties) };
    }
    unsafe { fill_array(&[], p_tool_count, p_tool_properties) }
}
