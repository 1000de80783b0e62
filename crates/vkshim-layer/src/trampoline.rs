//! Proc-address resolution: the outward-facing routing of the layer.
//!
//! Every known entry point maps to an `Intercept` in a table indexed by
//! `EntryPoint`, built once. A query either hands out the layer's function
//! or the next link's own pointer, so calls the layer does not alter never
//! pass through it at all.

use std::ffi::{c_char, CStr};

use ash::vk;
use tracing::{trace, warn};

use crate::entry_points::{EntryPoint, Level};
use crate::{command, device, instance, layer, Layer};

/// When the layer's own function is handed out for an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// The layer always intercepts.
    Always,
    /// Intercepted only if the next link implements the function.
    WhenNextHas,
    /// Intercepted only where an emulation module handles the function.
    Emulated,
}

#[derive(Clone, Copy)]
pub struct Intercept {
    pub entry_point: EntryPoint,
    pub pfn: unsafe extern "system" fn(),
    pub routing: Routing,
}

/// Layer functions indexed by `EntryPoint`.
pub struct InterceptTable {
    entries: Vec<Option<Intercept>>,
}

macro_rules! intercepts {
    ($table:ident; $($ep:ident => $routing:ident, $func:path as $pfn:ty;)*) => {
        $(
            $table.insert(
                EntryPoint::$ep,
                Routing::$routing,
                // SAFETY: only reinterpreted back to `$pfn` by the caller of
                // the proc-address query.
                unsafe { std::mem::transmute::<$pfn, unsafe extern "system" fn()>($func as $pfn) },
            );
        )*
    };
}

impl InterceptTable {
    pub fn new() -> Self {
        let mut table = Self {
            entries: vec![None; EntryPoint::COUNT],
        };
        intercepts! { table;
            CreateInstance => Always, instance::create_instance as vk::PFN_vkCreateInstance;
            EnumerateInstanceLayerProperties => Always,
                instance::enumerate_instance_layer_properties as vk::PFN_vkEnumerateInstanceLayerProperties;
            EnumerateInstanceExtensionProperties => Always,
                instance::enumerate_instance_extension_properties as vk::PFN_vkEnumerateInstanceExtensionProperties;

            GetInstanceProcAddr => Always, crate::vkGetInstanceProcAddr as vk::PFN_vkGetInstanceProcAddr;
            DestroyInstance => Always, instance::destroy_instance as vk::PFN_vkDestroyInstance;
            EnumeratePhysicalDevices => Always,
                instance::enumerate_physical_devices as vk::PFN_vkEnumeratePhysicalDevices;
            EnumeratePhysicalDeviceGroups => WhenNextHas,
                instance::enumerate_physical_device_groups as vk::PFN_vkEnumeratePhysicalDeviceGroups;
            EnumerateDeviceLayerProperties => Always,
                instance::enumerate_device_layer_properties as vk::PFN_vkEnumerateDeviceLayerProperties;
            EnumerateDeviceExtensionProperties => Always,
                instance::enumerate_device_extension_properties as vk::PFN_vkEnumerateDeviceExtensionProperties;
            GetPhysicalDeviceFeatures2 => Always,
                instance::get_physical_device_features2 as vk::PFN_vkGetPhysicalDeviceFeatures2;
            GetPhysicalDeviceToolProperties => Emulated,
                instance::get_physical_device_tool_properties as vk::PFN_vkGetPhysicalDeviceToolProperties;
            CreateDevice => Always, device::create_device as vk::PFN_vkCreateDevice;

            GetDeviceProcAddr => Always, crate::vkGetDeviceProcAddr as vk::PFN_vkGetDeviceProcAddr;
            DestroyDevice => Always, device::destroy_device as vk::PFN_vkDestroyDevice;
            GetDeviceQueue => Always, device::get_device_queue as vk::PFN_vkGetDeviceQueue;
            GetDeviceQueue2 => WhenNextHas, device::get_device_queue2 as vk::PFN_vkGetDeviceQueue2;
            CreateCommandPool => Always, command::create_command_pool as vk::PFN_vkCreateCommandPool;
            DestroyCommandPool => Always, command::destroy_command_pool as vk::PFN_vkDestroyCommandPool;
            ResetCommandPool => Always, command::reset_command_pool as vk::PFN_vkResetCommandPool;
            TrimCommandPool => WhenNextHas, command::trim_command_pool as vk::PFN_vkTrimCommandPool;
            AllocateCommandBuffers => Always,
                command::allocate_command_buffers as vk::PFN_vkAllocateCommandBuffers;
            FreeCommandBuffers => Always, command::free_command_buffers as vk::PFN_vkFreeCommandBuffers;
            BeginCommandBuffer => Always, command::begin_command_buffer as vk::PFN_vkBeginCommandBuffer;
            EndCommandBuffer => Always, command::end_command_buffer as vk::PFN_vkEndCommandBuffer;
            ResetCommandBuffer => Always, command::reset_command_buffer as vk::PFN_vkResetCommandBuffer;
            QueueSubmit => Always, command::queue_submit as vk::PFN_vkQueueSubmit;

            CmdPipelineBarrier2 => Emulated, command::cmd_pipeline_barrier2 as vk::PFN_vkCmdPipelineBarrier2;
            CmdSetEvent2 => Emulated, command::cmd_set_event2 as vk::PFN_vkCmdSetEvent2;
            CmdResetEvent2 => Emulated, command::cmd_reset_event2 as vk::PFN_vkCmdResetEvent2;
            CmdWaitEvents2 => Emulated, command::cmd_wait_events2 as vk::PFN_vkCmdWaitEvents2;
            CmdWriteTimestamp2 => Emulated, command::cmd_write_timestamp2 as vk::PFN_vkCmdWriteTimestamp2;
            QueueSubmit2 => Emulated, command::queue_submit2 as vk::PFN_vkQueueSubmit2;
        }
        table
    }

    fn insert(&mut self, entry_point: EntryPoint, routing: Routing, pfn: unsafe extern "system" fn()) {
        self.entries[entry_point.index()] = Some(Intercept {
            entry_point,
            pfn,
            routing,
        });
    }

    pub fn get(&self, ep: EntryPoint) -> Option<&Intercept> {
        self.entries[ep.index()].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intercept> {
        self.entries.iter().flatten()
    }
}

impl Default for InterceptTable {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn name_arg<'a>(p_name: *const c_char) -> Option<&'a CStr> {
    if p_name.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(p_name) })
    }
}

impl Layer {
    /// `vkGetInstanceProcAddr` logic.
    pub fn resolve_instance_proc(&self, instance: vk::Instance, name: &CStr) -> vk::PFN_vkVoidFunction {
        let ep = EntryPoint::from_name(name);
        let intercept = ep.and_then(|ep| self.intercepts().get(ep));

        if let Some(i) = intercept {
            if i.entry_point.level() == Level::Global || i.entry_point == EntryPoint::GetInstanceProcAddr {
                return Some(i.pfn);
            }
        }
        if instance == vk::Instance::null() {
            return None;
        }

        let record = match self.instances.get(instance) {
            Ok(record) => record,
            Err(e) => {
                warn!("vkGetInstanceProcAddr: {}", e);
                return None;
            }
        };

        if let Some(i) = intercept {
            let ours = match i.routing {
                Routing::Always => true,
                Routing::WhenNextHas => {
                    i.entry_point.level() != Level::Instance || record.dispatch.table().has(i.entry_point)
                }
                Routing::Emulated => self.modules().provides(i.entry_point, &self.config().modules),
            };
            if ours {
                trace!(name = ?name, "intercepting");
                return Some(i.pfn);
            }
        }
        unsafe { (record.dispatch.get_instance_proc_addr)(record.driver(), name.as_ptr()) }
    }

    /// `vkGetDeviceProcAddr` logic. Emulated entry points are handed out only
    /// for devices with an active handler; otherwise the next link's pointer
    /// is returned unchanged.
    pub fn resolve_device_proc(&self, device: vk::Device, name: &CStr) -> vk::PFN_vkVoidFunction {
        let record = match self.devices.get(device) {
            Ok(record) => record,
            Err(e) => {
                warn!("vkGetDeviceProcAddr: {}", e);
                return None;
            }
        };

        if let Some(ep) = EntryPoint::from_name(name) {
            if ep.level() != Level::Device {
                return None;
            }
            if let Some(i) = self.intercepts().get(ep) {
                let ours = match i.routing {
                    Routing::Always => true,
                    Routing::WhenNextHas => record.dispatch.table().has(ep),
                    Routing::Emulated => record.modules.handler(ep).is_some(),
                };
                if ours {
                    trace!(name = ?name, "intercepting");
                    return Some(i.pfn);
                }
            }
        }
        unsafe { (record.dispatch.get_device_proc_addr)(record.driver(), name.as_ptr()) }
    }

    /// `vk_layerGetPhysicalDeviceProcAddr` logic: physical-device functions
    /// the loader does not know by name.
    pub fn resolve_physical_device_proc(&self, instance: vk::Instance, name: &CStr) -> vk::PFN_vkVoidFunction {
        let record = match self.instances.get(instance) {
            Ok(record) => record,
            Err(e) => {
                warn!("vk_layerGetPhysicalDeviceProcAddr: {}", e);
                return None;
            }
        };

        if let Some(ep) = EntryPoint::from_name(name) {
            if ep.dispatch() == crate::entry_points::DispatchKind::PhysicalDevice {
                if let Some(i) = self.intercepts().get(ep) {
                    let ours = match i.routing {
                        Routing::Emulated => self.modules().provides(ep, &self.config().modules),
                        Routing::WhenNextHas => record.dispatch.table().has(ep),
                        Routing::Always => true,
                    };
                    if ours {
                        return Some(i.pfn);
                    }
                }
            }
        }
        let next = record.dispatch.get_physical_device_proc_addr?;
        unsafe { next(record.driver(), name.as_ptr()) }
    }
}

/// # Safety
/// `p_name` must be null or a valid C string.
pub unsafe extern "system" fn get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { name_arg(p_name) }?;
    layer().resolve_instance_proc(instance, name)
}

/// # Safety
/// `p_name` must be null or a valid C string.
pub unsafe extern "system" fn get_device_proc_addr(device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    let name = unsafe { name_arg(p_name) }?;
    if device == vk::Device::null() {
        return None;
    }
    layer().resolve_device_proc(device, name)
}

/// # Safety
/// `p_name` must be null or a valid C string.
pub unsafe extern "system" fn get_physical_device_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { name_arg(p_name) }?;
    if instance == vk::Instance::null() {
        return None;
    }
    layer().resolve_physical_device_proc(instance, name)
}
