//! Device creation and teardown, and queue tracking.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, info, warn};
use vkshim_core::chain::{device_create_struct_size, FilteredChain};
use vkshim_core::cstr::read_cstr_array;
use vkshim_core::ExtensionSet;

use crate::dispatch::{cast_pfn, DeviceDispatch};
use crate::emulation::{EmulationModule, ModuleScope};
use crate::entry_points::EntryPoint;
use crate::error::{check, LayerError};
use crate::records::{DeviceRecord, DeviceState, QueueState};
use crate::{layer, loader, Layer};

pub unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    match unsafe { create_device_inner(physical_device, p_create_info, p_allocator, p_device) } {
        Ok(()) => vk::Result::SUCCESS,
        Err(e) => {
            warn!("vkCreateDevice failed: {}", e);
            e.to_vk_result()
        }
    }
}

unsafe fn create_device_inner(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> Result<(), LayerError> {
    let layer = layer();
    let physical = layer.physical_devices.get(physical_device)?;
    if p_create_info.is_null() || p_device.is_null() {
        return Err(LayerError::MissingLinkInfo("device"));
    }
    let create_info = unsafe { &*p_create_info };

    let chain_info = unsafe { loader::device_link_info(create_info) };
    if chain_info.is_null() {
        return Err(LayerError::MissingLinkInfo("device"));
    }
    let link = unsafe { (*chain_info).u.p_layer_info };
    if link.is_null() {
        return Err(LayerError::MissingLinkInfo("device"));
    }
    let (Some(next_gipa), Some(next_gdpa)) = (unsafe { (*link).pfn_next_get_instance_proc_addr }, unsafe {
        (*link).pfn_next_get_device_proc_addr
    }) else {
        return Err(LayerError::MissingLinkInfo("device"));
    };

    // Advance the chain so the next layer finds its own link.
    unsafe { (*chain_info).u.p_layer_info = (*link).p_next };

    let instance = &physical.instance;
    let next_create: vk::PFN_vkCreateDevice =
        match unsafe { next_gipa(instance.driver(), EntryPoint::CreateDevice.name().as_ptr()) } {
            Some(pfn) => unsafe { cast_pfn(pfn) },
            None => instance.dispatch.create_device,
        };

    let requested_names =
        unsafe { read_cstr_array(create_info.pp_enabled_extension_names, create_info.enabled_extension_count) };
    let requested: ExtensionSet = requested_names.iter().copied().collect();

    // Device-scope modules the application opted into by enabling their extension.
    let active: Vec<Arc<dyn EmulationModule>> = physical
        .offered
        .iter()
        .filter(|m| m.scope() == ModuleScope::Device && requested.contains(m.extension()))
        .cloned()
        .collect();

    // The next link must not see extensions or feature structs it does not know.
    let forwarded_names: Vec<*const c_char> = requested_names
        .iter()
        .filter(|name| !active.iter().any(|m| m.extension() == **name))
        .map(|name| name.as_ptr())
        .collect();
    let owned = |s_type: vk::StructureType| active.iter().any(|m| m.owns_feature_struct(s_type));
    let chain = match unsafe { FilteredChain::new(create_info.p_next, owned, device_chain_struct_size) } {
        Ok(chain) => Some(chain),
        Err(e) => {
            // Drivers skip structs they do not know, so the unfiltered chain
            // is still valid for them.
            warn!("forwarding the device create chain unfiltered: {}", e);
            None
        }
    };
    let mut forwarded = *create_info;
    forwarded.enabled_extension_count = forwarded_names.len() as u32;
    forwarded.pp_enabled_extension_names = forwarded_names.as_ptr();
    if let Some(chain) = &chain {
        forwarded.p_next = chain.head();
        if !chain.omitted().is_empty() {
            debug!(omitted = ?chain.omitted(), copied = chain.copied(), "hid emulated feature structs");
        }
    }

    let result = unsafe { next_create(physical.driver(), &forwarded, p_allocator, p_device) };
    check(result)?;
    let device = unsafe { *p_device };

    let dispatch = match unsafe { DeviceDispatch::load(device, next_gdpa) } {
        Ok(dispatch) => dispatch,
        Err(e) => {
            unsafe { destroy_unusable_device(next_gdpa, device, p_allocator) };
            return Err(e);
        }
    };
    let destroy = dispatch.destroy_device;

    let modules = layer.modules().resolve(&active);
    let api_version = physical.capabilities.api_version.min(instance.api_version);
    let state = DeviceState::new(Arc::clone(&physical), dispatch, api_version, requested, modules);
    let record = match layer.devices.register(device, state) {
        Ok(record) => record,
        Err(e) => {
            unsafe { destroy(device, p_allocator) };
            return Err(e.into());
        }
    };

    for module in &active {
        if let Err(e) = module.on_device_created(&record, create_info) {
            let _ = layer.devices.destroy(device);
            unsafe { destroy(device, p_allocator) };
            return Err(e);
        }
    }

    info!(
        device = format_args!("{:#x}", device.as_raw()),
        physical_device = %physical.capabilities.device_name,
        emulating = ?record.modules,
        "device created"
    );
    Ok(())
}

/// Tear down a device the next link created but the layer cannot use.
unsafe fn destroy_unusable_device(
    next_gdpa: vk::PFN_vkGetDeviceProcAddr,
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    if let Some(pfn) = unsafe { next_gdpa(device, EntryPoint::DestroyDevice.name().as_ptr()) } {
        let destroy: vk::PFN_vkDestroyDevice = unsafe { cast_pfn(pfn) };
        unsafe { destroy(device, p_allocator) };
    }
}

/// Struct sizes for everything that may precede a hidden struct in a
/// device create chain, the loader's own link structs included.
fn device_chain_struct_size(s_type: vk::StructureType) -> Option<usize> {
    if s_type == loader::STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO {
        Some(std::mem::size_of::<loader::LayerDeviceCreateInfo>())
    } else {
        device_create_struct_size(s_type)
    }
}

pub unsafe extern "system" fn destroy_device(device: vk::Device, p_allocator: *const vk::AllocationCallbacks<'_>) {
    if device == vk::Device::null() {
        return;
    }
    let layer = layer();
    let record = lookup_or!(layer.devices.destroy(device), "vkDestroyDevice", ());
    let (queues, pools) = record.take_children();
    for queue in queues {
        let _ = layer.queues.destroy(queue);
    }
    for pool in pools {
        if let Ok(pool_record) = layer.command_pools.destroy(pool) {
            for command_buffer in pool_record.take_buffers() {
                let _ = layer.command_buffers.destroy(command_buffer);
            }
        }
    }
    unsafe { (record.dispatch.destroy_device)(record.driver(), p_allocator) };
    info!(device = format_args!("{:#x}", device.as_raw()), "device destroyed");
}

impl Layer {
    fn track_queue(&self, device: &Arc<DeviceRecord>, queue: vk::Queue, family_index: u32, index: u32) {
        let tracked = self.queues.get_or_register(queue, || QueueState {
            device: Arc::clone(device),
            family_index,
            index,
        });
        match tracked {
            Ok(_) => device.add_queue(queue),
            Err(e) => warn!("vkGetDeviceQueue: {}", e),
        }
    }
}

pub unsafe extern "system" fn get_device_queue(
    device: vk::Device,
    queue_family_index: u32,
    queue_index: u32,
    p_queue: *mut vk::Queue,
) {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkGetDeviceQueue", ());
    unsafe { (record.dispatch.get_device_queue)(record.driver(), queue_family_index, queue_index, p_queue) };
    if p_queue.is_null() {
        return;
    }
    let queue = unsafe { *p_queue };
    if queue != vk::Queue::null() {
        layer.track_queue(&record, queue, queue_family_index, queue_index);
    }
}

pub unsafe extern "system" fn get_device_queue2(
    device: vk::Device,
    p_queue_info: *const vk::DeviceQueueInfo2<'_>,
    p_queue: *mut vk::Queue,
) {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkGetDeviceQueue2", ());
    let Some(next) = record.dispatch.get_device_queue2 else {
        warn!("vkGetDeviceQueue2: not provided by the next link");
        return;
    };
    unsafe { next(record.driver(), p_queue_info, p_queue) };
    if p_queue.is_null() || p_queue_info.is_null() {
        return;
    }
    let queue = unsafe { *p_queue };
    if queue != vk::Queue::null() {
        let info = unsafe { &*p_queue_info };
        layer.track_queue(&record, queue, info.queue_family_index, info.queue_index);
    }
}

