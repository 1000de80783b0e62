//! Command pools, command buffers and submission.
//!
//! Command pools are the one non-dispatchable handle the layer wraps: the
//! application sees a layer id and every call that carries a pool unwraps
//! it before forwarding. The synchronization2-shaped entry points route to
//! the device's emulation handler when one is active and forward otherwise.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, warn};

use crate::emulation::synchronization2::raw_slice;
use crate::emulation::{Call, CallContext};
use crate::entry_points::EntryPoint;
use crate::layer;
use crate::records::{CommandBufferState, CommandPoolState, DeviceRecord, RecordingState};

pub unsafe extern "system" fn create_command_pool(
    device: vk::Device,
    p_create_info: *const vk::CommandPoolCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_command_pool: *mut vk::CommandPool,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkCreateCommandPool", vk::Result::ERROR_UNKNOWN);
    if p_create_info.is_null() || p_command_pool.is_null() {
        return vk::Result::ERROR_UNKNOWN;
    }
    let result =
        unsafe { (record.dispatch.create_command_pool)(record.driver(), p_create_info, p_allocator, p_command_pool) };
    if result != vk::Result::SUCCESS {
        return result;
    }

    let driver_pool = unsafe { *p_command_pool };
    let family = unsafe { (*p_create_info).queue_family_index };
    match layer.command_pools.wrap(driver_pool, CommandPoolState::new(Arc::clone(&record), family)) {
        Ok(pool) => {
            record.add_command_pool(pool.handle());
            unsafe { *p_command_pool = pool.handle() };
            debug!(
                pool = format_args!("{:#x}", pool.handle().as_raw()),
                driver = format_args!("{:#x}", driver_pool.as_raw()),
                family,
                "command pool created"
            );
            vk::Result::SUCCESS
        }
        Err(e) => {
            warn!("vkCreateCommandPool: {}", e);
            unsafe { (record.dispatch.destroy_command_pool)(record.driver(), driver_pool, p_allocator) };
            unsafe { *p_command_pool = vk::CommandPool::null() };
            vk::Result::ERROR_UNKNOWN
        }
    }
}

pub unsafe extern "system" fn destroy_command_pool(
    device: vk::Device,
    command_pool: vk::CommandPool,
    p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    if command_pool == vk::CommandPool::null() {
        return;
    }
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkDestroyCommandPool", ());
    let pool = lookup_or!(layer.command_pools.destroy(command_pool), "vkDestroyCommandPool", ());
    record.remove_command_pool(command_pool);
    // Buffers die with their pool.
    for command_buffer in pool.take_buffers() {
        let _ = layer.command_buffers.destroy(command_buffer);
    }
    unsafe { (record.dispatch.destroy_command_pool)(record.driver(), pool.driver(), p_allocator) };
}

pub unsafe extern "system" fn reset_command_pool(
    device: vk::Device,
    command_pool: vk::CommandPool,
    flags: vk::CommandPoolResetFlags,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkResetCommandPool", vk::Result::ERROR_UNKNOWN);
    let pool = lookup_or!(layer.command_pools.get(command_pool), "vkResetCommandPool", vk::Result::ERROR_UNKNOWN);
    let result = unsafe { (record.dispatch.reset_command_pool)(record.driver(), pool.driver(), flags) };
    if result == vk::Result::SUCCESS {
        for command_buffer in pool.buffers() {
            if let Ok(buffer) = layer.command_buffers.get(command_buffer) {
                buffer.set_recording_state(RecordingState::Initial);
            }
        }
    }
    result
}

pub unsafe extern "system" fn trim_command_pool(
    device: vk::Device,
    command_pool: vk::CommandPool,
    flags: vk::CommandPoolTrimFlags,
) {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkTrimCommandPool", ());
    let driver_pool = lookup_or!(layer.command_pools.unwrap(command_pool), "vkTrimCommandPool", ());
    match record.dispatch.trim_command_pool {
        Some(next) => unsafe { next(record.driver(), driver_pool, flags) },
        None => warn!("vkTrimCommandPool: not provided by the next link"),
    }
}

pub unsafe extern "system" fn allocate_command_buffers(
    device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_command_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkAllocateCommandBuffers", vk::Result::ERROR_UNKNOWN);
    if p_allocate_info.is_null() || p_command_buffers.is_null() {
        return vk::Result::ERROR_UNKNOWN;
    }
    let info = unsafe { &*p_allocate_info };
    let pool = lookup_or!(
        layer.command_pools.get(info.command_pool),
        "vkAllocateCommandBuffers",
        vk::Result::ERROR_UNKNOWN
    );

    let mut forwarded = *info;
    forwarded.command_pool = pool.driver();
    let result = unsafe { (record.dispatch.allocate_command_buffers)(record.driver(), &forwarded, p_command_buffers) };
    if result != vk::Result::SUCCESS {
        return result;
    }

    let buffers = unsafe { raw_slice(p_command_buffers, info.command_buffer_count) };
    for (registered, &command_buffer) in buffers.iter().enumerate() {
        let state = CommandBufferState::new(Arc::clone(&record), info.command_pool);
        if let Err(e) = layer.command_buffers.register(command_buffer, state) {
            warn!("vkAllocateCommandBuffers: {}", e);
            for &tracked in &buffers[..registered] {
                let _ = layer.command_buffers.destroy(tracked);
            }
            unsafe {
                (record.dispatch.free_command_buffers)(
                    record.driver(),
                    pool.driver(),
                    info.command_buffer_count,
                    p_command_buffers,
                )
            };
            return vk::Result::ERROR_UNKNOWN;
        }
    }
    pool.add_buffers(buffers);
    vk::Result::SUCCESS
}

pub unsafe extern "system" fn free_command_buffers(
    device: vk::Device,
    command_pool: vk::CommandPool,
    command_buffer_count: u32,
    p_command_buffers: *const vk::CommandBuffer,
) {
    let layer = layer();
    let record = lookup_or!(layer.devices.get(device), "vkFreeCommandBuffers", ());
    let pool = lookup_or!(layer.command_pools.get(command_pool), "vkFreeCommandBuffers", ());
    let buffers = unsafe { raw_slice(p_command_buffers, command_buffer_count) };
    for &command_buffer in buffers {
        if command_buffer != vk::CommandBuffer::null() {
            let _ = layer.command_buffers.destroy(command_buffer);
        }
    }
    pool.remove_buffers(buffers);
    unsafe {
        (record.dispatch.free_command_buffers)(record.driver(), pool.driver(), command_buffer_count, p_command_buffers)
    };
}

pub unsafe extern "system" fn begin_command_buffer(
    command_buffer: vk::CommandBuffer,
    p_begin_info: *const vk::CommandBufferBeginInfo<'_>,
) -> vk::Result {
    let record = lookup_or!(
        layer().command_buffers.get(command_buffer),
        "vkBeginCommandBuffer",
        vk::Result::ERROR_UNKNOWN
    );
    let result = unsafe { (record.device.dispatch.begin_command_buffer)(record.driver(), p_begin_info) };
    if result == vk::Result::SUCCESS {
        record.set_recording_state(RecordingState::Recording);
    }
    result
}

pub unsafe extern "system" fn end_command_buffer(command_buffer: vk::CommandBuffer) -> vk::Result {
    let record = lookup_or!(
        layer().command_buffers.get(command_buffer),
        "vkEndCommandBuffer",
        vk::Result::ERROR_UNKNOWN
    );
    let result = unsafe { (record.device.dispatch.end_command_buffer)(record.driver()) };
    if result == vk::Result::SUCCESS {
        record.set_recording_state(RecordingState::Executable);
    }
    result
}

pub unsafe extern "system" fn reset_command_buffer(
    command_buffer: vk::CommandBuffer,
    flags: vk::CommandBufferResetFlags,
) -> vk::Result {
    let record = lookup_or!(
        layer().command_buffers.get(command_buffer),
        "vkResetCommandBuffer",
        vk::Result::ERROR_UNKNOWN
    );
    let result = unsafe { (record.device.dispatch.reset_command_buffer)(record.driver(), flags) };
    if result == vk::Result::SUCCESS {
        record.set_recording_state(RecordingState::Initial);
    }
    result
}

pub unsafe extern "system" fn queue_submit(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(layer.queues.get(queue), "vkQueueSubmit", vk::Result::ERROR_UNKNOWN);
    for submit in unsafe { raw_slice(p_submits, submit_count) } {
        for &command_buffer in unsafe { raw_slice(submit.p_command_buffers, submit.command_buffer_count) } {
            if let Err(e) = layer.command_buffers.get(command_buffer) {
                warn!("vkQueueSubmit: {}", e);
                return vk::Result::ERROR_UNKNOWN;
            }
        }
    }
    unsafe { (record.device.dispatch.queue_submit)(record.driver(), submit_count, p_submits, fence) }
}

/// Run `call` through the device's handler for `ep`. Returns `None` when no
/// module handles `ep` on this device.
unsafe fn emulate<'a>(device: &'a DeviceRecord, ep: EntryPoint, call: Call<'a>) -> Option<vk::Result> {
    let module = device.modules.handler(ep)?;
    let mut ctx = CallContext::new(call);
    let result = unsafe { module.on_intercepted_call(&mut ctx) };
    if result.as_raw() < 0 {
        warn!(module = module.name(), "{}: {:?}", ep.name().to_string_lossy(), result);
    }
    Some(result)
}

fn not_forwardable(name: &str) {
    warn!("{}: no emulation handler and not provided by the next link", name);
}

pub unsafe extern "system" fn cmd_pipeline_barrier2(
    command_buffer: vk::CommandBuffer,
    p_dependency_info: *const vk::DependencyInfo<'_>,
) {
    let record = lookup_or!(layer().command_buffers.get(command_buffer), "vkCmdPipelineBarrier2", ());
    let device = &record.device;
    if !p_dependency_info.is_null() {
        let call = Call::CmdPipelineBarrier2 {
            device,
            command_buffer: record.driver(),
            dependency_info: unsafe { &*p_dependency_info },
        };
        if unsafe { emulate(device, EntryPoint::CmdPipelineBarrier2, call) }.is_some() {
            return;
        }
    }
    match device.dispatch.cmd_pipeline_barrier2 {
        Some(next) => unsafe { next(record.driver(), p_dependency_info) },
        None => not_forwardable("vkCmdPipelineBarrier2"),
    }
}

pub unsafe extern "system" fn cmd_set_event2(
    command_buffer: vk::CommandBuffer,
    event: vk::Event,
    p_dependency_info: *const vk::DependencyInfo<'_>,
) {
    let record = lookup_or!(layer().command_buffers.get(command_buffer), "vkCmdSetEvent2", ());
    let device = &record.device;
    if !p_dependency_info.is_null() {
        let call = Call::CmdSetEvent2 {
            device,
            command_buffer: record.driver(),
            event,
            dependency_info: unsafe { &*p_dependency_info },
        };
        if unsafe { emulate(device, EntryPoint::CmdSetEvent2, call) }.is_some() {
            return;
        }
    }
    match device.dispatch.cmd_set_event2 {
        Some(next) => unsafe { next(record.driver(), event, p_dependency_info) },
        None => not_forwardable("vkCmdSetEvent2"),
    }
}

pub unsafe extern "system" fn cmd_reset_event2(
    command_buffer: vk::CommandBuffer,
    event: vk::Event,
    stage_mask: vk::PipelineStageFlags2,
) {
    let record = lookup_or!(layer().command_buffers.get(command_buffer), "vkCmdResetEvent2", ());
    let device = &record.device;
    let call = Call::CmdResetEvent2 {
        device,
        command_buffer: record.driver(),
        event,
        stage_mask,
    };
    if unsafe { emulate(device, EntryPoint::CmdResetEvent2, call) }.is_some() {
        return;
    }
    match device.dispatch.cmd_reset_event2 {
        Some(next) => unsafe { next(record.driver(), event, stage_mask) },
        None => not_forwardable("vkCmdResetEvent2"),
    }
}

pub unsafe extern "system" fn cmd_wait_events2(
    command_buffer: vk::CommandBuffer,
    event_count: u32,
    p_events: *const vk::Event,
    p_dependency_infos: *const vk::DependencyInfo<'_>,
) {
    let record = lookup_or!(layer().command_buffers.get(command_buffer), "vkCmdWaitEvents2", ());
    let device = &record.device;
    let call = Call::CmdWaitEvents2 {
        device,
        command_buffer: record.driver(),
        events: unsafe { raw_slice(p_events, event_count) },
        dependency_infos: unsafe { raw_slice(p_dependency_infos, event_count) },
    };
    if unsafe { emulate(device, EntryPoint::CmdWaitEvents2, call) }.is_some() {
        return;
    }
    match device.dispatch.cmd_wait_events2 {
        Some(next) => unsafe { next(record.driver(), event_count, p_events, p_dependency_infos) },
        None => not_forwardable("vkCmdWaitEvents2"),
    }
}

pub unsafe extern "system" fn cmd_write_timestamp2(
    command_buffer: vk::CommandBuffer,
    stage: vk::PipelineStageFlags2,
    query_pool: vk::QueryPool,
    query: u32,
) {
    let record = lookup_or!(layer().command_buffers.get(command_buffer), "vkCmdWriteTimestamp2", ());
    let device = &record.device;
    let call = Call::CmdWriteTimestamp2 {
        device,
        command_buffer: record.driver(),
        stage,
        query_pool,
        query,
    };
    if unsafe { emulate(device, EntryPoint::CmdWriteTimestamp2, call) }.is_some() {
        return;
    }
    match device.dispatch.cmd_write_timestamp2 {
        Some(next) => unsafe { next(record.driver(), stage, query_pool, query) },
        None => not_forwardable("vkCmdWriteTimestamp2"),
    }
}

pub unsafe extern "system" fn queue_submit2(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo2<'_>,
    fence: vk::Fence,
) -> vk::Result {
    let layer = layer();
    let record = lookup_or!(layer.queues.get(queue), "vkQueueSubmit2", vk::Result::ERROR_UNKNOWN);
    let submits = unsafe { raw_slice(p_submits, submit_count) };
    for submit in submits {
        let infos = unsafe { raw_slice(submit.p_command_buffer_infos, submit.command_buffer_info_count) };
        for info in infos {
            if let Err(e) = layer.command_buffers.get(info.command_buffer) {
                warn!("vkQueueSubmit2: {}", e);
                return vk::Result::ERROR_UNKNOWN;
            }
        }
    }

    let device = &record.device;
    let call = Call::QueueSubmit2 {
        device,
        queue: record.driver(),
        submits,
        fence,
    };
    if let Some(result) = unsafe { emulate(device, EntryPoint::QueueSubmit2, call) } {
        return result;
    }
    match device.dispatch.queue_submit2 {
        Some(next) => unsafe { next(record.driver(), submit_count, p_submits, fence) },
        None => {
            not_forwardable("vkQueueSubmit2");
            vk::Result::ERROR_UNKNOWN
        }
    }
}
