//! `VK_KHR_synchronization2` on top of Vulkan 1.0 synchronization.
//!
//! 64-bit stage and access masks are folded onto their 32-bit ancestors,
//! per-barrier stages are merged into the single pair the 1.0 commands take,
//! and `vkQueueSubmit2` is rebuilt as `vkQueueSubmit` with the timeline and
//! protected-submit structs it implies.

use std::ffi::{c_void, CStr};

use ash::vk;
use tracing::trace;

use super::{find_in_chain, Call, CallContext, DeviceCapabilities, EmulationModule, ModuleScope};
use crate::entry_points::EntryPoint;
use crate::error::LayerError;
use crate::records::DeviceRecord;

pub const NAME: &str = "synchronization2";
pub const EXTENSION: &CStr = c"VK_KHR_synchronization2";
pub const SPEC_VERSION: u32 = 1;

const ENTRY_POINTS: &[EntryPoint] = &[
    EntryPoint::CmdPipelineBarrier2,
    EntryPoint::CmdSetEvent2,
    EntryPoint::CmdResetEvent2,
    EntryPoint::CmdWaitEvents2,
    EntryPoint::CmdWriteTimestamp2,
    EntryPoint::QueueSubmit2,
];

/// Per-device state, stored in the device record's module data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSync2State {
    /// Whether semaphore values can be forwarded through
    /// `VkTimelineSemaphoreSubmitInfo`.
    pub timeline_semaphores: bool,
}

pub struct Synchronization2;

impl EmulationModule for Synchronization2 {
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
        ModuleScope::Device
    }

    fn entry_points(&self) -> &'static [EntryPoint] {
        ENTRY_POINTS
    }

    fn supports(&self, caps: &DeviceCapabilities) -> bool {
        !caps.supports_extension(EXTENSION)
    }

    fn owns_feature_struct(&self, s_type: vk::StructureType) -> bool {
        s_type == vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES
    }

    unsafe fn patch_features(&self, features: *mut vk::PhysicalDeviceFeatures2<'_>) {
        if features.is_null() {
            return;
        }
        let sync2 = unsafe {
            find_in_chain(
                (*features).p_next,
                vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES,
            )
        } as *mut vk::PhysicalDeviceSynchronization2Features<'_>;
        if !sync2.is_null() {
            unsafe { (*sync2).synchronization2 = vk::TRUE };
        }
    }

    fn on_device_created(
        &self,
        device: &DeviceRecord,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<(), LayerError> {
        let timeline_semaphores = unsafe { timeline_semaphores_enabled(create_info) };
        device
            .data()
            .insert(NAME, DeviceSync2State { timeline_semaphores });
        Ok(())
    }

    unsafe fn on_intercepted_call(&self, ctx: &mut CallContext<'_>) -> vk::Result {
        trace!(entry_point = ?ctx.entry_point().name(), "emulating");
        match &ctx.call {
            Call::CmdPipelineBarrier2 {
                device,
                command_buffer,
                dependency_info,
            } => {
                let mut barriers = LegacyBarriers::default();
                unsafe { barriers.add(dependency_info) };
                unsafe {
                    (device.dispatch.cmd_pipeline_barrier)(
                        *command_buffer,
                        barriers.src_stages(),
                        barriers.dst_stages(),
                        barriers.dependency_flags,
                        barriers.memory.len() as u32,
                        barriers.memory.as_ptr(),
                        barriers.buffer.len() as u32,
                        barriers.buffer.as_ptr(),
                        barriers.image.len() as u32,
                        barriers.image.as_ptr(),
                    )
                };
                vk::Result::SUCCESS
            }
            Call::CmdSetEvent2 {
                device,
                command_buffer,
                event,
                dependency_info,
            } => {
                let mut barriers = LegacyBarriers::default();
                unsafe { barriers.add(dependency_info) };
                unsafe { (device.dispatch.cmd_set_event)(*command_buffer, *event, barriers.src_stages()) };
                vk::Result::SUCCESS
            }
            Call::CmdResetEvent2 {
                device,
                command_buffer,
                event,
                stage_mask,
            } => {
                let stages = or_if_empty(downgrade_stages(*stage_mask), vk::PipelineStageFlags::TOP_OF_PIPE);
                unsafe { (device.dispatch.cmd_reset_event)(*command_buffer, *event, stages) };
                vk::Result::SUCCESS
            }
            Call::CmdWaitEvents2 {
                device,
                command_buffer,
                events,
                dependency_infos,
            } => {
                let mut barriers = LegacyBarriers::default();
                for info in dependency_infos.iter() {
                    unsafe { barriers.add(info) };
                }
                unsafe {
                    (device.dispatch.cmd_wait_events)(
                        *command_buffer,
                        events.len() as u32,
                        events.as_ptr(),
                        barriers.src_stages(),
                        barriers.dst_stages(),
                        barriers.memory.len() as u32,
                        barriers.memory.as_ptr(),
                        barriers.buffer.len() as u32,
                        barriers.buffer.as_ptr(),
                        barriers.image.len() as u32,
                        barriers.image.as_ptr(),
                    )
                };
                vk::Result::SUCCESS
            }
            Call::CmdWriteTimestamp2 {
                device,
                command_buffer,
                stage,
                query_pool,
                query,
            } => {
                unsafe {
                    (device.dispatch.cmd_write_timestamp)(*command_buffer, timestamp_stage(*stage), *query_pool, *query)
                };
                vk::Result::SUCCESS
            }
            Call::QueueSubmit2 {
                device,
                queue,
                submits,
                fence,
            } => unsafe { queue_submit2(device, *queue, submits, *fence) },
            Call::GetPhysicalDeviceToolProperties { .. } => vk::Result::ERROR_UNKNOWN,
        }
    }
}

const STAGE_LOW_BITS: u64 = 0xFFFF_FFFF;
const ACCESS_LOW_BITS: u64 = 0xFFFF_FFFF;

/// Fold a 64-bit stage mask onto the 32-bit stages that cover it. `NONE`
/// folds to an empty mask; callers substitute top- or bottom-of-pipe.
pub fn downgrade_stages(stages: vk::PipelineStageFlags2) -> vk::PipelineStageFlags {
    use vk::PipelineStageFlags2 as S2;

    let raw = stages.as_raw();
    let mut out = vk::PipelineStageFlags::from_raw((raw & STAGE_LOW_BITS) as u32);
    let high = S2::from_raw(raw & !STAGE_LOW_BITS);

    let transfer = S2::COPY | S2::RESOLVE | S2::BLIT | S2::CLEAR;
    let vertex_input = S2::INDEX_INPUT | S2::VERTEX_ATTRIBUTE_INPUT;
    let pre_rasterization = S2::PRE_RASTERIZATION_SHADERS;

    if high.intersects(transfer) {
        out |= vk::PipelineStageFlags::TRANSFER;
    }
    if high.intersects(vertex_input) {
        out |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if high.intersects(pre_rasterization) {
        out |= vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
            | vk::PipelineStageFlags::GEOMETRY_SHADER;
    }
    let known = (transfer | vertex_input | pre_rasterization).as_raw();
    if high.as_raw() & !known != 0 {
        out |= vk::PipelineStageFlags::ALL_COMMANDS;
    }
    out
}

/// Fold a 64-bit access mask onto the 32-bit accesses that cover it.
pub fn downgrade_access(access: vk::AccessFlags2) -> vk::AccessFlags {
    use vk::AccessFlags2 as A2;

    let raw = access.as_raw();
    let mut out = vk::AccessFlags::from_raw((raw & ACCESS_LOW_BITS) as u32);
    let high = A2::from_raw(raw & !ACCESS_LOW_BITS);

    let reads = A2::SHADER_SAMPLED_READ | A2::SHADER_STORAGE_READ;
    let writes = A2::SHADER_STORAGE_WRITE;

    if high.intersects(reads) {
        out |= vk::AccessFlags::SHADER_READ;
    }
    if high.intersects(writes) {
        out |= vk::AccessFlags::SHADER_WRITE;
    }
    if high.as_raw() & !(reads | writes).as_raw() != 0 {
        out |= vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
    }
    out
}

/// Map the aspect-agnostic layouts to their 1.0 equivalents.
pub fn downgrade_layout(layout: vk::ImageLayout, aspect: vk::ImageAspectFlags) -> vk::ImageLayout {
    let depth_stencil = aspect.intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
    match layout {
        vk::ImageLayout::READ_ONLY_OPTIMAL if depth_stencil => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        vk::ImageLayout::READ_ONLY_OPTIMAL => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageLayout::ATTACHMENT_OPTIMAL if depth_stencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::ATTACHMENT_OPTIMAL => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        other => other,
    }
}

/// `vkCmdWriteTimestamp` takes exactly one stage.
fn timestamp_stage(stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags {
    let stages = downgrade_stages(stage);
    if stages.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else if stages.as_raw().is_power_of_two() {
        stages
    } else {
        vk::PipelineStageFlags::BOTTOM_OF_PIPE
    }
}

fn or_if_empty(stages: vk::PipelineStageFlags, fallback: vk::PipelineStageFlags) -> vk::PipelineStageFlags {
    if stages.is_empty() {
        fallback
    } else {
        stages
    }
}

/// Borrow a `(pointer, count)` pair from a Vulkan struct as a slice.
///
/// # Safety
/// `ptr` must be null or point to `count` valid elements outliving `'a`.
pub(crate) unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

/// Barriers from one or more `VkDependencyInfo`s in 1.0 form.
#[derive(Default)]
struct LegacyBarriers {
    src: vk::PipelineStageFlags,
    dst: vk::PipelineStageFlags,
    dependency_flags: vk::DependencyFlags,
    memory: Vec<vk::MemoryBarrier<'static>>,
    buffer: Vec<vk::BufferMemoryBarrier<'static>>,
    image: Vec<vk::ImageMemoryBarrier<'static>>,
}

impl LegacyBarriers {
    /// # Safety
    /// The barrier arrays of `info` must be valid.
    unsafe fn add(&mut self, info: &vk::DependencyInfo<'_>) {
        self.dependency_flags |= info.dependency_flags;

        for b in unsafe { raw_slice(info.p_memory_barriers, info.memory_barrier_count) } {
            self.src |= downgrade_stages(b.src_stage_mask);
            self.dst |= downgrade_stages(b.dst_stage_mask);
            self.memory.push(
                vk::MemoryBarrier::default()
                    .src_access_mask(downgrade_access(b.src_access_mask))
                    .dst_access_mask(downgrade_access(b.dst_access_mask)),
            );
        }

        for b in unsafe { raw_slice(info.p_buffer_memory_barriers, info.buffer_memory_barrier_count) } {
            self.src |= downgrade_stages(b.src_stage_mask);
            self.dst |= downgrade_stages(b.dst_stage_mask);
            self.buffer.push(
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(downgrade_access(b.src_access_mask))
                    .dst_access_mask(downgrade_access(b.dst_access_mask))
                    .src_queue_family_index(b.src_queue_family_index)
                    .dst_queue_family_index(b.dst_queue_family_index)
                    .buffer(b.buffer)
                    .offset(b.offset)
                    .size(b.size),
            );
        }

        for b in unsafe { raw_slice(info.p_image_memory_barriers, info.image_memory_barrier_count) } {
            self.src |= downgrade_stages(b.src_stage_mask);
            self.dst |= downgrade_stages(b.dst_stage_mask);
            let aspect = b.subresource_range.aspect_mask;
            self.image.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(downgrade_access(b.src_access_mask))
                    .dst_access_mask(downgrade_access(b.dst_access_mask))
                    .old_layout(downgrade_layout(b.old_layout, aspect))
                    .new_layout(downgrade_layout(b.new_layout, aspect))
                    .src_queue_family_index(b.src_queue_family_index)
                    .dst_queue_family_index(b.dst_queue_family_index)
                    .image(b.image)
                    .subresource_range(b.subresource_range),
            );
        }
    }

    fn src_stages(&self) -> vk::PipelineStageFlags {
        or_if_empty(self.src, vk::PipelineStageFlags::TOP_OF_PIPE)
    }

    fn dst_stages(&self) -> vk::PipelineStageFlags {
        or_if_empty(self.dst, vk::PipelineStageFlags::BOTTOM_OF_PIPE)
    }
}

/// Arrays backing one translated `VkSubmitInfo`.
struct LegacySubmit {
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    wait_values: Vec<u64>,
    command_buffers: Vec<vk::CommandBuffer>,
    signal_semaphores: Vec<vk::Semaphore>,
    signal_values: Vec<u64>,
    protected: bool,
}

impl LegacySubmit {
    /// # Safety
    /// The arrays of `submit` must be valid.
    unsafe fn from_submit2(submit: &vk::SubmitInfo2<'_>) -> Self {
        let waits = unsafe { raw_slice(submit.p_wait_semaphore_infos, submit.wait_semaphore_info_count) };
        let command_buffers =
            unsafe { raw_slice(submit.p_command_buffer_infos, submit.command_buffer_info_count) };
        let signals = unsafe { raw_slice(submit.p_signal_semaphore_infos, submit.signal_semaphore_info_count) };
        Self {
            wait_semaphores: waits.iter().map(|w| w.semaphore).collect(),
            wait_stages: waits
                .iter()
                .map(|w| or_if_empty(downgrade_stages(w.stage_mask), vk::PipelineStageFlags::TOP_OF_PIPE))
                .collect(),
            wait_values: waits.iter().map(|w| w.value).collect(),
            command_buffers: command_buffers.iter().map(|c| c.command_buffer).collect(),
            signal_semaphores: signals.iter().map(|s| s.semaphore).collect(),
            signal_values: signals.iter().map(|s| s.value).collect(),
            protected: submit.flags.contains(vk::SubmitFlags::PROTECTED),
        }
    }
}

/// # Safety
/// `submits` must satisfy `vkQueueSubmit2` valid usage.
unsafe fn queue_submit2(
    device: &DeviceRecord,
    queue: vk::Queue,
    submits: &[vk::SubmitInfo2<'_>],
    fence: vk::Fence,
) -> vk::Result {
    let timeline = device
        .data()
        .get::<DeviceSync2State>(NAME)
        .is_some_and(|state| state.timeline_semaphores);

    let legacy: Vec<LegacySubmit> = submits
        .iter()
        .map(|s| unsafe { LegacySubmit::from_submit2(s) })
        .collect();
    let mut timeline_infos: Vec<vk::TimelineSemaphoreSubmitInfo<'_>> = legacy
        .iter()
        .map(|s| {
            vk::TimelineSemaphoreSubmitInfo::default()
                .wait_semaphore_values(&s.wait_values)
                .signal_semaphore_values(&s.signal_values)
        })
        .collect();
    let mut protected_infos: Vec<vk::ProtectedSubmitInfo<'_>> = legacy
        .iter()
        .map(|s| vk::ProtectedSubmitInfo::default().protected_submit(s.protected))
        .collect();

    let infos: Vec<vk::SubmitInfo<'_>> = legacy
        .iter()
        .zip(timeline_infos.iter_mut())
        .zip(protected_infos.iter_mut())
        .map(|((s, timeline_info), protected_info)| {
            let mut info = vk::SubmitInfo::default()
                .wait_semaphores(&s.wait_semaphores)
                .wait_dst_stage_mask(&s.wait_stages)
                .command_buffers(&s.command_buffers)
                .signal_semaphores(&s.signal_semaphores);
            if timeline {
                info = info.push_next(timeline_info);
            }
            if s.protected {
                info = info.push_next(protected_info);
            }
            info
        })
        .collect();

    unsafe { (device.dispatch.queue_submit)(queue, infos.len() as u32, infos.as_ptr(), fence) }
}

/// Whether `create_info` enables timeline semaphores through either the
/// extension feature struct or the Vulkan 1.2 feature struct.
///
/// # Safety
/// The `pNext` chain of `create_info` must be valid.
unsafe fn timeline_semaphores_enabled(create_info: &vk::DeviceCreateInfo<'_>) -> bool {
    let head = create_info.p_next as *mut c_void;
    let ext = unsafe { find_in_chain(head, vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES) }
        as *const vk::PhysicalDeviceTimelineSemaphoreFeatures<'_>;
    if !ext.is_null() && unsafe { (*ext).timeline_semaphore } == vk::TRUE {
        return true;
    }
    let v12 = unsafe { find_in_chain(head, vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES) }
        as *const vk::PhysicalDeviceVulkan12Features<'_>;
    !v12.is_null() && unsafe { (*v12).timeline_semaphore } == vk::TRUE
}
