//! Layer-private state attached to each tracked Vulkan object.
//!
//! Child records hold an `Arc` to their parent's record so a hot-path lookup
//! of a queue or command buffer reaches its device's dispatch table in one
//! map access. Parents only keep child *handles*, never `Arc`s.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use vkshim_core::{ApiVersion, ExtensionSet, HandleRecord};

use crate::dispatch::{DeviceDispatch, InstanceDispatch};
use crate::emulation::{ActiveModules, DeviceCapabilities, EmulationModule};

pub type InstanceRecord = HandleRecord<vk::Instance, InstanceState>;
pub type PhysicalDeviceRecord = HandleRecord<vk::PhysicalDevice, PhysicalDeviceState>;
pub type DeviceRecord = HandleRecord<vk::Device, DeviceState>;
pub type QueueRecord = HandleRecord<vk::Queue, QueueState>;
pub type CommandPoolRecord = HandleRecord<vk::CommandPool, CommandPoolState>;
pub type CommandBufferRecord = HandleRecord<vk::CommandBuffer, CommandBufferState>;

pub struct InstanceState {
    pub dispatch: InstanceDispatch,
    /// Version requested by the application (`apiVersion` 0 reads as 1.0).
    pub api_version: ApiVersion,
    pub enabled_extensions: ExtensionSet,
    physical_devices: Mutex<Vec<vk::PhysicalDevice>>,
}

impl InstanceState {
    pub fn new(dispatch: InstanceDispatch, api_version: ApiVersion, enabled_extensions: ExtensionSet) -> Self {
        Self {
            dispatch,
            api_version,
            enabled_extensions,
            physical_devices: Mutex::new(Vec::new()),
        }
    }

    pub fn add_physical_device(&self, physical_device: vk::PhysicalDevice) {
        let mut list = self.physical_devices.lock();
        if !list.contains(&physical_device) {
            list.push(physical_device);
        }
    }

    pub fn physical_devices(&self) -> Vec<vk::PhysicalDevice> {
        self.physical_devices.lock().clone()
    }

    pub fn take_physical_devices(&self) -> Vec<vk::PhysicalDevice> {
        std::mem::take(&mut *self.physical_devices.lock())
    }
}

pub struct PhysicalDeviceState {
    pub instance: Arc<InstanceRecord>,
    pub capabilities: DeviceCapabilities,
    /// Modules applicable to this physical device, in registration order.
    /// Decided once when the physical device is first enumerated.
    pub offered: Vec<Arc<dyn EmulationModule>>,
    /// Handlers for physical-device-level entry points.
    pub modules: ActiveModules,
}

pub struct DeviceState {
    pub physical_device: Arc<PhysicalDeviceRecord>,
    pub dispatch: DeviceDispatch,
    pub api_version: ApiVersion,
    pub enabled_extensions: ExtensionSet,
    pub modules: ActiveModules,
    children: Mutex<DeviceChildren>,
}

#[derive(Default)]
struct DeviceChildren {
    queues: Vec<vk::Queue>,
    command_pools: Vec<vk::CommandPool>,
}

impl DeviceState {
    pub fn new(
        physical_device: Arc<PhysicalDeviceRecord>,
        dispatch: DeviceDispatch,
        api_version: ApiVersion,
        enabled_extensions: ExtensionSet,
        modules: ActiveModules,
    ) -> Self {
        Self {
            physical_device,
            dispatch,
            api_version,
            enabled_extensions,
            modules,
            children: Mutex::new(DeviceChildren::default()),
        }
    }

    pub fn add_queue(&self, queue: vk::Queue) {
        let mut children = self.children.lock();
        if !children.queues.contains(&queue) {
            children.queues.push(queue);
        }
    }

    pub fn add_command_pool(&self, pool: vk::CommandPool) {
        self.children.lock().command_pools.push(pool);
    }

    pub fn remove_command_pool(&self, pool: vk::CommandPool) {
        self.children.lock().command_pools.retain(|p| *p != pool);
    }

    /// Detach every child handle, for teardown of the device.
    pub fn take_children(&self) -> (Vec<vk::Queue>, Vec<vk::CommandPool>) {
        let mut children = self.children.lock();
        (
            std::mem::take(&mut children.queues),
            std::mem::take(&mut children.command_pools),
        )
    }
}

pub struct QueueState {
    pub device: Arc<DeviceRecord>,
    pub family_index: u32,
    pub index: u32,
}

pub struct CommandPoolState {
    pub device: Arc<DeviceRecord>,
    pub queue_family_index: u32,
    buffers: Mutex<Vec<vk::CommandBuffer>>,
}

impl CommandPoolState {
    pub fn new(device: Arc<DeviceRecord>, queue_family_index: u32) -> Self {
        Self {
            device,
            queue_family_index,
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn add_buffers(&self, buffers: &[vk::CommandBuffer]) {
        self.buffers.lock().extend_from_slice(buffers);
    }

    pub fn remove_buffers(&self, buffers: &[vk::CommandBuffer]) {
        self.buffers.lock().retain(|cb| !buffers.contains(cb));
    }

    pub fn buffers(&self) -> Vec<vk::CommandBuffer> {
        self.buffers.lock().clone()
    }

    pub fn take_buffers(&self) -> Vec<vk::CommandBuffer> {
        std::mem::take(&mut *self.buffers.lock())
    }
}

/// Command buffer lifecycle as observed through begin/end/reset. Tracked,
/// not validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordingState {
    Initial = 0,
    Recording = 1,
    Executable = 2,
}

pub struct CommandBufferState {
    pub device: Arc<DeviceRecord>,
    /// Application handle of the owning pool.
    pub pool: vk::CommandPool,
    recording: AtomicU8,
}

impl CommandBufferState {
    pub fn new(device: Arc<DeviceRecord>, pool: vk::CommandPool) -> Self {
        Self {
            device,
            pool,
            recording: AtomicU8::new(RecordingState::Initial as u8),
        }
    }

    pub fn recording_state(&self) -> RecordingState {
        match self.recording.load(Ordering::Acquire) {
            1 => RecordingState::Recording,
            2 => RecordingState::Executable,
            _ => RecordingState::Initial,
        }
    }

    pub fn set_recording_state(&self, state: RecordingState) {
        self.recording.store(state as u8, Ordering::Release);
    }
}
