//! Per-instance and per-device dispatch tables.
//!
//! A table is built exactly once, when its object is created, from the next
//! link's proc-address function and is never mutated afterwards, so every
//! thread reads it without locking.

use std::ffi::CStr;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, error};

use crate::entry_points::{EntryPoint, Level, Requirement};
use crate::error::LayerError;
use crate::loader::PFN_GetPhysicalDeviceProcAddr;

/// Untyped next-link function pointers indexed by `EntryPoint`.
pub struct DispatchTable {
    level: Level,
    entries: Box<[vk::PFN_vkVoidFunction]>,
}

impl DispatchTable {
    /// Resolve every entry point of `level` through `resolve`, trying the
    /// canonical name first and then each alias.
    pub fn build(
        level: Level,
        mut resolve: impl FnMut(&CStr) -> vk::PFN_vkVoidFunction,
    ) -> Result<Self, LayerError> {
        let mut entries = vec![None; EntryPoint::COUNT].into_boxed_slice();
        for &ep in EntryPoint::ALL.iter().filter(|ep| ep.level() == level) {
            let pfn = ep.names().find_map(&mut resolve);
            if pfn.is_none() && ep.requirement() == Requirement::Mandatory {
                error!(entry_point = ?ep.name(), "next link is missing a mandatory entry point");
                return Err(LayerError::MissingEntryPoint(ep.name()));
            }
            entries[ep.index()] = pfn;
        }
        Ok(Self { level, entries })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Next-link address for `ep`, or `None` if it is absent or belongs to
    /// another level.
    pub fn lookup(&self, ep: EntryPoint) -> vk::PFN_vkVoidFunction {
        self.entries[ep.index()]
    }

    pub fn has(&self, ep: EntryPoint) -> bool {
        self.lookup(ep).is_some()
    }

    /// Number of entry points the next link provided.
    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    fn mandatory(&self, ep: EntryPoint) -> Result<unsafe extern "system" fn(), LayerError> {
        self.lookup(ep).ok_or(LayerError::MissingEntryPoint(ep.name()))
    }
}

/// Reinterpret an untyped proc address as the PFN type of its entry point.
///
/// # Safety
/// `pfn` must have been returned for a name whose signature is `T`.
pub(crate) unsafe fn cast_pfn<T: Copy>(pfn: unsafe extern "system" fn()) -> T {
    debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<unsafe extern "system" fn()>());
    unsafe { std::mem::transmute_copy(&pfn) }
}

/// Declares a typed view over a `DispatchTable`: mandatory entries become
/// plain function pointer fields, optional ones `Option`s. `link` fields are
/// supplied by the loader link rather than looked up.
macro_rules! typed_dispatch {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            link { $($l_field:ident: $l_ty:ty,)* }
            mandatory { $($m_field:ident: $m_ep:ident => $m_pfn:ty,)* }
            optional { $($o_field:ident: $o_ep:ident => $o_pfn:ty,)* }
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            table: DispatchTable,
            $(pub $l_field: $l_ty,)*
            $(pub $m_field: $m_pfn,)*
            $(pub $o_field: Option<$o_pfn>,)*
        }

        impl $name {
            fn from_table(table: DispatchTable, $($l_field: $l_ty,)*) -> Result<Self, LayerError> {
                // SAFETY: each address was resolved by the name of the entry
                // point whose PFN type it is cast to.
                unsafe {
                    Ok(Self {
                        $($l_field,)*
                        $($m_field: cast_pfn(table.mandatory(EntryPoint::$m_ep)?),)*
                        $($o_field: table.lookup(EntryPoint::$o_ep).map(|f| cast_pfn(f)),)*
                        table,
                    })
                }
            }

            pub fn table(&self) -> &DispatchTable {
                &self.table
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("resolved", &self.table.resolved_count())
                    $(.field(stringify!($o_field), &self.$o_field.is_some()))*
                    .finish()
            }
        }
    };
}

typed_dispatch! {
    /// Next-link entry points for one instance and its physical devices.
    pub struct InstanceDispatch {
        link {
            get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
            get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
        }
        mandatory {
            destroy_instance: DestroyInstance => vk::PFN_vkDestroyInstance,
            enumerate_physical_devices: EnumeratePhysicalDevices => vk::PFN_vkEnumeratePhysicalDevices,
            enumerate_device_extension_properties: EnumerateDeviceExtensionProperties => vk::PFN_vkEnumerateDeviceExtensionProperties,
            get_physical_device_properties: GetPhysicalDeviceProperties => vk::PFN_vkGetPhysicalDeviceProperties,
            get_physical_device_features: GetPhysicalDeviceFeatures => vk::PFN_vkGetPhysicalDeviceFeatures,
            create_device: CreateDevice => vk::PFN_vkCreateDevice,
        }
        optional {
            enumerate_physical_device_groups: EnumeratePhysicalDeviceGroups => vk::PFN_vkEnumeratePhysicalDeviceGroups,
            enumerate_device_layer_properties: EnumerateDeviceLayerProperties => vk::PFN_vkEnumerateDeviceLayerProperties,
            get_physical_device_features2: GetPhysicalDeviceFeatures2 => vk::PFN_vkGetPhysicalDeviceFeatures2,
            get_physical_device_tool_properties: GetPhysicalDeviceToolProperties => vk::PFN_vkGetPhysicalDeviceToolProperties,
        }
    }
}

impl InstanceDispatch {
    /// Build the table for `instance` from the next link's
    /// `vkGetInstanceProcAddr`.
    ///
    /// # Safety
    /// `next_gipa` must be the next link's function and `instance` a handle
    /// it just created.
    pub unsafe fn load(
        instance: vk::Instance,
        next_gipa: vk::PFN_vkGetInstanceProcAddr,
        next_gpdpa: Option<PFN_GetPhysicalDeviceProcAddr>,
    ) -> Result<Self, LayerError> {
        let table = DispatchTable::build(Level::Instance, |name| unsafe {
            next_gipa(instance, name.as_ptr())
        })?;
        debug!(
            instance = format_args!("{:#x}", instance.as_raw()),
            resolved = table.resolved_count(),
            "instance dispatch table built"
        );
        Self::from_table(table, next_gipa, next_gpdpa)
    }
}

typed_dispatch! {
    /// Next-link entry points for one device and its queues and command buffers.
    pub struct DeviceDispatch {
        link {
            get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
        }
        mandatory {
            destroy_device: DestroyDevice => vk::PFN_vkDestroyDevice,
            get_device_queue: GetDeviceQueue => vk::PFN_vkGetDeviceQueue,
            create_command_pool: CreateCommandPool => vk::PFN_vkCreateCommandPool,
            destroy_command_pool: DestroyCommandPool => vk::PFN_vkDestroyCommandPool,
            reset_command_pool: ResetCommandPool => vk::PFN_vkResetCommandPool,
            allocate_command_buffers: AllocateCommandBuffers => vk::PFN_vkAllocateCommandBuffers,
            free_command_buffers: FreeCommandBuffers => vk::PFN_vkFreeCommandBuffers,
            begin_command_buffer: BeginCommandBuffer => vk::PFN_vkBeginCommandBuffer,
            end_command_buffer: EndCommandBuffer => vk::PFN_vkEndCommandBuffer,
            reset_command_buffer: ResetCommandBuffer => vk::PFN_vkResetCommandBuffer,
            queue_submit: QueueSubmit => vk::PFN_vkQueueSubmit,
            cmd_pipeline_barrier: CmdPipelineBarrier => vk::PFN_vkCmdPipelineBarrier,
            cmd_set_event: CmdSetEvent => vk::PFN_vkCmdSetEvent,
            cmd_reset_event: CmdResetEvent => vk::PFN_vkCmdResetEvent,
            cmd_wait_events: CmdWaitEvents => vk::PFN_vkCmdWaitEvents,
            cmd_write_timestamp: CmdWriteTimestamp => vk::PFN_vkCmdWriteTimestamp,
        }
        optional {
            get_device_queue2: GetDeviceQueue2 => vk::PFN_vkGetDeviceQueue2,
            trim_command_pool: TrimCommandPool => vk::PFN_vkTrimCommandPool,
            queue_submit2: QueueSubmit2 => vk::PFN_vkQueueSubmit2,
            cmd_pipeline_barrier2: CmdPipelineBarrier2 => vk::PFN_vkCmdPipelineBarrier2,
            cmd_set_event2: CmdSetEvent2 => vk::PFN_vkCmdSetEvent2,
            cmd_reset_event2: CmdResetEvent2 => vk::PFN_vkCmdResetEvent2,
            cmd_wait_events2: CmdWaitEvents2 => vk::PFN_vkCmdWaitEvents2,
            cmd_write_timestamp2: CmdWriteTimestamp2 => vk::PFN_vkCmdWriteTimestamp2,
        }
    }
}

impl DeviceDispatch {
    /// Build the table for `device` from the next link's `vkGetDeviceProcAddr`.
    ///
    /// # Safety
    /// `next_gdpa` must be the next link's function and `device` a handle it
    /// just created.
    pub unsafe fn load(device: vk::Device, next_gdpa: vk::PFN_vkGetDeviceProcAddr) -> Result<Self, LayerError> {
        let table = DispatchTable::build(Level::Device, |name| unsafe { next_gdpa(device, name.as_ptr()) })?;
        debug!(
            device = format_args!("{:#x}", device.as_raw()),
            resolved = table.resolved_count(),
            "device dispatch table built"
        );
        Self::from_table(table, next_gdpa)
    }
}
