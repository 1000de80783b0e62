//! vkshim Vulkan layer
//!
//! This cdylib is an implicit or explicit Vulkan layer that sits between an
//! application and the next layer or driver. It tracks the objects created
//! through it, forwards every call it does not need to alter, and emulates
//! extensions the driver below does not provide.
//!
//! Only the three loader-facing symbols are exported; every other entry point
//! is handed out through the proc-address queries.

#![allow(non_snake_case)]

use std::ffi::{c_char, CStr};
use std::sync::OnceLock;

use ash::vk;
use tracing::{info, warn};
use vkshim_core::config::{default_config_path, LayerConfig};
use vkshim_core::HandleMap;

/// Resolve a record or return `$on_error` from the enclosing entry point,
/// logging the invalid handle. Nothing is forwarded for an unknown handle.
macro_rules! lookup_or {
    ($lookup:expr, $func:literal, $on_error:expr) => {
        match $lookup {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("{}: {}", $func, e);
                return $on_error;
            }
        }
    };
}

pub mod command;
pub mod device;
pub mod dispatch;
pub mod emulation;
pub mod entry_points;
pub mod error;
pub mod instance;
pub mod loader;
pub mod manifest;
pub mod negotiate;
pub mod properties;
pub mod records;
pub mod trampoline;

pub use error::LayerError;

use emulation::ModuleRegistry;
use loader::{NegotiateLayerInterface, NegotiateLayerStructType};
use negotiate::Negotiator;
use records::{
    CommandBufferState, CommandPoolState, DeviceState, InstanceState, PhysicalDeviceState, QueueState,
};
use trampoline::InterceptTable;

pub const LAYER_NAME: &CStr = c"VK_LAYER_VKSHIM_emulation";
pub const LAYER_DESCRIPTION: &str = "vkshim extension emulation layer";
pub const LAYER_IMPLEMENTATION_VERSION: u32 = 1;

/// Process-wide layer state. Every handle map is sharded; dispatch tables
/// live inside the instance and device records that own them.
pub struct Layer {
    negotiator: Negotiator,
    config: LayerConfig,
    modules: ModuleRegistry,
    intercepts: InterceptTable,
    pub(crate) instances: HandleMap<vk::Instance, InstanceState>,
    pub(crate) physical_devices: HandleMap<vk::PhysicalDevice, PhysicalDeviceState>,
    pub(crate) devices: HandleMap<vk::Device, DeviceState>,
    pub(crate) queues: HandleMap<vk::Queue, QueueState>,
    pub(crate) command_pools: HandleMap<vk::CommandPool, CommandPoolState>,
    pub(crate) command_buffers: HandleMap<vk::CommandBuffer, CommandBufferState>,
}

/// Number of live records per object type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub instances: usize,
    pub physical_devices: usize,
    pub devices: usize,
    pub queues: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
}

impl Layer {
    pub fn new(config: LayerConfig, modules: ModuleRegistry) -> Self {
        Self {
            negotiator: Negotiator::default(),
            config,
            modules,
            intercepts: InterceptTable::new(),
            instances: HandleMap::new("VkInstance"),
            physical_devices: HandleMap::new("VkPhysicalDevice"),
            devices: HandleMap::new("VkDevice"),
            queues: HandleMap::new("VkQueue"),
            command_pools: HandleMap::new("VkCommandPool"),
            command_buffers: HandleMap::new("VkCommandBuffer"),
        }
    }

    /// Load configuration, install logging and register the built-in modules.
    pub fn from_env() -> Self {
        let config_path = default_config_path();
        let config = LayerConfig::load_or_default(&config_path);
        vkshim_common::logging::init_logging(&config.logging.filter);
        info!(
            layer = %LAYER_NAME.to_string_lossy(),
            version = env!("CARGO_PKG_VERSION"),
            config = %config_path,
            "layer loaded"
        );
        Self::new(config, ModuleRegistry::with_builtin())
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn intercepts(&self) -> &InterceptTable {
        &self.intercepts
    }

    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            instances: self.instances.len(),
            physical_devices: self.physical_devices.len(),
            devices: self.devices.len(),
            queues: self.queues.len(),
            command_pools: self.command_pools.len(),
            command_buffers: self.command_buffers.len(),
        }
    }

    /// Whether an application handle of `raw` value is currently tracked for
    /// any object type.
    pub fn is_tracked(&self, raw: u64) -> bool {
        use ash::vk::Handle;
        self.instances.contains(vk::Instance::from_raw(raw))
            || self.physical_devices.contains(vk::PhysicalDevice::from_raw(raw))
            || self.devices.contains(vk::Device::from_raw(raw))
            || self.queues.contains(vk::Queue::from_raw(raw))
            || self.command_pools.contains(vk::CommandPool::from_raw(raw))
            || self.command_buffers.contains(vk::CommandBuffer::from_raw(raw))
    }
}

static LAYER: OnceLock<Layer> = OnceLock::new();

/// The layer singleton, created on first use.
pub fn layer() -> &'static Layer {
    LAYER.get_or_init(Layer::from_env)
}

// ── Loader interface ────────────────────────────────────────

/// Negotiate the loader/layer interface version.
#[no_mangle]
pub unsafe extern "system" fn vkNegotiateLoaderLayerInterfaceVersion(
    p_version_struct: *mut NegotiateLayerInterface,
) -> vk::Result {
    if p_version_struct.is_null() {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }
    let negotiate = unsafe { &mut *p_version_struct };
    if negotiate.s_type != NegotiateLayerStructType::INTERFACE_STRUCT {
        warn!(s_type = negotiate.s_type.0, "unexpected negotiation struct type");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    match layer().negotiator().negotiate(negotiate.loader_layer_interface_version) {
        Ok(version) => {
            negotiate.loader_layer_interface_version = version;
            negotiate.pfn_get_instance_proc_addr = Some(vkGetInstanceProcAddr);
            negotiate.pfn_get_device_proc_addr = Some(vkGetDeviceProcAddr);
            negotiate.pfn_get_physical_device_proc_addr = if version >= 2 {
                Some(trampoline::get_physical_device_proc_addr)
            } else {
                None
            };
            vk::Result::SUCCESS
        }
        Err(e) => e.to_vk_result(),
    }
}

/// Resolve global and instance-level entry points.
#[no_mangle]
pub unsafe extern "system" fn vkGetInstanceProcAddr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    unsafe { trampoline::get_instance_proc_addr(instance, p_name) }
}

/// Resolve device-level entry points.
#[no_mangle]
pub unsafe extern "system" fn vkGetDeviceProcAddr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    unsafe { trampoline::get_device_proc_addr(device, p_name) }
}
