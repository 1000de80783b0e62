//! Pluggable extension emulation.
//!
//! Each module emulates one extension. Whether a module applies to a
//! physical device is probed once, when that physical device is first seen,
//! and cached on its record; a device resolves its handlers once at
//! creation. Nothing on the call path re-probes.

pub mod synchronization2;
pub mod tooling_info;

use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use tracing::debug;
use vkshim_core::config::ModulesConfig;
use vkshim_core::{ApiVersion, ExtensionSet};

use crate::entry_points::EntryPoint;
use crate::error::LayerError;
use crate::records::{DeviceRecord, PhysicalDeviceRecord};

/// What the next link reports for a physical device.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub api_version: ApiVersion,
    pub driver_version: u32,
    pub device_name: String,
    pub extensions: ExtensionSet,
}

impl DeviceCapabilities {
    /// Whether the next link provides `extension` itself, directly or
    /// through promotion to core.
    pub fn supports_extension(&self, extension: &CStr) -> bool {
        self.extensions.is_available(extension, self.api_version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleScope {
    /// Active on devices that enable the module's extension.
    Device,
    /// Active on every physical device it supports; no opt-in.
    PhysicalDevice,
}

/// One intercepted call, with its dispatchable object already resolved.
pub enum Call<'a> {
    CmdPipelineBarrier2 {
        device: &'a DeviceRecord,
        command_buffer: vk::CommandBuffer,
        dependency_info: &'a vk::DependencyInfo<'a>,
    },
    CmdSetEvent2 {
        device: &'a DeviceRecord,
        command_buffer: vk::CommandBuffer,
        event: vk::Event,
        dependency_info: &'a vk::DependencyInfo<'a>,
    },
    CmdResetEvent2 {
        device: &'a DeviceRecord,
        command_buffer: vk::CommandBuffer,
        event: vk::Event,
        stage_mask: vk::PipelineStageFlags2,
    },
    CmdWaitEvents2 {
        device: &'a DeviceRecord,
        command_buffer: vk::CommandBuffer,
        events: &'a [vk::Event],
        dependency_infos: &'a [vk::DependencyInfo<'a>],
    },
    CmdWriteTimestamp2 {
        device: &'a DeviceRecord,
        command_buffer: vk::CommandBuffer,
        stage: vk::PipelineStageFlags2,
        query_pool: vk::QueryPool,
        query: u32,
    },
    QueueSubmit2 {
        device: &'a DeviceRecord,
        queue: vk::Queue,
        submits: &'a [vk::SubmitInfo2<'a>],
        fence: vk::Fence,
    },
    GetPhysicalDeviceToolProperties {
        physical_device: &'a PhysicalDeviceRecord,
        count: *mut u32,
        properties: *mut vk::PhysicalDeviceToolProperties<'static>,
    },
}

impl Call<'_> {
    pub fn entry_point(&self) -> EntryPoint {
        match self {
            Call::CmdPipelineBarrier2 { .. } => EntryPoint::CmdPipelineBarrier2,
            Call::CmdSetEvent2 { .. } => EntryPoint::CmdSetEvent2,
            Call::CmdResetEvent2 { .. } => EntryPoint::CmdResetEvent2,
            Call::CmdWaitEvents2 { .. } => EntryPoint::CmdWaitEvents2,
            Call::CmdWriteTimestamp2 { .. } => EntryPoint::CmdWriteTimestamp2,
            Call::QueueSubmit2 { .. } => EntryPoint::QueueSubmit2,
            Call::GetPhysicalDeviceToolProperties { .. } => EntryPoint::GetPhysicalDeviceToolProperties,
        }
    }
}

pub struct CallContext<'a> {
    pub call: Call<'a>,
}

impl<'a> CallContext<'a> {
    pub fn new(call: Call<'a>) -> Self {
        Self { call }
    }

    pub fn entry_point(&self) -> EntryPoint {
        self.call.entry_point()
    }
}

pub trait EmulationModule: Send + Sync {
    /// Stable identifier, also the key of the module's `ModuleData` slots.
    fn name(&self) -> &'static str;

    /// The extension this module provides.
    fn extension(&self) -> &'static CStr;

    fn spec_version(&self) -> u32;

    fn scope(&self) -> ModuleScope;

    /// Higher precedence wins an entry point shared with other modules.
    fn precedence(&self) -> i32 {
        0
    }

    /// Entry points this module handles once active.
    fn entry_points(&self) -> &'static [EntryPoint];

    /// Whether the module should emulate on hardware with `caps`.
    fn supports(&self, caps: &DeviceCapabilities) -> bool;

    /// Whether a `pNext` struct of `s_type` describes this module's feature
    /// and so must not reach a next link that does not know it.
    fn owns_feature_struct(&self, _s_type: vk::StructureType) -> bool {
        false
    }

    /// Rewrite the feature structs in a `vkGetPhysicalDeviceFeatures2` chain.
    ///
    /// # Safety
    /// `features` must head a valid, writable structure chain.
    unsafe fn patch_features(&self, _features: *mut vk::PhysicalDeviceFeatures2<'_>) {}

    /// Called once the device exists, with the application's create info.
    fn on_device_created(
        &self,
        _device: &DeviceRecord,
        _create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<(), LayerError> {
        Ok(())
    }

    /// Execute an intercepted call.
    ///
    /// # Safety
    /// Pointers inside `ctx.call` come straight from the application and
    /// must satisfy the entry point's valid-usage rules.
    unsafe fn on_intercepted_call(&self, ctx: &mut CallContext<'_>) -> vk::Result;
}

/// Per-entry-point handlers for one physical device or device.
#[derive(Clone)]
pub struct ActiveModules {
    handlers: Vec<Option<Arc<dyn EmulationModule>>>,
    modules: Vec<Arc<dyn EmulationModule>>,
}

impl ActiveModules {
    pub fn none() -> Self {
        Self {
            handlers: vec![None; EntryPoint::COUNT],
            modules: Vec::new(),
        }
    }

    /// The module that handles `ep`, if any. A single indexed load.
    pub fn handler(&self, ep: EntryPoint) -> Option<&Arc<dyn EmulationModule>> {
        self.handlers[ep.index()].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EmulationModule>> {
        self.modules.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ActiveModules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules.iter().map(|m| m.name())).finish()
    }
}

struct Registered {
    module: Arc<dyn EmulationModule>,
    probes: AtomicU64,
}

/// All known modules, in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Registered>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the modules shipped with the layer.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(synchronization2::Synchronization2));
        registry.register(Arc::new(tooling_info::ToolingInfo));
        registry
    }

    pub fn register(&mut self, module: Arc<dyn EmulationModule>) {
        debug!(module = module.name(), "registered emulation module");
        self.modules.push(Registered {
            module,
            probes: AtomicU64::new(0),
        });
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<dyn EmulationModule>> {
        self.modules.iter().map(|r| &r.module)
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn EmulationModule>> {
        self.modules().find(|m| m.name() == name)
    }

    /// Whether any module not disabled by `config` handles `ep`.
    pub fn provides(&self, ep: EntryPoint, config: &ModulesConfig) -> bool {
        self.modules()
            .filter(|m| !config.is_disabled(&m.extension().to_string_lossy()))
            .any(|m| m.entry_points().contains(&ep))
    }

    /// How many times `supports` was asked of the named module.
    pub fn probe_count(&self, name: &str) -> u64 {
        self.modules
            .iter()
            .find(|r| r.module.name() == name)
            .map_or(0, |r| r.probes.load(Ordering::Relaxed))
    }

    /// Modules applicable to hardware with `caps`: enabled in `config`, and
    /// either forced on or reporting `supports`. Registration order is kept.
    pub fn applicable(&self, caps: &DeviceCapabilities, config: &ModulesConfig) -> Vec<Arc<dyn EmulationModule>> {
        let mut applicable = Vec::new();
        for registered in &self.modules {
            let module = &registered.module;
            let extension = module.extension().to_string_lossy();
            if config.is_disabled(&extension) {
                continue;
            }
            let active = if config.is_forced(&extension) {
                true
            } else {
                registered.probes.fetch_add(1, Ordering::Relaxed);
                module.supports(caps)
            };
            debug!(
                module = module.name(),
                device = %caps.device_name,
                active,
                "probed emulation module"
            );
            if active {
                applicable.push(Arc::clone(module));
            }
        }
        applicable
    }

    /// Build the handler array for `active`. The highest precedence wins
    /// each entry point; among equals the module registered last wins.
    pub fn resolve(&self, active: &[Arc<dyn EmulationModule>]) -> ActiveModules {
        let mut ordered: Vec<(usize, &Arc<dyn EmulationModule>)> = active
            .iter()
            .map(|m| {
                let position = self
                    .modules
                    .iter()
                    .position(|r| r.module.name() == m.name())
                    .unwrap_or(usize::MAX);
                (position, m)
            })
            .collect();
        ordered.sort_by_key(|(position, _)| *position);

        let mut resolved = ActiveModules::none();
        for (_, module) in ordered {
            for ep in module.entry_points() {
                let slot = &mut resolved.handlers[ep.index()];
                let replace = match slot {
                    Some(current) => module.precedence() >= current.precedence(),
                    None => true,
                };
                if replace {
                    *slot = Some(Arc::clone(module));
                }
            }
            resolved.modules.push(Arc::clone(module));
        }
        resolved
    }
}

/// Find the first struct of `s_type` in an output chain.
///
/// # Safety
/// `head` must be null or the head of a valid structure chain.
pub(crate) unsafe fn find_in_chain(head: *mut c_void, s_type: vk::StructureType) -> *mut vk::BaseOutStructure<'static> {
    let mut current = head as *mut vk::BaseOutStructure<'static>;
    while !current.is_null() {
        if unsafe { (*current).s_type } == s_type {
            return current;
        }
        current = unsafe { (*current).p_next };
    }
    std::ptr::null_mut()
}
