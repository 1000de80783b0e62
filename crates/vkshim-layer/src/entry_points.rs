//! Registry-derived metadata for every entry point the engine knows about.
//!
//! Each entry carries its canonical name, the names it was known by before
//! promotion, the object it dispatches on and whether a next link must
//! provide it. Dispatch tables and proc-address resolution are purely
//! mechanical over this list.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::OnceLock;

/// The object an entry point's first parameter identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// No dispatchable parameter (`vkCreateInstance`, global enumeration).
    Global,
    Instance,
    PhysicalDevice,
    Device,
    Queue,
    CommandBuffer,
}

/// Which proc-address query resolves an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Global,
    Instance,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Table construction fails if the next link returns null.
    Mandatory,
    /// Resolves to null when absent; callers check before invoking.
    Optional,
}

impl DispatchKind {
    pub fn level(self) -> Level {
        match self {
            DispatchKind::Global => Level::Global,
            DispatchKind::Instance | DispatchKind::PhysicalDevice => Level::Instance,
            DispatchKind::Device | DispatchKind::Queue | DispatchKind::CommandBuffer => Level::Device,
        }
    }
}

macro_rules! entry_points {
    ($(
        $variant:ident {
            name: $name:expr,
            aliases: [$($alias:expr),* $(,)?],
            dispatch: $dispatch:ident,
            requirement: $requirement:ident $(,)?
        }
    ),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EntryPoint {
            $($variant,)*
        }

        impl EntryPoint {
            pub const ALL: &'static [EntryPoint] = &[$(EntryPoint::$variant,)*];
            pub const COUNT: usize = Self::ALL.len();

            /// Canonical (core, or extension if never promoted) name.
            pub fn name(self) -> &'static CStr {
                match self {
                    $(EntryPoint::$variant => $name,)*
                }
            }

            /// Extension names the function is also reachable by.
            pub fn aliases(self) -> &'static [&'static CStr] {
                match self {
                    $(EntryPoint::$variant => &[$($alias,)*],)*
                }
            }

            pub fn dispatch(self) -> DispatchKind {
                match self {
                    $(EntryPoint::$variant => DispatchKind::$dispatch,)*
                }
            }

            pub fn requirement(self) -> Requirement {
                match self {
                    $(EntryPoint::$variant => Requirement::$requirement,)*
                }
            }
        }
    };
}

entry_points! {
    // Global
    CreateInstance {
        name: c"vkCreateInstance",
        aliases: [],
        dispatch: Global,
        requirement: Optional,
    },
    EnumerateInstanceLayerProperties {
        name: c"vkEnumerateInstanceLayerProperties",
        aliases: [],
        dispatch: Global,
        requirement: Optional,
    },
    EnumerateInstanceExtensionProperties {
        name: c"vkEnumerateInstanceExtensionProperties",
        aliases: [],
        dispatch: Global,
        requirement: Optional,
    },

    // Instance
    GetInstanceProcAddr {
        name: c"vkGetInstanceProcAddr",
        aliases: [],
        dispatch: Instance,
        requirement: Mandatory,
    },
    DestroyInstance {
        name: c"vkDestroyInstance",
        aliases: [],
        dispatch: Instance,
        requirement: Mandatory,
    },
    EnumeratePhysicalDevices {
        name: c"vkEnumeratePhysicalDevices",
        aliases: [],
        dispatch: Instance,
        requirement: Mandatory,
    },
    EnumeratePhysicalDeviceGroups {
        name: c"vkEnumeratePhysicalDeviceGroups",
        aliases: [c"vkEnumeratePhysicalDeviceGroupsKHR"],
        dispatch: Instance,
        requirement: Optional,
    },

    // Physical device
    EnumerateDeviceLayerProperties {
        name: c"vkEnumerateDeviceLayerProperties",
        aliases: [],
        dispatch: PhysicalDevice,
        requirement: Optional,
    },
    EnumerateDeviceExtensionProperties {
        name: c"vkEnumerateDeviceExtensionProperties",
        aliases: [],
        dispatch: PhysicalDevice,
        requirement: Mandatory,
    },
    GetPhysicalDeviceProperties {
        name: c"vkGetPhysicalDeviceProperties",
        aliases: [],
        dispatch: PhysicalDevice,
        requirement: Mandatory,
    },
    GetPhysicalDeviceFeatures {
        name: c"vkGetPhysicalDeviceFeatures",
        aliases: [],
        dispatch: PhysicalDevice,
        requirement: Mandatory,
    },
    GetPhysicalDeviceFeatures2 {
        name: c"vkGetPhysicalDeviceFeatures2",
        aliases: [c"vkGetPhysicalDeviceFeatures2KHR"],
        dispatch: PhysicalDevice,
        requirement: Optional,
    },
    GetPhysicalDeviceToolProperties {
        name: c"vkGetPhysicalDeviceToolProperties",
        aliases: [c"vkGetPhysicalDeviceToolPropertiesEXT"],
        dispatch: PhysicalDevice,
        requirement: Optional,
    },
    CreateDevice {
        name: c"vkCreateDevice",
        aliases: [],
        dispatch: PhysicalDevice,
        requirement: Mandatory,
    },

    // Device
    GetDeviceProcAddr {
        name: c"vkGetDeviceProcAddr",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    DestroyDevice {
        name: c"vkDestroyDevice",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    GetDeviceQueue {
        name: c"vkGetDeviceQueue",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    GetDeviceQueue2 {
        name: c"vkGetDeviceQueue2",
        aliases: [],
        dispatch: Device,
        requirement: Optional,
    },
    CreateCommandPool {
        name: c"vkCreateCommandPool",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    DestroyCommandPool {
        name: c"vkDestroyCommandPool",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    ResetCommandPool {
        name: c"vkResetCommandPool",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    TrimCommandPool {
        name: c"vkTrimCommandPool",
        aliases: [c"vkTrimCommandPoolKHR"],
        dispatch: Device,
        requirement: Optional,
    },
    AllocateCommandBuffers {
        name: c"vkAllocateCommandBuffers",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },
    FreeCommandBuffers {
        name: c"vkFreeCommandBuffers",
        aliases: [],
        dispatch: Device,
        requirement: Mandatory,
    },

    // Command buffer
    BeginCommandBuffer {
        name: c"vkBeginCommandBuffer",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    EndCommandBuffer {
        name: c"vkEndCommandBuffer",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    ResetCommandBuffer {
        name: c"vkResetCommandBuffer",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    CmdPipelineBarrier {
        name: c"vkCmdPipelineBarrier",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    CmdSetEvent {
        name: c"vkCmdSetEvent",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    CmdResetEvent {
        name: c"vkCmdResetEvent",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    CmdWaitEvents {
        name: c"vkCmdWaitEvents",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    CmdWriteTimestamp {
        name: c"vkCmdWriteTimestamp",
        aliases: [],
        dispatch: CommandBuffer,
        requirement: Mandatory,
    },
    CmdPipelineBarrier2 {
        name: c"vkCmdPipelineBarrier2",
        aliases: [c"vkCmdPipelineBarrier2KHR"],
        dispatch: CommandBuffer,
        requirement: Optional,
    },
    CmdSetEvent2 {
        name: c"vkCmdSetEvent2",
        aliases: [c"vkCmdSetEvent2KHR"],
        dispatch: CommandBuffer,
        requirement: Optional,
    },
    CmdResetEvent2 {
        name: c"vkCmdResetEvent2",
        aliases: [c"vkCmdResetEvent2KHR"],
        dispatch: CommandBuffer,
        requirement: Optional,
    },
    CmdWaitEvents2 {
        name: c"vkCmdWaitEvents2",
        aliases: [c"vkCmdWaitEvents2KHR"],
        dispatch: CommandBuffer,
        requirement: Optional,
    },
    CmdWriteTimestamp2 {
        name: c"vkCmdWriteTimestamp2",
        aliases: [c"vkCmdWriteTimestamp2KHR"],
        dispatch: CommandBuffer,
        requirement: Optional,
    },

    // Queue
    QueueSubmit {
        name: c"vkQueueSubmit",
        aliases: [],
        dispatch: Queue,
        requirement: Mandatory,
    },
    QueueSubmit2 {
        name: c"vkQueueSubmit2",
        aliases: [c"vkQueueSubmit2KHR"],
        dispatch: Queue,
        requirement: Optional,
    },
}

impl EntryPoint {
    pub fn level(self) -> Level {
        self.dispatch().level()
    }

    /// Position in per-entry-point arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical name followed by aliases, in resolution order.
    pub fn names(self) -> impl Iterator<Item = &'static CStr> {
        std::iter::once(self.name()).chain(self.aliases().iter().copied())
    }

    /// Look up an entry point by canonical name or alias.
    pub fn from_name(name: &CStr) -> Option<EntryPoint> {
        static BY_NAME: OnceLock<HashMap<&'static CStr, EntryPoint>> = OnceLock::new();
        BY_NAME
            .get_or_init(|| {
                EntryPoint::ALL
                    .iter()
                    .flat_map(|&ep| ep.names().map(move |name| (name, ep)))
                    .collect()
            })
            .get(name)
            .copied()
    }
}
