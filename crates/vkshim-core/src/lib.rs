//! Shared building blocks for the vkshim Vulkan layer: handle records,
//! configuration, API-version and extension bookkeeping, `pNext` chain copies.

pub mod api_version;
pub mod chain;
pub mod config;
pub mod cstr;
pub mod error;
pub mod extension;
pub mod handle_map;
pub mod module_data;

pub use api_version::ApiVersion;
pub use error::CoreError;
pub use extension::ExtensionSet;
pub use handle_map::{HandleMap, HandleRecord};
pub use module_data::ModuleData;
