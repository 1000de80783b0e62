//! Loader JSON manifest describing this layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vkshim_core::ApiVersion;

use crate::emulation::ModuleRegistry;
use crate::{LAYER_DESCRIPTION, LAYER_IMPLEMENTATION_VERSION, LAYER_NAME};

pub const FILE_FORMAT_VERSION: &str = "1.2.0";
/// Setting this variable to `1` makes the loader skip the layer.
pub const DISABLE_ENV: &str = "VKSHIM_DISABLE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerManifest {
    pub file_format_version: String,
    pub layer: ManifestLayer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    pub library_path: String,
    pub api_version: String,
    pub implementation_version: String,
    pub description: String,
    pub functions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_extensions: Vec<ManifestExtension>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disable_environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestExtension {
    pub name: String,
    pub spec_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoints: Vec<String>,
}

impl LayerManifest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Build the manifest for a layer library at `library_path` exposing the
/// modules in `registry`.
pub fn build_manifest(registry: &ModuleRegistry, library_path: &str, api_version: ApiVersion) -> LayerManifest {
    let device_extensions = registry
        .modules()
        .map(|module| ManifestExtension {
            name: module.extension().to_string_lossy().into_owned(),
            spec_version: module.spec_version().to_string(),
            entrypoints: module
                .entry_points()
                .iter()
                .flat_map(|ep| ep.names())
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
        })
        .collect();

    let mut functions = BTreeMap::new();
    functions.insert(
        "vkNegotiateLoaderLayerInterfaceVersion".to_string(),
        "vkNegotiateLoaderLayerInterfaceVersion".to_string(),
    );

    let mut disable_environment = BTreeMap::new();
    disable_environment.insert(DISABLE_ENV.to_string(), "1".to_string());

    LayerManifest {
        file_format_version: FILE_FORMAT_VERSION.to_string(),
        layer: ManifestLayer {
            name: LAYER_NAME.to_string_lossy().into_owned(),
            layer_type: "GLOBAL".to_string(),
            library_path: library_path.to_string(),
            api_version: api_version.to_string(),
            implementation_version: LAYER_IMPLEMENTATION_VERSION.to_string(),
            description: LAYER_DESCRIPTION.to_string(),
            functions,
            device_extensions,
            disable_environment,
        },
    }
}
