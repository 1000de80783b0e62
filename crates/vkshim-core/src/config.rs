use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "VKSHIM_CONFIG";

/// File name searched for in the platform config locations.
pub const CONFIG_FILE_NAME: &str = "vkshim.toml";

/// Top-level layer configuration, loaded from vkshim.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter directive used when VKSHIM_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

/// Per-module switches, keyed by the extension name a module emulates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Modules that are never activated
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Modules activated even when the driver supports the extension natively
    #[serde(default)]
    pub force_enable: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl ModulesConfig {
    pub fn is_disabled(&self, extension: &str) -> bool {
        self.disabled.iter().any(|name| name == extension)
    }

    pub fn is_forced(&self, extension: &str) -> bool {
        !self.is_disabled(extension) && self.force_enable.iter().any(|name| name == extension)
    }
}

impl LayerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        let config: LayerConfig = toml::from_str(content)?;
        for name in config.modules.disabled.iter().chain(&config.modules.force_enable) {
            if !name.starts_with("VK_") {
                return Err(CoreError::Config(format!(
                    "module name {name:?} is not a Vulkan extension name"
                )));
            }
        }
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    /// A malformed file is reported and ignored; the layer always loads.
    pub fn load_or_default(path: &str) -> Self {
        if !std::path::Path::new(path).exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring config file {}: {}", path, e);
                Self::default()
            }
        }
    }
}

/// Returns the config file path to use.
/// Search order:
/// 1. `VKSHIM_CONFIG`
/// 2. Per-user config: `$XDG_CONFIG_HOME/vkshim/vkshim.toml` or `~/.config/vkshim/vkshim.toml` (`%APPDATA%\vkshim` on Windows)
/// 3. System-wide config: `/etc/vkshim/vkshim.toml` or `%PROGRAMDATA%\vkshim\vkshim.toml`
/// 4. Local fallback: `./vkshim.toml`
pub fn default_config_path() -> String {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return path;
        }
    }
    if let Some(dir) = vkshim_common::platform::user_config_dir() {
        let user_path = std::path::Path::new(&dir).join(CONFIG_FILE_NAME);
        if user_path.exists() {
            return user_path.to_string_lossy().into_owned();
        }
    }
    let system_path = vkshim_common::platform::system_config_path();
    if std::path::Path::new(&system_path).exists() {
        return system_path;
    }
    CONFIG_FILE_NAME.to_string()
}

fn default_filter() -> String {
    "warn".to_string()
}
