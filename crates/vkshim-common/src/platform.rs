/// Base name of the layer shared library produced by the `vkshim-layer` crate.
const LAYER_LIBRARY_STEM: &str = "vkshim_layer";

/// Returns the file name of the layer shared library on this platform.
pub fn layer_library_name() -> String {
    #[cfg(windows)]
    {
        format!("{}.dll", LAYER_LIBRARY_STEM)
    }
    #[cfg(target_os = "macos")]
    {
        format!("lib{}.dylib", LAYER_LIBRARY_STEM)
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        format!("lib{}.so", LAYER_LIBRARY_STEM)
    }
}

/// Returns the per-user configuration directory for vkshim, if one can be determined.
pub fn user_config_dir() -> Option<String> {
    #[cfg(unix)]
    {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            return Some(format!("{}/vkshim", dir));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| format!("{}/.config/vkshim", home))
    }
    #[cfg(windows)]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|dir| format!(r"{}\vkshim", dir))
    }
}

/// Returns the system-wide configuration file path.
pub fn system_config_path() -> String {
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        format!(r"{}\vkshim\vkshim.toml", programdata)
    }
    #[cfg(not(windows))]
    {
        "/etc/vkshim/vkshim.toml".to_string()
    }
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "windows" }
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(target_os = "macos")]
    { "macos" }
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    { "unknown" }
}
