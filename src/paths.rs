use std::path::PathBuf;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "NGSI_CONFIG";

/// Best-effort home directory resolution.
///
/// We prefer `dirs::home_dir()`, but that can return `None` in some service/test
/// environments. In those cases, fall back to common environment variables.
pub fn user_home_dir() -> Option<PathBuf> {
    dirs::home_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
}

/// Configuration file named by `NGSI_CONFIG`, if set. An empty value is kept and selects the
/// in-memory registry.
pub fn config_file_override() -> Option<String> {
    std::env::var_os(CONFIG_ENV).map(|v| v.to_string_lossy().into_owned())
}
