//! Config path resolution
//!
//! Everything lives in one base directory: `FRAMEHOOK_HOME` when set,
//! otherwise the directory of the host executable the module is loaded
//! into.

use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult};

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "FRAMEHOOK_HOME";

pub const CONFIG_FILE: &str = "framehook.toml";
pub const LOG_FILE: &str = "framehook.log";

/// Returns the framehook base directory.
pub fn framehook_base_dir() -> ConfigResult<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    let exe = std::env::current_exe().map_err(ConfigError::IoError)?;
    exe.parent()
        .map(PathBuf::from)
        .ok_or(ConfigError::NoConfigDirectory)
}

/// Returns the config file path.
///
/// Path: `<base>/framehook.toml`
pub fn config_path() -> ConfigResult<PathBuf> {
    Ok(framehook_base_dir()?.join(CONFIG_FILE))
}

/// Returns the log file path.
///
/// Path: `<base>/framehook.log`
pub fn log_path() -> ConfigResult<PathBuf> {
    Ok(framehook_base_dir()?.join(LOG_FILE))
}

/// Resolve a configured path; relative paths are taken from `base`
pub fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
