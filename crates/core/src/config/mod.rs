//! Configuration for framehook
//!
//! A single TOML file, `framehook.toml`, in the base directory. A missing
//! file is created with the defaults on first load.
//!
//! ```toml
//! version = 1
//! debug = false
//! log_filter = "info"
//! toggle_hotkey = "shift+f9"
//! start_visible = true
//! interface_layout = "d3d9"
//! # layouts_file = "layouts.json"
//! ```

mod loader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use framehook_sdk::layouts::DEFAULT_LAYOUT;

use crate::layouts::{LayoutError, LayoutTable};
use crate::overlay::{Hotkey, InvalidHotkey};

pub use loader::{
    config_path, framehook_base_dir, log_path, resolve_relative, CONFIG_FILE, HOME_ENV, LOG_FILE,
};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid toggle_hotkey: {0}")]
    Hotkey(#[from] InvalidHotkey),

    #[error("Failed to load layouts: {0}")]
    Layouts(#[from] LayoutError),

    /// Could not determine the base directory
    #[error("Config directory not available - could not resolve base path")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Framehook configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramehookConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// `RUST_LOG`-style filter; overrides `debug` when set
    pub log_filter: Option<String>,

    /// Visibility toggle, e.g. `"shift+f9"`
    pub toggle_hotkey: String,

    pub start_visible: bool,

    /// Interface version identifier used to pick slot indices
    pub interface_layout: String,

    /// Extra layouts (JSON), relative to the base directory
    pub layouts_file: Option<PathBuf>,
}

impl Default for FramehookConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            log_filter: None,
            toggle_hotkey: Hotkey::default().to_string(),
            start_visible: true,
            interface_layout: DEFAULT_LAYOUT.to_string(),
            layouts_file: None,
        }
    }
}

impl FramehookConfig {
    /// Load config from the base directory, creating the default if missing.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(config_path()?)
    }

    /// Load config from `path`, creating the default if missing.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.hotkey()?;
            tracing::debug!("Loaded config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to the base directory.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(config_path()?)
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reload config from `path`.
    pub fn reload_from<P: AsRef<Path>>(&mut self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.hotkey()?;
        *self = config;
        tracing::debug!("Reloaded config from {:?}", path);
        Ok(())
    }

    /// Parsed toggle hotkey
    pub fn hotkey(&self) -> Result<Hotkey, InvalidHotkey> {
        self.toggle_hotkey.parse()
    }

    /// Log filter directive
    pub fn filter_directive(&self) -> &str {
        match &self.log_filter {
            Some(filter) if !filter.trim().is_empty() => filter,
            _ if self.debug => "debug",
            _ => "info",
        }
    }

    /// Built-in layouts plus `layouts_file`, resolved against `base`
    pub fn layout_table(&self, base: &Path) -> ConfigResult<LayoutTable> {
        match &self.layouts_file {
            Some(file) => Ok(LayoutTable::load_file(resolve_relative(base, file))?),
            None => Ok(LayoutTable::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::hotkey::vk;
    use crate::overlay::Modifiers;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "framehook-config-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_default_config() {
        let config = FramehookConfig::default();
        assert_eq!(config.version, 1);
        assert!(!config.debug);
        assert!(config.start_visible);
        assert_eq!(config.interface_layout, "d3d9");
        assert_eq!(config.hotkey().unwrap(), Hotkey::new(Modifiers::SHIFT, vk::F9));
        assert_eq!(config.filter_directive(), "info");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: FramehookConfig = toml::from_str(
            r#"
            debug = true
            toggle_hotkey = "ctrl+alt+insert"
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.filter_directive(), "debug");
        assert_eq!(
            config.hotkey().unwrap(),
            Hotkey::new(Modifiers::CTRL | Modifiers::ALT, vk::INSERT)
        );
        assert_eq!(config.interface_layout, "d3d9");
    }

    #[test]
    fn test_log_filter_wins_over_debug() {
        let config = FramehookConfig {
            debug: true,
            log_filter: Some("framehook_core=trace".to_string()),
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "framehook_core=trace");
    }

    #[test]
    fn test_load_creates_default_then_reads_it() {
        let dir = scratch_dir("create");
        let path = dir.join(CONFIG_FILE);

        let created = FramehookConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, FramehookConfig::default());

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("toggle_hotkey = \"shift+f9\""));

        let mut edited = created.clone();
        edited.start_visible = false;
        edited.save_to(&path).unwrap();

        let mut reloaded = created;
        reloaded.reload_from(&path).unwrap();
        assert!(!reloaded.start_visible);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_hotkey_rejected() {
        let dir = scratch_dir("hotkey");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, "toggle_hotkey = \"shift+banana\"\n").unwrap();

        assert!(matches!(
            FramehookConfig::load_from(&path),
            Err(ConfigError::Hotkey(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_layout_table_from_relative_file() {
        let dir = scratch_dir("layouts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("layouts.json"),
            r#"{ "d3d9-custom": { "offsets": { "end_of_frame": 50, "reset": 20 } } }"#,
        )
        .unwrap();

        let config = FramehookConfig {
            layouts_file: Some(PathBuf::from("layouts.json")),
            ..Default::default()
        };
        let table = config.layout_table(&dir).unwrap();
        assert_eq!(table.get("d3d9-custom").unwrap().end_of_frame_slot, 50);
        assert!(table.contains("d3d9"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
