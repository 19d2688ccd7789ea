//! Logging initialization
//!
//! Injected processes usually have no console, so output goes to
//! `framehook.log` in the base directory when it can be opened.

use std::fs::{File, OpenOptions};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use framehook_core::config::log_path;
use framehook_core::FramehookConfig;

/// Install the global subscriber; later calls are no-ops
pub fn init(config: Option<&FramehookConfig>) {
    let directive = config.map_or("info", FramehookConfig::filter_directive);
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(true);

    let installed = match open_log_file() {
        Some(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_ok() {
        tracing::debug!("Logging initialized with filter '{}'", directive);
    }
}

fn open_log_file() -> Option<File> {
    let path = log_path().ok()?;
    OpenOptions::new().create(true).append(true).open(path).ok()
}
