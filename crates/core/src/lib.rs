//! framehook core - Detour Engine and Overlay Session
//!
//! This crate contains everything between the module exports and the
//! platform:
//!
//! - [`hooks`] - Trampolines, detour records and the named detour manager
//! - [`overlay`] - Overlay render session, message chain, hotkey and input
//! - [`layouts`] - Versioned dispatch-table layouts
//! - [`config`] - `framehook.toml`
//! - [`runtime`] - `load` / `unload` orchestration over a [`runtime::Host`]
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - Plain types, interface signatures and built-in layouts
//! - [`engine`] - Dispatch-table resolution and the runtime context

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
compile_error!("framehook only supports x86 and x86_64");

// Re-export SDK and engine crates
pub use framehook_engine as engine;
pub use framehook_sdk as sdk;

pub mod config;
pub mod hooks;
pub mod layouts;
pub mod overlay;
pub mod runtime;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, FramehookConfig};
pub use hooks::{detours, DetourManager, DetourRecord, DetourState, HookError, InstallOutcome};
pub use layouts::{LayoutError, LayoutTable};
pub use overlay::{
    FrameOutcome, OverlayBackend, OverlayError, OverlayRenderSession, SessionOptions,
    SessionState, WindowSubclass,
};
pub use runtime::{load, unload, Host, Replacements, RuntimeError};
