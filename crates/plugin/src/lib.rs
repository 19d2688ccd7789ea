//! framehook module - FFI Layer
//!
//! This crate compiles to the module a launcher maps into the host process.
//! It exports `Load` and `Unload`, initializes logging, and provides the
//! Windows pieces the core drives: host discovery, the Direct3D 9 overlay
//! backend, the window-procedure subclass and the two replacement functions.

pub mod ffi;
mod logging;

#[cfg(windows)]
mod platform;

#[cfg(not(windows))]
mod platform {
    //! Direct3D 9 is only present on Windows

    use framehook_core::{FramehookConfig, LayoutTable, RuntimeError};

    pub fn load(_config: &FramehookConfig, _layouts: &LayoutTable) -> Result<(), RuntimeError> {
        Err(RuntimeError::AddressUnresolved(
            "Direct3D 9 is only available on Windows".to_string(),
        ))
    }

    pub fn unload() -> Result<(), RuntimeError> {
        framehook_core::unload(framehook_core::detours(), || Ok(()))
    }
}
