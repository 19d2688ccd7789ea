//! Load / Unload orchestration
//!
//! [`load`] goes window → layout → probe + resolve → install both detours →
//! publish the [`RuntimeContext`]. It is all-or-nothing: any failure leaves
//! no detour behind. [`unload`] drains and removes the detours, tears the
//! overlay down, and withdraws the context, attempting every step.

use std::sync::Arc;

use thiserror::Error;

use framehook_engine::{
    install_context, is_loaded, take_context, DispatchTableResolver, ProbeInstance, ResolveError,
    ResolvedSlots, RuntimeContext,
};
use framehook_sdk::{FunctionAddress, WindowHandle, END_SCENE_HOOK, RESET_HOOK};

use crate::config::{ConfigError, FramehookConfig};
use crate::hooks::{in_detour, DetourManager, HookError, InstallOutcome};
use crate::layouts::{LayoutError, LayoutTable};
use crate::overlay::OverlayError;

/// Errors surfaced by [`load`] and [`unload`]
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The host window could not be found
    #[error("Address unresolved: {0}")]
    AddressUnresolved(String),

    #[error("Runtime already loaded")]
    AlreadyLoaded,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

/// Replacement entry points for the two detours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacements {
    pub end_of_frame: FunctionAddress,
    pub reset: FunctionAddress,
}

/// Process-side collaborators of [`load`]
pub trait Host {
    /// Throwaway interface instance, released on drop
    type Probe: ProbeInstance;

    /// Main window owned by the current process
    fn find_main_window(&self) -> Option<WindowHandle>;

    fn window_title(&self, window: WindowHandle) -> Option<String>;

    fn create_probe_instance(&self, window: WindowHandle) -> Result<Self::Probe, ResolveError>;

    /// Called with the resolved originals before anything is patched
    ///
    /// Replacements that find their detour gone call these entries directly.
    fn bind_originals(&self, _slots: &ResolvedSlots) {}

    fn replacements(&self) -> Replacements;
}

/// Install both detours and publish the runtime context
///
/// Fails without installing anything if any step fails.
#[tracing::instrument(skip_all, fields(layout = %config.interface_layout))]
pub fn load<H: Host>(
    host: &H,
    manager: &DetourManager,
    layouts: &LayoutTable,
    config: &FramehookConfig,
) -> Result<Arc<RuntimeContext>, RuntimeError> {
    if is_loaded() {
        return Err(RuntimeError::AlreadyLoaded);
    }

    let window = host.find_main_window().ok_or_else(|| {
        RuntimeError::AddressUnresolved("no main window owned by this process".to_string())
    })?;
    let title = host.window_title(window).unwrap_or_default();
    tracing::info!("Found window {} \"{}\"", window, title);

    let offsets = layouts.get(&config.interface_layout)?;
    let resolver = DispatchTableResolver::new(&config.interface_layout, offsets);
    let probe = host.create_probe_instance(window)?;
    let slots = resolver.resolve_probe(probe)?;

    host.bind_originals(&slots);
    let installed = install_detours(manager, &slots, &host.replacements())?;

    let ctx = RuntimeContext::new(window, title, &config.interface_layout, slots);
    match install_context(ctx) {
        Ok(ctx) => {
            tracing::info!("Loaded on window {} ({} detours)", window, installed.len());
            Ok(ctx)
        }
        Err(reason) => {
            tracing::error!("{}", reason);
            rollback(manager, &installed);
            Err(RuntimeError::AlreadyLoaded)
        }
    }
}

/// Remove every detour, tear the overlay down, and withdraw the context
///
/// `teardown` runs after the detours drained, so no intercepted call is in
/// flight when it does. Every step is attempted; the first error is
/// returned.
#[tracing::instrument(skip_all)]
pub fn unload<F>(manager: &DetourManager, teardown: F) -> Result<(), RuntimeError>
where
    F: FnOnce() -> Result<(), OverlayError>,
{
    if in_detour() {
        return Err(HookError::WouldDeadlock("unload".to_string()).into());
    }

    let mut first_error: Option<RuntimeError> = None;

    if let Err(e) = manager.remove_all() {
        tracing::error!("Failed to remove detours: {}", e);
        first_error.get_or_insert(e.into());
    }

    if let Err(e) = teardown() {
        tracing::error!("Overlay teardown failed: {}", e);
        first_error.get_or_insert(e.into());
    }

    match take_context() {
        Some(ctx) => tracing::info!("Unloaded from window {}", ctx.window),
        None => tracing::debug!("No runtime context to release"),
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn install_detours(
    manager: &DetourManager,
    slots: &ResolvedSlots,
    replacements: &Replacements,
) -> Result<Vec<&'static str>, HookError> {
    let mut installed = Vec::with_capacity(2);

    for (name, original, replacement) in [
        (END_SCENE_HOOK, slots.end_of_frame, replacements.end_of_frame),
        (RESET_HOOK, slots.reset, replacements.reset),
    ] {
        // SAFETY: `original` was validated executable by the resolver and the
        // host's replacements share its signature
        match unsafe { manager.install_named(name, original, replacement) } {
            Ok(InstallOutcome::Installed) => installed.push(name),
            Ok(InstallOutcome::AlreadyPresent) => {}
            Err(e) => {
                tracing::error!("Failed to install '{}' on {}: {}", name, original, e);
                rollback(manager, &installed);
                return Err(e);
            }
        }
    }

    Ok(installed)
}

fn rollback(manager: &DetourManager, installed: &[&str]) {
    for name in installed {
        match manager.remove_named(name) {
            Ok(()) => tracing::info!("Rolled back detour '{}'", name),
            Err(e) => tracing::error!("Failed to roll back detour '{}': {}", name, e),
        }
    }
}
