//! Windows / Direct3D 9 glue
//!
//! - [`host`] finds the window and builds the probe device
//! - [`d3d9`] holds the two replacement functions
//! - [`render`] is the overlay backend
//! - [`wndproc`] subclasses the host window

mod d3d9;
mod host;
mod render;
mod wndproc;

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use framehook_core::overlay::MessageChain;
use framehook_core::{
    detours, ConfigError, FramehookConfig, LayoutTable, OverlayRenderSession, RuntimeError,
    SessionOptions,
};

use self::host::Win32Host;
use self::render::Dx9Backend;
use self::wndproc::WndProcSubclass;

type Session = OverlayRenderSession<Dx9Backend, WndProcSubclass>;

/// Overlay session between `Load` and `Unload`
static SESSION: Mutex<Option<Session>> = Mutex::new(None);

/// Message chain the subclassed window procedure dispatches through
static CHAIN: LazyLock<Arc<MessageChain>> = LazyLock::new(|| Arc::new(MessageChain::new()));

pub fn load(config: &FramehookConfig, layouts: &LayoutTable) -> Result<(), RuntimeError> {
    let options = SessionOptions {
        hotkey: config.hotkey().map_err(ConfigError::from)?,
        start_visible: config.start_visible,
        modifiers: Some(wndproc::key_modifiers),
    };

    {
        let mut slot = SESSION.lock();
        if slot.is_some() {
            return Err(RuntimeError::AlreadyLoaded);
        }
        *slot = Some(OverlayRenderSession::new(
            Dx9Backend::new(),
            WndProcSubclass::new(),
            CHAIN.clone(),
            options,
        ));
    }

    match framehook_core::load(&Win32Host, detours(), layouts, config) {
        Ok(ctx) => {
            tracing::info!("Overlay armed for \"{}\"", ctx.window_title);
            Ok(())
        }
        Err(e) => {
            SESSION.lock().take();
            Err(e)
        }
    }
}

pub fn unload() -> Result<(), RuntimeError> {
    framehook_core::unload(detours(), || match SESSION.lock().take() {
        Some(mut session) => session.teardown(),
        None => Ok(()),
    })
}

/// Run `f` on the session if one is loaded
fn with_session<R>(f: impl FnOnce(&mut Session) -> R) -> Option<R> {
    SESSION.lock().as_mut().map(f)
}
