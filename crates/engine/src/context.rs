//! Process-wide runtime context
//!
//! Published once a load succeeds and taken back on unload. Unlike a
//! one-shot global the slot can be refilled, so load → unload → load works
//! within the same process.

use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::RwLock;

use framehook_sdk::WindowHandle;

use crate::resolver::ResolvedSlots;

/// State of a loaded session shared by the detours and the unload path
#[derive(Debug)]
pub struct RuntimeContext {
    /// Main window of the host process
    pub window: WindowHandle,

    /// Title of the main window at load time
    pub window_title: String,

    /// Interface layout the slots were resolved with
    pub layout: String,

    /// Addresses the detours were installed on
    pub slots: ResolvedSlots,

    /// Thread that ran the load
    pub loaded_on: ThreadId,
}

impl RuntimeContext {
    /// Create a context stamped with the calling thread
    pub fn new(
        window: WindowHandle,
        window_title: impl Into<String>,
        layout: impl Into<String>,
        slots: ResolvedSlots,
    ) -> Self {
        Self {
            window,
            window_title: window_title.into(),
            layout: layout.into(),
            slots,
            loaded_on: std::thread::current().id(),
        }
    }

    /// Check if the caller is the thread that ran the load
    pub fn is_loader_thread(&self) -> bool {
        std::thread::current().id() == self.loaded_on
    }
}

static CONTEXT: RwLock<Option<Arc<RuntimeContext>>> = RwLock::new(None);

/// Publish the context
///
/// Fails if a session is already loaded.
pub fn install_context(ctx: RuntimeContext) -> Result<Arc<RuntimeContext>, &'static str> {
    let mut slot = CONTEXT.write();
    if slot.is_some() {
        return Err("Runtime already loaded");
    }

    let ctx = Arc::new(ctx);
    *slot = Some(ctx.clone());
    Ok(ctx)
}

/// Get the current context
///
/// Returns `None` when nothing is loaded; see [`try_context`].
pub fn context() -> Option<Arc<RuntimeContext>> {
    CONTEXT.read().clone()
}

/// Get the current context without blocking on a concurrent load/unload
pub fn try_context() -> Option<Arc<RuntimeContext>> {
    CONTEXT.try_read().and_then(|guard| guard.clone())
}

pub fn is_loaded() -> bool {
    CONTEXT.read().is_some()
}

/// Withdraw the context, returning it if one was published
pub fn take_context() -> Option<Arc<RuntimeContext>> {
    CONTEXT.write().take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use framehook_sdk::{Abi, FunctionAddress};

    fn sample() -> RuntimeContext {
        let slots = ResolvedSlots {
            table: 0x1000,
            end_of_frame: FunctionAddress::new(0x2000, Abi::system(1)),
            reset: FunctionAddress::new(0x3000, Abi::system(2)),
        };
        RuntimeContext::new(WindowHandle(0x10), "Sample Window", "d3d9", slots)
    }

    // One test drives the whole lifecycle since the slot is process-wide
    #[test]
    fn test_context_lifecycle() {
        assert!(take_context().is_none());
        assert!(!is_loaded());
        assert!(context().is_none());

        let ctx = install_context(sample()).unwrap();
        assert!(ctx.is_loader_thread());
        assert!(is_loaded());
        assert_eq!(context().unwrap().window_title, "Sample Window");
        assert_eq!(try_context().unwrap().layout, "d3d9");

        assert!(install_context(sample()).is_err());

        let taken = take_context().unwrap();
        assert_eq!(taken.window, WindowHandle(0x10));
        assert!(!is_loaded());

        // Reload after unload
        install_context(sample()).unwrap();
        assert!(is_loaded());
        take_context();
    }
}
