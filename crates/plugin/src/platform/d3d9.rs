//! Replacement functions for `IDirect3DDevice9::EndScene` and `Reset`
//!
//! Both bracket their work with a call guard and forward through the
//! trampoline. A call that arrives while the detour is being removed finds
//! no guard and goes straight to the original entry, which is already
//! restored by then.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use framehook_core::{detours, FrameOutcome};
use framehook_engine::ResolvedSlots;
use framehook_sdk::{
    D3DPresentParameters, EndSceneFn, HResult, IDirect3DDevice9, ResetFn, END_SCENE_HOOK,
    RESET_HOOK,
};

use super::with_session;

static END_SCENE_ORIGINAL: AtomicUsize = AtomicUsize::new(0);
static RESET_ORIGINAL: AtomicUsize = AtomicUsize::new(0);

/// Remember the original entries for the guard-less path
pub fn bind_originals(slots: &ResolvedSlots) {
    END_SCENE_ORIGINAL.store(slots.end_of_frame.as_usize(), Ordering::SeqCst);
    RESET_ORIGINAL.store(slots.reset.as_usize(), Ordering::SeqCst);
}

/// Detour for `IDirect3DDevice9::EndScene`
pub unsafe extern "system" fn end_scene(this: *mut IDirect3DDevice9) -> HResult {
    let Some(guard) = detours().enter(END_SCENE_HOOK) else {
        return call_original_end_scene(this);
    };

    let frame = catch_unwind(AssertUnwindSafe(|| {
        with_session(|session| session.on_end_of_frame(this as *mut c_void))
    }));
    match frame {
        Ok(Some(FrameOutcome::Drawn | FrameOutcome::Hidden)) => {}
        Ok(Some(outcome)) => tracing::trace!("EndScene overlay frame: {:?}", outcome),
        Ok(None) => tracing::trace!("EndScene without a session"),
        Err(_) => tracing::error!("Panic in overlay frame"),
    }

    let original: EndSceneFn = guard.original();
    original(this)
}

/// Detour for `IDirect3DDevice9::Reset`
///
/// Device resources are released before the original reset runs.
pub unsafe extern "system" fn reset(
    this: *mut IDirect3DDevice9,
    params: *mut D3DPresentParameters,
) -> HResult {
    let Some(guard) = detours().enter(RESET_HOOK) else {
        return call_original_reset(this, params);
    };

    match catch_unwind(AssertUnwindSafe(|| with_session(|session| session.on_reset()))) {
        Ok(Some(state)) => tracing::debug!("Reset: overlay {}", state),
        Ok(None) => {}
        Err(_) => tracing::error!("Panic while invalidating overlay"),
    }

    let original: ResetFn = guard.original();
    original(this, params)
}

unsafe fn call_original_end_scene(this: *mut IDirect3DDevice9) -> HResult {
    let address = END_SCENE_ORIGINAL.load(Ordering::SeqCst);
    // Bound before either detour is installed
    let original: EndSceneFn = std::mem::transmute::<usize, EndSceneFn>(address);
    original(this)
}

unsafe fn call_original_reset(
    this: *mut IDirect3DDevice9,
    params: *mut D3DPresentParameters,
) -> HResult {
    let address = RESET_ORIGINAL.load(Ordering::SeqCst);
    let original: ResetFn = std::mem::transmute::<usize, ResetFn>(address);
    original(this, params)
}
