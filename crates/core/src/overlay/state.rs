//! Scoped render-state capture
//!
//! [`RenderStateGuard`] restores the captured state when it goes out of
//! scope, on the error path and during unwinding alike. Call
//! [`RenderStateGuard::finish`] on the success path to observe the restore
//! result instead of only logging it.

use super::backend::OverlayBackend;
use super::error::OverlayError;

pub struct RenderStateGuard<'a, B: OverlayBackend> {
    backend: &'a mut B,
    device: B::Device,
    snapshot: Option<B::Snapshot>,
}

impl<'a, B: OverlayBackend> RenderStateGuard<'a, B> {
    /// Capture the device's current state
    pub fn capture(backend: &'a mut B, device: B::Device) -> Result<Self, OverlayError> {
        let snapshot = backend.capture_state(device)?;
        Ok(Self {
            backend,
            device,
            snapshot: Some(snapshot),
        })
    }

    pub fn backend(&mut self) -> &mut B {
        self.backend
    }

    /// Restore now and report the result
    pub fn finish(mut self) -> Result<(), OverlayError> {
        match self.snapshot.take() {
            Some(snapshot) => self.backend.restore_state(self.device, snapshot),
            None => Ok(()),
        }
    }
}

impl<B: OverlayBackend> Drop for RenderStateGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(e) = self.backend.restore_state(self.device, snapshot) {
                tracing::error!("Failed to restore render state: {}", e);
            }
        }
    }
}
