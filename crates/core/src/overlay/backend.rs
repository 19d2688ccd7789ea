//! Seams between the session state machine and the platform
//!
//! [`OverlayBackend`] is the renderer, [`WindowSubclass`] is the window
//! procedure swap. Both are implemented for Direct3D 9 / Win32 by the
//! plugin and by recording fakes in tests.

use framehook_sdk::WindowHandle;

use super::error::OverlayError;

/// Renderer driven once per intercepted end-of-frame call
pub trait OverlayBackend {
    /// Handle of the device passed to the intercepted call
    type Device: Copy;

    /// Render state captured before the overlay draws
    type Snapshot;

    /// Window the device presents to
    fn window_for(&mut self, device: Self::Device) -> Result<WindowHandle, OverlayError>;

    /// Fails with [`OverlayError::DeviceLost`] when the frame must be skipped
    fn device_ready(&mut self, device: Self::Device) -> Result<(), OverlayError>;

    /// Create device resources
    fn init(&mut self, device: Self::Device, window: WindowHandle) -> Result<(), OverlayError>;

    fn capture_state(&mut self, device: Self::Device) -> Result<Self::Snapshot, OverlayError>;

    /// Fixed configuration required to draw 2-D overlay content
    fn apply_baseline(
        &mut self,
        device: Self::Device,
        window: WindowHandle,
    ) -> Result<(), OverlayError>;

    fn draw(&mut self, device: Self::Device) -> Result<(), OverlayError>;

    fn restore_state(
        &mut self,
        device: Self::Device,
        snapshot: Self::Snapshot,
    ) -> Result<(), OverlayError>;

    /// Release device resources ahead of a device reset
    fn invalidate(&mut self);

    /// Release everything for good
    fn shutdown(&mut self);
}

/// Window-procedure subclassing for the bound window
///
/// The installed procedure routes every message through the session's
/// message chain, ending at the original procedure saved here.
pub trait WindowSubclass {
    fn install(&mut self, window: WindowHandle) -> Result<(), OverlayError>;

    /// Put the original procedure back
    fn uninstall(&mut self) -> Result<(), OverlayError>;

    fn is_installed(&self) -> bool;
}
