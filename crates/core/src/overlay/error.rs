//! Error type for the overlay render session

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// Render state could not be captured, set or restored for a frame
    #[error("Render state failure: {0}")]
    RenderStateFailure(String),

    /// The device is lost or about to be reset
    #[error("Device lost")]
    DeviceLost,

    #[error("Overlay initialization failed: {0}")]
    Init(String),

    /// Binding or unbinding the window procedure failed
    #[error("Window binding failed: {0}")]
    Window(String),

    #[error("Draw failed: {0}")]
    Draw(String),
}
