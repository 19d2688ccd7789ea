//! Overlay session driven by the intercepted frame calls
//!
//! Platform pieces plug in through [`OverlayBackend`] and [`WindowSubclass`];
//! everything else (state machine, message chain, hotkey, input capture)
//! lives here.

mod backend;
pub mod chain;
mod error;
pub mod hotkey;
pub mod input;
mod session;
mod state;

pub use backend::{OverlayBackend, WindowSubclass};
pub use chain::{Disposition, HandlerKey, MessageChain, WindowMessage};
pub use error::OverlayError;
pub use hotkey::{Hotkey, HotkeyTracker, InvalidHotkey, Modifiers};
pub use input::{InputState, MouseButton, MAX_PENDING_CHARS, MAX_PENDING_WHEEL};
pub use session::{FrameOutcome, OverlayRenderSession, SessionOptions, SessionState};
pub use state::RenderStateGuard;
