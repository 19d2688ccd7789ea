//! Detour engine
//!
//! - [`trampoline`] relocates a function prologue into an executable slot
//! - [`detour`] owns one interception and drains in-flight calls on removal
//! - [`manager`] maps logical hook names to their records
//!
//! Raw code writes live in `patch`, slot memory in `alloc`.

mod alloc;
pub mod detour;
pub mod error;
pub mod manager;
mod patch;
pub mod trampoline;

pub use detour::{in_detour, CallGuard, DetourRecord, DetourState};
pub use error::HookError;
pub use manager::{detours, DetourManager, InstallOutcome};
pub use trampoline::Trampoline;
