//! framehook Engine - Dispatch-Table Resolution and Runtime Context
//!
//! This crate handles:
//! - Reading function pointers out of a foreign interface's dispatch table
//! - Validating that resolved addresses point at executable code
//! - Storing the per-session [`RuntimeContext`] between `Load` and `Unload`
//!
//! # Architecture
//!
//! All raw vtable arithmetic lives in [`slots`]. The [`resolver`] builds on it
//! to turn an interface instance plus a [`VTableOffsets`] layout into the two
//! detour targets. The result is published as a [`RuntimeContext`] and torn
//! down again at unload.
//!
//! [`VTableOffsets`]: framehook_sdk::VTableOffsets

pub mod context;
pub mod error;
pub mod resolver;
pub mod slots;

pub use context::{
    context, install_context, is_loaded, take_context, try_context, RuntimeContext,
};
pub use error::ResolveError;
pub use resolver::{DispatchTableResolver, ProbeInstance, ResolvedSlots};
pub use slots::ForeignSlots;
