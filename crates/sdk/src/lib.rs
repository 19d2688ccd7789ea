//! framehook SDK - Plain Type Definitions
//!
//! This crate contains the types shared by every other framehook crate.
//! It has no dependencies and compiles quickly, allowing parallel compilation
//! of dependent crates.
//!
//! # Modules
//!
//! - [`address`] - Untyped function addresses with a calling-convention tag
//! - [`interfaces`] - Opaque rendering interface types and detour signatures
//! - [`layouts`] - Dispatch-table slot layouts keyed by interface version

pub mod address;
pub mod interfaces;
pub mod layouts;

pub use address::{Abi, Convention, FunctionAddress, WindowHandle};
pub use interfaces::*;
pub use layouts::{VTableOffsets, BUILTIN_LAYOUTS, MAX_SLOTS};
