//! C-compatible module exports

pub mod exports;

pub use exports::{FAILURE, SUCCESS};
