//! Error type for detour operations

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Original or replacement address is null
    #[error("Address unresolved: {0}")]
    AddressUnresolved(String),

    /// The prologue at `address` cannot be relocated safely
    #[error("Patch too small at {address:#x}: {reason}")]
    PatchTooSmall { address: usize, reason: String },

    #[error("Detour '{0}' already installed")]
    AlreadyInstalled(String),

    /// Trampoline requested after the detour was removed
    #[error("Trampoline of '{0}' invalidated")]
    TrampolineInvalidated(String),

    #[error("Hook not found: {0}")]
    NotFound(String),

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    /// No executable memory within jump range of the target
    #[error("Trampoline allocation failed near {0:#x}")]
    Allocation(usize),

    /// Removal requested from a thread that is itself inside a detour
    #[error("Removing '{0}' from inside a detour would deadlock")]
    WouldDeadlock(String),
}

impl HookError {
    pub(crate) fn too_small(address: usize, reason: impl Into<String>) -> Self {
        HookError::PatchTooSmall {
            address,
            reason: reason.into(),
        }
    }
}
