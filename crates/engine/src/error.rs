//! Error types for dispatch-table resolution

/// Error type for resolving detour targets
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Interface instance pointer was null
    #[error("Interface instance is null")]
    NullInstance,

    /// Instance has no dispatch table
    #[error("Dispatch table pointer is null")]
    NullTable,

    /// A slot, window or other required address could not be found
    #[error("Address unresolved: {0}")]
    AddressUnresolved(String),

    /// Slot index is beyond the readable part of the table
    #[error("Slot {slot} out of range (table has {len} readable entries)")]
    SlotOutOfRange { slot: usize, len: usize },

    /// Resolved address does not point at executable memory
    #[error("Slot {slot} resolved to non-executable address {address:#x}")]
    NotExecutable { slot: usize, address: usize },

    /// Throwaway probe instance could not be created
    #[error("Failed to create probe instance: {0}")]
    Probe(String),

    /// Slot memory protection could not be changed
    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),
}
