//! Dispatch-table layouts
//!
//! Slot indices are tied to a specific version of the third-party interface.
//! They are keyed by an interface version identifier so a host update can be
//! answered with a new table entry instead of a rebuild.

/// Upper bound on dispatch-table slot indices
///
/// COM interfaces in practice stay well under this; IDirect3DDevice9 has 119
/// entries.
pub const MAX_SLOTS: usize = 1024;

/// Slot indices of the two detoured entries in an interface's dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VTableOffsets {
    /// End-of-frame entry (IDirect3DDevice9::EndScene)
    pub end_of_frame_slot: usize,
    /// Device-reset entry (IDirect3DDevice9::Reset)
    pub reset_slot: usize,
}

impl VTableOffsets {
    pub const fn new(end_of_frame_slot: usize, reset_slot: usize) -> Self {
        Self {
            end_of_frame_slot,
            reset_slot,
        }
    }

    /// Highest slot index read from the table
    pub fn max_slot(&self) -> usize {
        self.end_of_frame_slot.max(self.reset_slot)
    }

    /// Number of table entries covering both slots, if within [`MAX_SLOTS`]
    pub fn table_len(&self) -> Option<usize> {
        self.max_slot()
            .checked_add(1)
            .filter(|&len| len <= MAX_SLOTS)
    }
}

/// IDirect3DDevice9 as shipped with d3d9.dll (SDK 9.0c)
///
/// IUnknown (3) + TestCooperativeLevel .. GetNumberOfSwapChains puts Reset
/// at 16; BeginScene is 41 and EndScene 42.
pub const D3D9_DEVICE: VTableOffsets = VTableOffsets::new(42, 16);

/// Default interface version identifier
pub const DEFAULT_LAYOUT: &str = "d3d9";

/// Collected built-in layouts for lookup
pub const BUILTIN_LAYOUTS: &[(&str, VTableOffsets)] = &[
    ("d3d9", D3D9_DEVICE),
    ("d3d9-9.0c", D3D9_DEVICE),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d3d9_slots() {
        assert_eq!(D3D9_DEVICE.end_of_frame_slot, 42);
        assert_eq!(D3D9_DEVICE.reset_slot, 16);
        assert_eq!(D3D9_DEVICE.max_slot(), 42);
        assert_eq!(D3D9_DEVICE.table_len(), Some(43));
    }

    #[test]
    fn test_table_len_bounded() {
        assert_eq!(VTableOffsets::new(MAX_SLOTS - 1, 0).table_len(), Some(MAX_SLOTS));
        assert_eq!(VTableOffsets::new(MAX_SLOTS, 0).table_len(), None);
        assert_eq!(VTableOffsets::new(usize::MAX, 1).table_len(), None);
    }

    #[test]
    fn test_default_layout_is_builtin() {
        assert!(BUILTIN_LAYOUTS
            .iter()
            .any(|(name, _)| *name == DEFAULT_LAYOUT));
    }
}
