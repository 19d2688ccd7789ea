//! Versioned dispatch-table layouts
//!
//! Built-in layouts ship with the SDK. A JSON file deployed next to the
//! plugin can add or override entries, so a host update that moves the
//! slots only needs a new table entry:
//!
//! ```json
//! {
//!     "d3d9": { "offsets": { "end_of_frame": 42, "reset": 16 } }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use framehook_sdk::{VTableOffsets, BUILTIN_LAYOUTS, MAX_SLOTS};

/// Errors that can occur when loading or querying layouts
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Failed to read layouts file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse layouts JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Unknown interface layout: {0}")]
    UnknownLayout(String),

    #[error("Invalid layout '{name}': {reason}")]
    InvalidLayout { name: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct OffsetsEntry {
    end_of_frame: usize,
    reset: usize,
}

#[derive(Debug, Deserialize)]
struct LayoutEntry {
    offsets: OffsetsEntry,
}

/// Interface version identifier to slot indices
#[derive(Debug, Clone)]
pub struct LayoutTable {
    layouts: HashMap<String, VTableOffsets>,
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LayoutTable {
    /// Table with only the built-in layouts
    pub fn builtin() -> Self {
        let layouts = BUILTIN_LAYOUTS
            .iter()
            .map(|(name, offsets)| (name.to_string(), *offsets))
            .collect();
        Self { layouts }
    }

    /// Built-ins plus the entries of a JSON file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Built-ins plus the entries of a JSON string
    pub fn load_str(json: &str) -> Result<Self, LayoutError> {
        let mut table = Self::builtin();
        table.merge_str(json)?;
        Ok(table)
    }

    /// Add or replace entries from a JSON string
    ///
    /// Returns the number of entries read. Nothing is merged if any entry
    /// is invalid.
    pub fn merge_str(&mut self, json: &str) -> Result<usize, LayoutError> {
        let raw: HashMap<String, LayoutEntry> = serde_json::from_str(json)?;

        let mut parsed = Vec::with_capacity(raw.len());
        for (name, entry) in raw {
            let offsets = VTableOffsets::new(entry.offsets.end_of_frame, entry.offsets.reset);
            if offsets.table_len().is_none() {
                return Err(LayoutError::InvalidLayout {
                    name,
                    reason: format!("slot {} exceeds {} entries", offsets.max_slot(), MAX_SLOTS),
                });
            }
            if offsets.end_of_frame_slot == offsets.reset_slot {
                return Err(LayoutError::InvalidLayout {
                    name,
                    reason: "end_of_frame and reset share a slot".to_string(),
                });
            }
            parsed.push((name, offsets));
        }

        let count = parsed.len();
        for (name, offsets) in parsed {
            if let Some(previous) = self.layouts.insert(name.clone(), offsets) {
                if previous != offsets {
                    tracing::info!("Layout '{}' overridden: {:?} -> {:?}", name, previous, offsets);
                }
            }
        }

        tracing::info!("Loaded {} layout entries ({} known)", count, self.layouts.len());
        Ok(count)
    }

    /// Slot indices for an interface version
    pub fn get(&self, version: &str) -> Result<VTableOffsets, LayoutError> {
        self.layouts
            .get(version)
            .copied()
            .ok_or_else(|| LayoutError::UnknownLayout(version.to_string()))
    }

    pub fn contains(&self, version: &str) -> bool {
        self.layouts.contains_key(version)
    }

    /// Known version identifiers, sorted
    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.layouts.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framehook_sdk::layouts::{D3D9_DEVICE, DEFAULT_LAYOUT};

    #[test]
    fn test_builtin_lookup() {
        let table = LayoutTable::builtin();
        assert_eq!(table.get(DEFAULT_LAYOUT).unwrap(), D3D9_DEVICE);
        assert!(matches!(
            table.get("d3d8"),
            Err(LayoutError::UnknownLayout(name)) if name == "d3d8"
        ));
    }

    #[test]
    fn test_json_overrides_and_extends() {
        let json = r#"{
            "d3d9": { "offsets": { "end_of_frame": 43, "reset": 17 } },
            "d3d9-patched": { "offsets": { "end_of_frame": 44, "reset": 16 } }
        }"#;

        let table = LayoutTable::load_str(json).unwrap();
        assert_eq!(table.get("d3d9").unwrap(), VTableOffsets::new(43, 17));
        assert_eq!(table.get("d3d9-patched").unwrap(), VTableOffsets::new(44, 16));
        // Untouched built-ins survive
        assert_eq!(table.get("d3d9-9.0c").unwrap(), D3D9_DEVICE);
        assert!(table.versions().contains(&"d3d9-patched"));
    }

    #[test]
    fn test_invalid_entry_merges_nothing() {
        let mut table = LayoutTable::builtin();
        let before = table.len();

        let json = r#"{
            "good": { "offsets": { "end_of_frame": 42, "reset": 16 } },
            "bad": { "offsets": { "end_of_frame": 16, "reset": 16 } }
        }"#;
        assert!(matches!(
            table.merge_str(json),
            Err(LayoutError::InvalidLayout { .. })
        ));
        assert_eq!(table.len(), before);
        assert!(!table.contains("good"));
    }

    #[test]
    fn test_slot_beyond_table_limit() {
        let mut table = LayoutTable::builtin();

        let json = format!(
            r#"{{ "huge": {{ "offsets": {{ "end_of_frame": {}, "reset": 16 }} }} }}"#,
            usize::MAX
        );
        assert!(matches!(
            table.merge_str(&json),
            Err(LayoutError::InvalidLayout { ref name, .. }) if name == "huge"
        ));

        let json = format!(
            r#"{{ "edge": {{ "offsets": {{ "end_of_frame": {}, "reset": 16 }} }} }}"#,
            MAX_SLOTS - 1
        );
        assert_eq!(table.merge_str(&json).unwrap(), 1);
        assert!(table.contains("edge"));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            LayoutTable::load_str(r#"{ "d3d9": { "offsets": { "reset": 16 } } }"#),
            Err(LayoutError::ParseError(_))
        ));
        assert!(matches!(
            LayoutTable::load_file("/nonexistent/layouts.json"),
            Err(LayoutError::IoError(_))
        ));
    }
}
