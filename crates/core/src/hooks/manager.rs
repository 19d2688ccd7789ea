//! Named detour registry
//!
//! Provides a single entry point for installing and removing detours by
//! logical name. At most one record exists per name.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use framehook_sdk::FunctionAddress;

use super::detour::{CallGuard, DetourRecord};
use super::error::HookError;

/// Result of [`DetourManager::install_named`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// A new record was installed
    Installed,
    /// A record with that name already exists; nothing changed
    AlreadyPresent,
}

/// Process-wide detour manager
static DETOURS: LazyLock<DetourManager> = LazyLock::new(DetourManager::new);

/// Get the process-wide detour manager
pub fn detours() -> &'static DetourManager {
    &DETOURS
}

/// Registry mapping hook names to their detour records
#[derive(Debug, Default)]
pub struct DetourManager {
    records: RwLock<HashMap<String, Arc<DetourRecord>>>,
}

impl DetourManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a detour under `name`
    ///
    /// If a record already exists for `name` this is a logged no-op.
    ///
    /// # Safety
    /// See [`DetourRecord::install`].
    pub unsafe fn install_named(
        &self,
        name: &str,
        original: FunctionAddress,
        replacement: FunctionAddress,
    ) -> Result<InstallOutcome, HookError> {
        let mut records = self.records.write();

        if let Some(existing) = records.get(name) {
            tracing::info!(
                "Detour '{}' already present ({}), skipping install",
                name,
                existing.state()
            );
            return Ok(InstallOutcome::AlreadyPresent);
        }

        let record = Arc::new(DetourRecord::new(name, original, replacement));
        record.install()?;
        records.insert(name.to_string(), record);

        Ok(InstallOutcome::Installed)
    }

    /// Remove the detour registered under `name`
    ///
    /// Blocks while in-flight calls drain. No registry lock is held during
    /// the drain, so replacements can keep looking records up meanwhile.
    pub fn remove_named(&self, name: &str) -> Result<(), HookError> {
        let record = self
            .records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HookError::NotFound(name.to_string()))?;

        record.remove()?;

        let mut records = self.records.write();
        if records
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &record))
        {
            records.remove(name);
        }

        Ok(())
    }

    /// Remove every detour
    ///
    /// Must run before the module hosting the replacements is unmapped.
    /// Every record is attempted; the first error is returned.
    pub fn remove_all(&self) -> Result<(), HookError> {
        let mut first_error = None;

        for name in self.names() {
            if let Err(e) = self.remove_named(&name) {
                tracing::error!("Failed to remove detour '{}': {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Count a call into the replacement registered under `name`
    ///
    /// `None` if no such detour is installed; the caller then calls the
    /// original entry directly.
    pub fn enter(&self, name: &str) -> Option<CallGuard> {
        let record = self.records.read().get(name).cloned()?;
        record.enter()
    }

    pub fn get(&self, name: &str) -> Option<Arc<DetourRecord>> {
        self.records.read().get(name).cloned()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.records
            .read()
            .get(name)
            .is_some_and(|record| record.is_installed())
    }

    /// Names of all registered detours, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.records.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
