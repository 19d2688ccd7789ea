//! Detour records
//!
//! A [`DetourRecord`] owns one interception: the original entry, its
//! trampoline, and a counter of calls currently running inside the
//! replacement. Replacements bracket their body with [`DetourRecord::enter`];
//! removal restores the entry bytes first and then waits for that counter to
//! reach zero before the trampoline is freed.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use framehook_sdk::FunctionAddress;

use super::error::HookError;
use super::trampoline::Trampoline;

/// Lifecycle state of a detour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetourState {
    Uninstalled = 0,
    Installed = 1,
    /// Entry restored, waiting for in-flight calls to drain
    Removing = 2,
}

impl DetourState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DetourState::Installed,
            2 => DetourState::Removing,
            _ => DetourState::Uninstalled,
        }
    }
}

impl fmt::Display for DetourState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetourState::Uninstalled => "uninstalled",
            DetourState::Installed => "installed",
            DetourState::Removing => "removing",
        };
        f.write_str(s)
    }
}

thread_local! {
    /// Call guards held by the current thread, across all records
    static ACTIVE_GUARDS: Cell<usize> = const { Cell::new(0) };
}

/// Whether the current thread is running inside any detour
pub fn in_detour() -> bool {
    ACTIVE_GUARDS.with(|count| count.get() > 0)
}

/// One function interception
pub struct DetourRecord {
    name: String,
    original: FunctionAddress,
    replacement: FunctionAddress,
    state: AtomicU8,
    live_calls: AtomicUsize,

    /// Trampoline entry, readable without the lifecycle lock
    trampoline_entry: AtomicUsize,

    /// Serializes install/remove and owns the trampoline
    lifecycle: Mutex<Option<Trampoline>>,
}

impl DetourRecord {
    /// Create an uninstalled record
    pub fn new(name: impl Into<String>, original: FunctionAddress, replacement: FunctionAddress) -> Self {
        Self {
            name: name.into(),
            original,
            replacement,
            state: AtomicU8::new(DetourState::Uninstalled as u8),
            live_calls: AtomicUsize::new(0),
            trampoline_entry: AtomicUsize::new(0),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original(&self) -> FunctionAddress {
        self.original
    }

    pub fn replacement(&self) -> FunctionAddress {
        self.replacement
    }

    pub fn state(&self) -> DetourState {
        DetourState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_installed(&self) -> bool {
        self.state() == DetourState::Installed
    }

    /// Calls currently inside the replacement
    pub fn live_calls(&self) -> usize {
        self.live_calls.load(Ordering::SeqCst)
    }

    /// Redirect the original entry to the replacement
    ///
    /// The trampoline is built and armed before the entry is patched, so the
    /// original stays callable throughout.
    ///
    /// # Safety
    /// - `original` must be the entry of a function in a module that stays mapped
    ///   while the detour is installed
    /// - `replacement` must have the same signature and ABI as the original and
    ///   bracket its body with [`DetourRecord::enter`]
    pub unsafe fn install(&self) -> Result<(), HookError> {
        let mut lifecycle = self.lifecycle.lock();

        if self.state() != DetourState::Uninstalled {
            return Err(HookError::AlreadyInstalled(self.name.clone()));
        }
        if self.original.is_null() {
            return Err(HookError::AddressUnresolved(format!(
                "original of '{}' is null",
                self.name
            )));
        }

        let mut trampoline = Trampoline::build(self.original)?;
        trampoline.redirect_to(self.replacement)?;

        self.trampoline_entry
            .store(trampoline.entry().as_usize(), Ordering::SeqCst);
        self.state
            .store(DetourState::Installed as u8, Ordering::SeqCst);

        if let Err(e) = trampoline.patch_entry() {
            self.state
                .store(DetourState::Uninstalled as u8, Ordering::SeqCst);
            self.trampoline_entry.store(0, Ordering::SeqCst);
            return Err(e);
        }

        *lifecycle = Some(trampoline);

        tracing::info!(
            "Installed detour '{}': {} -> {}",
            self.name,
            self.original,
            self.replacement
        );
        Ok(())
    }

    /// Remove the detour, blocking until in-flight calls have drained
    ///
    /// Order: entry bytes restored, state published as `Removing`, spin until
    /// `live_calls` is zero, trampoline freed, state `Uninstalled`. Once this
    /// returns no call can reach the replacement through the original entry.
    /// Removing an uninstalled record is a no-op.
    ///
    /// Fails with [`HookError::WouldDeadlock`] when called from inside a
    /// detour, since that thread's own call could never drain.
    pub fn remove(&self) -> Result<(), HookError> {
        if in_detour() {
            return Err(HookError::WouldDeadlock(self.name.clone()));
        }

        let mut lifecycle = self.lifecycle.lock();
        let Some(mut trampoline) = lifecycle.take() else {
            tracing::debug!("Detour '{}' is not installed", self.name);
            return Ok(());
        };

        // SAFETY: install() required the original's module to stay mapped
        if let Err(e) = unsafe { trampoline.restore_entry() } {
            *lifecycle = Some(trampoline);
            return Err(e);
        }

        self.state
            .store(DetourState::Removing as u8, Ordering::SeqCst);

        let drained = self.drain();
        if drained > 0 {
            tracing::debug!("Detour '{}' drained after {} spins", self.name, drained);
        }

        self.trampoline_entry.store(0, Ordering::SeqCst);
        drop(trampoline);

        self.state
            .store(DetourState::Uninstalled as u8, Ordering::SeqCst);

        tracing::info!("Removed detour '{}' at {}", self.name, self.original);
        Ok(())
    }

    /// Spin until no call is inside the replacement
    fn drain(&self) -> u64 {
        let mut spins = 0u64;
        while self.live_calls.load(Ordering::SeqCst) != 0 {
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
            spins += 1;
        }
        spins
    }

    /// Count a call into the replacement
    ///
    /// Returns `None` once removal has begun; the caller must then call the
    /// original entry directly, which is already restored by that point.
    pub fn enter(self: &Arc<Self>) -> Option<CallGuard> {
        // Increment before the state check so removal never misses this call
        self.live_calls.fetch_add(1, Ordering::SeqCst);

        if self.state() != DetourState::Installed {
            self.live_calls.fetch_sub(1, Ordering::SeqCst);
            return None;
        }

        ACTIVE_GUARDS.with(|count| count.set(count.get() + 1));
        Some(CallGuard {
            record: Arc::clone(self),
            _thread_bound: PhantomData,
        })
    }

    /// Callable address that behaves like the unpatched original
    pub fn trampoline(&self) -> Result<FunctionAddress, HookError> {
        if self.state() != DetourState::Installed {
            return Err(HookError::TrampolineInvalidated(self.name.clone()));
        }
        Ok(self.entry())
    }

    fn entry(&self) -> FunctionAddress {
        FunctionAddress::new(
            self.trampoline_entry.load(Ordering::SeqCst),
            self.original.abi(),
        )
    }
}

impl fmt::Debug for DetourRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetourRecord")
            .field("name", &self.name)
            .field("original", &self.original)
            .field("replacement", &self.replacement)
            .field("state", &self.state())
            .field("live_calls", &self.live_calls())
            .finish()
    }
}

impl Drop for DetourRecord {
    fn drop(&mut self) {
        // No guards can exist here since each one holds an Arc to the record
        if let Some(mut trampoline) = self.lifecycle.get_mut().take() {
            tracing::warn!("Detour '{}' dropped while installed", self.name);
            if let Err(e) = unsafe { trampoline.restore_entry() } {
                tracing::error!("Failed to restore '{}': {}", self.name, e);
            }
        }
    }
}

/// A counted call inside a replacement
///
/// The trampoline stays valid for as long as the guard lives, even if
/// removal starts meanwhile.
pub struct CallGuard {
    record: Arc<DetourRecord>,
    /// Guards are counted per thread
    _thread_bound: PhantomData<*const ()>,
}

impl CallGuard {
    pub fn record(&self) -> &DetourRecord {
        &self.record
    }

    /// Trampoline address for calling the original behaviour
    pub fn trampoline(&self) -> FunctionAddress {
        self.record.entry()
    }

    /// Trampoline as a typed function pointer
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the original's signature.
    pub unsafe fn original<F: Copy>(&self) -> F {
        self.trampoline().cast()
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        ACTIVE_GUARDS.with(|count| count.set(count.get().saturating_sub(1)));
        self.record.live_calls.fetch_sub(1, Ordering::SeqCst);
    }
}
