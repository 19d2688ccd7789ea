//! Dispatch-table resolution
//!
//! The dispatch table of an interface is shared by every instance created
//! from the same loaded module, so a throwaway instance is enough to find
//! the entries a live one will call.

use std::ffi::c_void;

use framehook_sdk::{FunctionAddress, VTableOffsets, END_SCENE_ABI, MAX_SLOTS, RESET_ABI};

use crate::error::ResolveError;
use crate::slots::{self, ForeignSlots};

/// A throwaway interface instance used only to read its dispatch table
///
/// The instance is released when the value is dropped.
///
/// # Safety
/// `as_raw` must return a pointer to a live instance of the interface the
/// layout describes, valid for as long as `self` lives.
pub unsafe trait ProbeInstance {
    fn as_raw(&self) -> *const c_void;
}

/// Absolute addresses of the two detour targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSlots {
    /// Address of the dispatch table they were read from
    pub table: usize,
    pub end_of_frame: FunctionAddress,
    pub reset: FunctionAddress,
}

/// Resolves detour targets from a versioned slot layout
#[derive(Debug, Clone)]
pub struct DispatchTableResolver {
    version: String,
    offsets: VTableOffsets,
}

impl DispatchTableResolver {
    /// Create a resolver for one interface version
    ///
    /// # Arguments
    /// * `version` - Interface version identifier (for diagnostics)
    /// * `offsets` - Slot layout of that version
    pub fn new(version: impl Into<String>, offsets: VTableOffsets) -> Self {
        Self {
            version: version.into(),
            offsets,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn offsets(&self) -> VTableOffsets {
        self.offsets
    }

    /// Resolve both entries from a live instance
    ///
    /// Each address must be non-null and point into an executable region;
    /// anything else fails closed.
    ///
    /// # Safety
    /// `instance` must be a live instance of the interface this layout
    /// describes, with a table covering every slot in the layout.
    #[tracing::instrument(skip(self), fields(version = %self.version))]
    pub unsafe fn resolve(&self, instance: *const c_void) -> Result<ResolvedSlots, ResolveError> {
        let len = self.offsets.table_len().ok_or(ResolveError::SlotOutOfRange {
            slot: self.offsets.max_slot(),
            len: MAX_SLOTS,
        })?;
        let table = ForeignSlots::from_instance(instance, len)?;

        let end_of_frame = Self::validated(&table, self.offsets.end_of_frame_slot, "end-of-frame", |slot| {
            table.read(slot, END_SCENE_ABI)
        })?;
        let reset = Self::validated(&table, self.offsets.reset_slot, "reset", |slot| {
            table.read(slot, RESET_ABI)
        })?;

        tracing::info!(
            "Resolved dispatch table {:x}: end-of-frame[{}]={}, reset[{}]={}",
            table.table_address(),
            self.offsets.end_of_frame_slot,
            end_of_frame,
            self.offsets.reset_slot,
            reset
        );

        Ok(ResolvedSlots {
            table: table.table_address(),
            end_of_frame,
            reset,
        })
    }

    /// Resolve from a throwaway instance, releasing it afterwards
    pub fn resolve_probe<P: ProbeInstance>(&self, probe: P) -> Result<ResolvedSlots, ResolveError> {
        let instance = probe.as_raw();
        tracing::debug!("Probe instance at {:p}", instance);

        // SAFETY: ProbeInstance guarantees a live instance until `probe` drops
        let resolved = unsafe { self.resolve(instance) };
        drop(probe);
        resolved
    }

    fn validated(
        table: &ForeignSlots,
        slot: usize,
        what: &str,
        read: impl FnOnce(usize) -> Result<FunctionAddress, ResolveError>,
    ) -> Result<FunctionAddress, ResolveError> {
        let address = read(slot).map_err(|e| match e {
            ResolveError::AddressUnresolved(_) => ResolveError::AddressUnresolved(format!(
                "{} slot {} of table {:#x} is null",
                what,
                slot,
                table.table_address()
            )),
            other => other,
        })?;

        if !slots::is_executable(address.as_usize()) {
            tracing::error!(
                "{} slot {} resolved to {}, which is not executable",
                what,
                slot,
                address
            );
            return Err(ResolveError::NotExecutable {
                slot,
                address: address.as_usize(),
            });
        }

        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    extern "system" fn fake_end_scene(_this: *mut c_void) -> i32 {
        42
    }

    extern "system" fn fake_reset(_this: *mut c_void, _params: *mut c_void) -> i32 {
        16
    }

    extern "system" fn filler(_this: *mut c_void) -> i32 {
        0
    }

    struct FakeInstance {
        vtable: Box<[usize]>,
        released: Arc<AtomicBool>,
    }

    impl FakeInstance {
        fn new(released: Arc<AtomicBool>, data: usize) -> Box<(*const usize, Self)> {
            let mut table = vec![filler as usize; 4];
            table[1] = fake_reset as usize;
            table[2] = fake_end_scene as usize;
            table[3] = data;
            let vtable = table.into_boxed_slice();
            let head = vtable.as_ptr();
            Box::new((head, Self { vtable, released }))
        }
    }

    struct FakeProbe(Box<(*const usize, FakeInstance)>);

    unsafe impl ProbeInstance for FakeProbe {
        fn as_raw(&self) -> *const c_void {
            // First field of the boxed tuple is the vtable pointer
            &self.0 .0 as *const *const usize as *const c_void
        }
    }

    impl Drop for FakeProbe {
        fn drop(&mut self) {
            assert!(!self.0 .1.vtable.is_empty());
            self.0 .1.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_resolve_probe() {
        let released = Arc::new(AtomicBool::new(false));
        let data = vec![0u8; 8];
        let probe = FakeProbe(FakeInstance::new(released.clone(), data.as_ptr() as usize));

        let resolver = DispatchTableResolver::new("fake", VTableOffsets::new(2, 1));
        let slots = resolver.resolve_probe(probe).unwrap();

        assert_eq!(slots.end_of_frame.as_usize(), fake_end_scene as usize);
        assert_eq!(slots.reset.as_usize(), fake_reset as usize);
        assert_eq!(slots.end_of_frame.abi(), END_SCENE_ABI);
        assert!(released.load(Ordering::SeqCst), "probe must be released");
    }

    #[test]
    fn test_wrong_slot_fails_closed() {
        let released = Arc::new(AtomicBool::new(false));
        let data = vec![0u8; 8];
        let probe = FakeProbe(FakeInstance::new(released.clone(), data.as_ptr() as usize));

        // Slot 3 holds a heap pointer, not code
        let resolver = DispatchTableResolver::new("shifted", VTableOffsets::new(3, 1));
        let err = resolver.resolve_probe(probe).unwrap_err();

        assert!(matches!(err, ResolveError::NotExecutable { slot: 3, .. }));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_oversized_slot_index_rejected() {
        for offsets in [VTableOffsets::new(usize::MAX, 1), VTableOffsets::new(1, MAX_SLOTS)] {
            let released = Arc::new(AtomicBool::new(false));
            let data = vec![0u8; 8];
            let probe = FakeProbe(FakeInstance::new(released.clone(), data.as_ptr() as usize));

            let resolver = DispatchTableResolver::new("oversized", offsets);
            let err = resolver.resolve_probe(probe).unwrap_err();

            assert!(matches!(err, ResolveError::SlotOutOfRange { len: MAX_SLOTS, .. }));
            assert!(released.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_null_instance() {
        let resolver = DispatchTableResolver::new("d3d9", VTableOffsets::new(42, 16));
        let err = unsafe { resolver.resolve(std::ptr::null()) }.unwrap_err();
        assert!(matches!(err, ResolveError::NullInstance));
    }
}
