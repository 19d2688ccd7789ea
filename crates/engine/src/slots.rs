//! Foreign dispatch-table access
//!
//! [`ForeignSlots`] is the only place that turns an interface pointer into
//! vtable slot reads and writes. Everything else handles [`FunctionAddress`]
//! values.

use std::ffi::c_void;
use std::ptr::NonNull;

use framehook_sdk::{Abi, FunctionAddress};

use crate::error::ResolveError;

/// Read/patch capability over one foreign dispatch table
#[derive(Debug)]
pub struct ForeignSlots {
    /// First entry of the table
    table: NonNull<usize>,

    /// Number of entries the caller vouched for
    len: usize,
}

// SAFETY: the table belongs to a loaded module and outlives any session;
// writes go through `patch`, which the callers serialize.
unsafe impl Send for ForeignSlots {}
unsafe impl Sync for ForeignSlots {}

impl ForeignSlots {
    /// Read the dispatch table pointer out of an interface instance
    ///
    /// # Safety
    /// - `instance` must point at a live object whose first field is a vtable pointer
    /// - that vtable must have at least `len` readable entries
    pub unsafe fn from_instance(instance: *const c_void, len: usize) -> Result<Self, ResolveError> {
        if instance.is_null() {
            return Err(ResolveError::NullInstance);
        }

        let table = *(instance as *const *mut usize);
        Self::from_table(table, len)
    }

    /// Wrap a dispatch table pointer directly
    ///
    /// # Safety
    /// `table` must have at least `len` readable entries.
    pub unsafe fn from_table(table: *mut usize, len: usize) -> Result<Self, ResolveError> {
        let table = NonNull::new(table).ok_or(ResolveError::NullTable)?;
        Ok(Self { table, len })
    }

    /// Address of the table itself
    pub fn table_address(&self) -> usize {
        self.table.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the entry at `index`
    ///
    /// The slot itself must be readable memory; the value is only checked
    /// for null. See [`is_executable`] for validating the result.
    pub fn read(&self, index: usize, abi: Abi) -> Result<FunctionAddress, ResolveError> {
        let slot = self.slot(index)?;
        if !is_readable(slot as usize, std::mem::size_of::<usize>()) {
            return Err(ResolveError::AddressUnresolved(format!(
                "slot {} of table {:#x} is not readable memory",
                index,
                self.table_address()
            )));
        }
        let value = unsafe { std::ptr::read_volatile(slot) };

        if value == 0 {
            return Err(ResolveError::AddressUnresolved(format!(
                "slot {} of table {:#x} is null",
                index,
                self.table_address()
            )));
        }

        Ok(FunctionAddress::new(value, abi))
    }

    /// Replace the entry at `index`, returning the previous value
    ///
    /// # Safety
    /// `new` must be callable with the signature the table's users expect.
    pub unsafe fn patch(
        &self,
        index: usize,
        new: FunctionAddress,
    ) -> Result<FunctionAddress, ResolveError> {
        let slot = self.slot(index)?;
        if !is_readable(slot as usize, std::mem::size_of::<usize>()) {
            return Err(ResolveError::AddressUnresolved(format!(
                "slot {} of table {:#x} is not mapped",
                index,
                self.table_address()
            )));
        }
        let previous = std::ptr::read_volatile(slot);

        tracing::debug!(
            "Patching slot[{}] of table {:x}: {:x} -> {:x}",
            index,
            self.table_address(),
            previous,
            new.as_usize()
        );

        let _guard = region::protect_with_handle(
            slot as *const u8,
            std::mem::size_of::<usize>(),
            region::Protection::READ_WRITE,
        )
        .map_err(|e| ResolveError::MemoryProtection(e.to_string()))?;

        std::ptr::write_volatile(slot, new.as_usize());

        Ok(FunctionAddress::new(previous, new.abi()))
    }

    fn slot(&self, index: usize) -> Result<*mut usize, ResolveError> {
        if index >= self.len {
            return Err(ResolveError::SlotOutOfRange {
                slot: index,
                len: self.len,
            });
        }
        Ok(self.table.as_ptr().wrapping_add(index))
    }
}

/// Check that `len` bytes at `address` are mapped and readable
fn is_readable(address: usize, len: usize) -> bool {
    let Some(last) = address.checked_add(len - 1) else {
        return false;
    };

    [address, last].into_iter().all(|byte| {
        region::query(byte as *const u8).is_ok_and(|region| region.is_readable())
    })
}

/// Check that `address` lies in a mapped region with execute permission
pub fn is_executable(address: usize) -> bool {
    if address == 0 {
        return false;
    }

    match region::query(address as *const u8) {
        Ok(region) => region.is_executable(),
        Err(e) => {
            tracing::debug!("region query failed for {:x}: {}", address, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn first() -> u32 {
        1
    }

    extern "C" fn second() -> u32 {
        2
    }

    #[repr(C)]
    struct FakeObject {
        vtable: *mut usize,
    }

    #[test]
    fn test_read_through_instance() {
        let mut table = [first as usize, second as usize, 0];
        let object = FakeObject {
            vtable: table.as_mut_ptr(),
        };

        let slots = unsafe {
            ForeignSlots::from_instance(&object as *const FakeObject as *const c_void, 3).unwrap()
        };

        let addr = slots.read(1, Abi::cdecl(0)).unwrap();
        let f: extern "C" fn() -> u32 = unsafe { addr.cast() };
        assert_eq!(f(), 2);

        assert!(matches!(
            slots.read(2, Abi::cdecl(0)),
            Err(ResolveError::AddressUnresolved(_))
        ));
        assert!(matches!(
            slots.read(3, Abi::cdecl(0)),
            Err(ResolveError::SlotOutOfRange { slot: 3, len: 3 })
        ));
    }

    #[test]
    fn test_null_instance_and_table() {
        let err = unsafe { ForeignSlots::from_instance(std::ptr::null(), 1) };
        assert!(matches!(err, Err(ResolveError::NullInstance)));

        let object = FakeObject {
            vtable: std::ptr::null_mut(),
        };
        let err = unsafe {
            ForeignSlots::from_instance(&object as *const FakeObject as *const c_void, 1)
        };
        assert!(matches!(err, Err(ResolveError::NullTable)));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_read_past_mapped_table() {
        let mut table = [first as usize, second as usize];

        // The caller over-reports the length; the read must still fail cleanly
        let slots = unsafe { ForeignSlots::from_table(table.as_mut_ptr(), 1 << 45).unwrap() };

        assert!(matches!(
            slots.read(1 << 44, Abi::cdecl(0)),
            Err(ResolveError::AddressUnresolved(_))
        ));
        assert_eq!(slots.read(0, Abi::cdecl(0)).unwrap().as_usize(), first as usize);
    }

    #[test]
    fn test_patch_swaps_entry() {
        let mut table = [first as usize, second as usize];
        let slots = unsafe { ForeignSlots::from_table(table.as_mut_ptr(), 2).unwrap() };

        let previous = unsafe {
            slots
                .patch(0, FunctionAddress::from_ptr(second as *const (), Abi::cdecl(0)))
                .unwrap()
        };
        assert_eq!(previous.as_usize(), first as usize);
        assert_eq!(table[0], second as usize);
    }

    #[test]
    fn test_is_executable() {
        let data = vec![0u8; 16];

        assert!(is_executable(first as usize));
        assert!(!is_executable(data.as_ptr() as usize));
        assert!(!is_executable(0));
    }
}
