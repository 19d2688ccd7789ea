//! Code patching
//!
//! Every write into foreign code goes through [`write_code`], which holds a
//! process-wide lock so that two patches on the same page never race on its
//! protection.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::HookError;

/// Length of a `jmp rel32`
pub const JMP_REL32_LEN: usize = 5;

/// Serializes protection changes and code writes
static PATCH_LOCK: Mutex<()> = Mutex::new(());

/// Encode `jmp rel32` at `from` targeting `to`
///
/// Returns `None` if the displacement does not fit in 32 bits.
pub fn jmp_rel32(from: usize, to: usize) -> Option<[u8; JMP_REL32_LEN]> {
    let next = from.wrapping_add(JMP_REL32_LEN) as i64;
    let disp = (to as i64).wrapping_sub(next);

    #[cfg(target_pointer_width = "32")]
    let disp = disp as i32 as i64;

    let disp = i32::try_from(disp).ok()?.to_le_bytes();
    Some([0xE9, disp[0], disp[1], disp[2], disp[3]])
}

/// Whether `len` bytes at `address` fall inside one aligned 8-byte word
pub fn is_atomic_write(address: usize, len: usize) -> bool {
    address % 8 + len <= 8
}

/// Overwrite `bytes.len()` bytes of code at `address`
///
/// Writes that fit inside one aligned 8-byte word are published with a
/// single atomic store, so a concurrent caller sees either the old or the
/// new instruction, never a mix.
///
/// # Safety
/// `address` must be mapped code owned by the caller for the duration of the
/// write, and the new bytes must leave it executable as a whole.
pub unsafe fn write_code(address: usize, bytes: &[u8]) -> Result<(), HookError> {
    let _lock = PATCH_LOCK.lock();

    let _protect = region::protect_with_handle(
        address as *const u8,
        bytes.len(),
        region::Protection::READ_WRITE_EXECUTE,
    )
    .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    if is_atomic_write(address, bytes.len()) {
        let offset = address % 8;
        let word = &*((address - offset) as *const AtomicU64);
        let mut buf = word.load(Ordering::SeqCst).to_le_bytes();
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        word.store(u64::from_le_bytes(buf), Ordering::SeqCst);
    } else {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
    }

    flush_instruction_cache(address, bytes.len());
    Ok(())
}

/// Store one pointer-sized value into a trampoline slot
///
/// # Safety
/// `address` must be naturally aligned writable slot memory.
pub unsafe fn store_slot_word(address: usize, value: usize) {
    let _lock = PATCH_LOCK.lock();
    let word = &*(address as *const std::sync::atomic::AtomicUsize);
    word.store(value, Ordering::SeqCst);
    flush_instruction_cache(address, std::mem::size_of::<usize>());
}

#[cfg(windows)]
fn flush_instruction_cache(address: usize, len: usize) {
    use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows::Win32::System::Threading::GetCurrentProcess;

    unsafe {
        let _ = FlushInstructionCache(
            GetCurrentProcess(),
            Some(address as *const std::ffi::c_void),
            len,
        );
    }
}

#[cfg(not(windows))]
fn flush_instruction_cache(_address: usize, _len: usize) {
    // x86 keeps instruction fetch coherent with stores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmp_rel32_encoding() {
        let bytes = jmp_rel32(0x1000, 0x2000).unwrap();
        assert_eq!(bytes[0], 0xE9);
        assert_eq!(i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 0x2000 - 0x1005);

        let back = jmp_rel32(0x2000, 0x1000).unwrap();
        assert_eq!(i32::from_le_bytes([back[1], back[2], back[3], back[4]]), 0x1000 - 0x2005);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_jmp_rel32_out_of_range() {
        assert!(jmp_rel32(0x1000, 0x7FFF_0000_0000).is_none());
    }

    #[test]
    fn test_atomic_write_boundaries() {
        assert!(is_atomic_write(0x1000, JMP_REL32_LEN));
        assert!(is_atomic_write(0x1003, JMP_REL32_LEN));
        assert!(!is_atomic_write(0x1004, JMP_REL32_LEN));
        assert!(!is_atomic_write(0x1007, 2));
        assert!(is_atomic_write(0x1007, 1));
    }

    #[test]
    fn test_write_code_into_slot() {
        let slot = super::super::alloc::alloc_slot(test_write_code_into_slot as usize).unwrap();
        let base = slot.address();

        unsafe {
            // Aligned word path
            write_code(base + 2, &[0x90, 0x90, 0xC3]).unwrap();
            // Straddles two words
            write_code(base + 6, &[0xCC, 0xCC, 0xCC, 0xCC]).unwrap();

            let bytes = std::slice::from_raw_parts(base as *const u8, 10);
            assert_eq!(&bytes[2..5], &[0x90, 0x90, 0xC3]);
            assert_eq!(&bytes[6..10], &[0xCC; 4]);
        }
    }
}
