//! Trampoline memory allocation
//!
//! Allocates executable memory within ±2GB of target addresses so a 5-byte
//! relative jump can reach it. Pages are carved into fixed-size slots; a
//! released slot goes to the back of a retirement queue and is only handed
//! out again once no fresh slot in range is left.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::ptr::NonNull;

/// Page size (4KB on most systems)
const PAGE_SIZE: usize = 4096;

/// Size of one trampoline slot
pub const SLOT_SIZE: usize = 128;

/// Maximum distance for a rel32 jump (2GB, minus slack)
const MAX_RANGE: usize = 0x7FFF_0000;

/// Distance between successive allocation hints
const HINT_STEP: usize = PAGE_SIZE * 64;

/// Global slot pool
static POOL: Mutex<SlotPool> = Mutex::new(SlotPool::new());

/// Check whether a rel32 displacement from `from` reaches `to`
pub fn in_range(from: usize, to: usize) -> bool {
    // 32-bit displacements wrap around the whole address space
    if cfg!(target_pointer_width = "32") {
        return true;
    }
    from.abs_diff(to) < MAX_RANGE
}

/// Pool of executable slots
struct SlotPool {
    /// Pages allocated, keyed by base address
    pages: BTreeMap<usize, PageInfo>,

    /// Released slots, oldest first
    retired: VecDeque<usize>,
}

struct PageInfo {
    base: *mut u8,
    size: usize,
    used: usize,
}

// SAFETY: The pool is protected by a mutex and pages are only handed out through it
unsafe impl Send for PageInfo {}

impl SlotPool {
    const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            retired: VecDeque::new(),
        }
    }

    /// Allocate a slot near the target address
    fn alloc_near(&mut self, target: usize) -> Option<NonNull<u8>> {
        // Fresh space in an existing page
        for (&base, page) in &mut self.pages {
            if in_range(base, target) && page.used + SLOT_SIZE <= page.size {
                let ptr = unsafe { page.base.add(page.used) };
                page.used += SLOT_SIZE;
                return NonNull::new(ptr);
            }
        }

        // Oldest retired slot in range
        if let Some(pos) = self.retired.iter().position(|&slot| in_range(slot, target)) {
            let slot = self.retired.remove(pos)?;
            tracing::trace!("Reusing retired trampoline slot {:x}", slot);
            return NonNull::new(slot as *mut u8);
        }

        let base = self.alloc_page_near(target)?;
        let page = self.pages.get_mut(&(base as usize))?;
        page.used = SLOT_SIZE;
        NonNull::new(base)
    }

    fn retire(&mut self, slot: usize) {
        self.retired.push_back(slot);
    }

    fn insert_page(&mut self, base: *mut u8) -> *mut u8 {
        self.pages.insert(
            base as usize,
            PageInfo {
                base,
                size: PAGE_SIZE,
                used: 0,
            },
        );
        base
    }

    #[cfg(unix)]
    fn alloc_page_near(&mut self, target: usize) -> Option<*mut u8> {
        use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
        use std::num::NonZeroUsize;

        let length = NonZeroUsize::new(PAGE_SIZE)?;

        for hint in hints_near(target) {
            let result = unsafe {
                mmap_anonymous(
                    NonZeroUsize::new(hint),
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                    MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                )
            };

            if let Ok(ptr) = result {
                let base = ptr.as_ptr() as *mut u8;

                if in_range(base as usize, target) {
                    return Some(self.insert_page(base));
                }

                // Allocation was too far, unmap it
                unsafe {
                    let _ = munmap(ptr, PAGE_SIZE);
                }
            }
        }

        tracing::error!("Failed to allocate page near {:x}", target);
        None
    }

    #[cfg(windows)]
    fn alloc_page_near(&mut self, target: usize) -> Option<*mut u8> {
        use windows::Win32::System::Memory::{
            VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        };

        for hint in hints_near(target) {
            let result = unsafe {
                VirtualAlloc(
                    Some(hint as *const std::ffi::c_void),
                    PAGE_SIZE,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_EXECUTE_READWRITE,
                )
            };

            if !result.is_null() {
                let base = result as *mut u8;

                if in_range(base as usize, target) {
                    return Some(self.insert_page(base));
                }

                unsafe {
                    let _ = VirtualFree(result, 0, MEM_RELEASE);
                }
            }
        }

        tracing::error!("Failed to allocate page near {:x}", target);
        None
    }
}

/// Allocation hints moving outward from `target`, alternating below and above
fn hints_near(target: usize) -> impl Iterator<Item = usize> {
    let origin = target & !(HINT_STEP - 1);
    (1..=MAX_RANGE / HINT_STEP).flat_map(move |i| {
        let delta = i * HINT_STEP;
        let below = origin.checked_sub(delta).filter(|&h| h >= 0x10000);
        let above = origin.checked_add(delta);
        below.into_iter().chain(above)
    })
}

/// One executable slot of [`SLOT_SIZE`] bytes
///
/// Dropping the slot retires it to the pool. Whatever was last written into
/// it stays in place until the slot is handed out again.
#[derive(Debug)]
pub struct ExecSlot {
    ptr: NonNull<u8>,
}

// SAFETY: the slot is plain executable memory owned by exactly one ExecSlot
unsafe impl Send for ExecSlot {}
unsafe impl Sync for ExecSlot {}

impl ExecSlot {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl Drop for ExecSlot {
    fn drop(&mut self) {
        POOL.lock().retire(self.address());
    }
}

/// Allocate a trampoline slot within jump range of `target`
pub fn alloc_slot(target: usize) -> Option<ExecSlot> {
    POOL.lock()
        .alloc_near(target)
        .map(|ptr| ExecSlot { ptr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    extern "C" fn anchor() -> u32 {
        std::hint::black_box(7)
    }

    #[test]
    fn test_slot_allocation_near_target() {
        let target = anchor as usize;
        let slot = alloc_slot(target).expect("Should allocate slot");

        assert!(!slot.as_ptr().is_null());
        assert!(in_range(slot.address(), target));
        assert_eq!(slot.address() % SLOT_SIZE, 0);
    }

    #[test]
    fn test_multiple_allocations() {
        let target = anchor as usize;

        let s1 = alloc_slot(target).unwrap();
        let s2 = alloc_slot(target).unwrap();
        let s3 = alloc_slot(target).unwrap();

        assert_ne!(s1.address(), s2.address());
        assert_ne!(s2.address(), s3.address());
        assert_ne!(s1.address(), s3.address());
    }

    #[test]
    fn test_retired_slot_reused_after_page_fills() {
        let target = anchor as usize;
        let mut pool = SlotPool::new();

        let first = pool.alloc_near(target).unwrap().as_ptr() as usize;
        for _ in 1..PAGE_SIZE / SLOT_SIZE {
            pool.alloc_near(target).unwrap();
        }

        pool.retire(first);
        let reused = pool.alloc_near(target).unwrap().as_ptr() as usize;
        assert_eq!(reused, first);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_hints_alternate_around_target() {
        let target = 0x7FF0_0000_0000usize;
        let hints: Vec<_> = hints_near(target).take(4).collect();

        assert_eq!(hints[0], target - HINT_STEP);
        assert_eq!(hints[1], target + HINT_STEP);
        assert_eq!(hints[2], target - 2 * HINT_STEP);
        assert!(hints.iter().all(|&h| in_range(h, target)));
    }
}
