//! The reserved code arena and its trampoline pool.
//!
//! A single virtual memory region is reserved once at first use, probing
//! addresses under the 2 GiB mark so that every host pointer inside it fits
//! in 32 bits. The arena is bump-allocated; it never shrinks until process
//! teardown.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::common::error::CoreError;
use crate::config::ArenaConfig;

/// 16 bytes: an indirect far jump (`jmp [rip+imm]`-style stub), one
/// trampoline, at arena-page granularity.
pub const TRAMPOLINE_BYTES: usize = 16;

/// Trampoline pool page size.
const TRAMPOLINE_PAGE_BYTES: usize = 4096;

/// A contiguous, 32-bit-addressable region reserved for compiled code, data
/// sections, and call trampolines.
///
/// # Safety / concurrency
///
/// The bump pointer and trampoline pool are modified only during JIT
/// finalization, which runs single-threaded; `CodeArena` itself uses an
/// atomic bump pointer so reads (e.g. `contains`) from other threads stay
/// race-free without needing a lock.
pub struct CodeArena {
    base: *mut u8,
    size: usize,
    next: AtomicUsize,
    trampoline_cursor: AtomicUsize,
}

// SAFETY: the raw pointer only ever refers to memory owned exclusively by
// this arena; all mutation goes through the atomic bump pointer, and callers
// are responsible for not aliasing the handed-out ranges.
unsafe impl Send for CodeArena {}
unsafe impl Sync for CodeArena {}

impl CodeArena {
    /// Reserves the arena, probing `config.base_low..=config.base_high` in
    /// steps of `config.probe_step` until an anchored reservation lands
    /// entirely below the 2 GiB mark.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ArenaUnplaceable`] if no anchored reservation can
    /// be made across the whole probe range.
    pub fn reserve(config: &ArenaConfig) -> Result<Self, CoreError> {
        let mut addr = config.base_low;
        while addr <= config.base_high {
            if let Some(base) = Self::try_reserve_at(addr, config.size_bytes) {
                tracing::info!(base = %format_args!("{base:#x}"), size = config.size_bytes, "arena reserved");
                return Ok(Self {
                    base: base as *mut u8,
                    size: config.size_bytes,
                    next: AtomicUsize::new(0),
                    trampoline_cursor: AtomicUsize::new(0),
                });
            }
            addr += config.probe_step;
        }
        Err(CoreError::ArenaUnplaceable)
    }

    fn try_reserve_at(addr: u64, size: usize) -> Option<u64> {
        // SAFETY: MAP_ANONYMOUS | MAP_PRIVATE with an explicit hint address
        // and no `MAP_FIXED` lets the kernel refuse the hint rather than
        // clobbering existing mappings; we check the returned address below.
        let ptr = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        let got = ptr as u64;
        if got != addr {
            // SAFETY: `ptr`/`size` came from the `mmap` call immediately above.
            unsafe {
                let _ = libc::munmap(ptr, size);
            }
            return None;
        }
        Some(got)
    }

    /// The arena's base address.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base as u64
    }

    /// The high bits shared by every address inside this arena, used to
    /// widen a truncated cache entry back into a full host pointer.
    #[must_use]
    pub fn high_bits(&self) -> u64 {
        self.base as u64 & !0xFFFF_FFFFu64
    }

    /// Returns `true` if `addr` falls within the arena's reserved range.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base() && addr < self.base() + self.size as u64
    }

    /// Bump-allocates `size` bytes, committing the backing pages with the
    /// given protection. Used by the JIT memory manager's code/data section
    /// allocators.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfArena`] if the bump pointer would exceed the
    /// reserved size, or [`CoreError::MemoryProtectionFailed`] if committing
    /// the backing pages fails.
    pub fn allocate(&self, size: usize, align: usize, protection: Protection) -> Result<u64, CoreError> {
        let align = align.max(1);
        let mut start = 0;
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let aligned = align_up(current, align);
                let end = aligned.checked_add(size)?;
                if end > self.size {
                    return None;
                }
                start = aligned;
                Some(end)
            })
            .map_err(|current| CoreError::OutOfArena {
                requested: size,
                remaining: self.size.saturating_sub(align_up(current, align)),
            })?;
        let addr = self.base as u64 + start as u64;
        // SAFETY: `[addr, addr+size)` was just reserved exclusively by the
        // fetch_update above and lies within `[base, base+size)`.
        unsafe { commit(addr as *mut libc::c_void, size, protection)? };
        Ok(addr)
    }

    /// Allocates one trampoline (16 bytes) from the pool, committing a fresh
    /// 4 KiB page of W+X memory whenever the previous page is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfArena`] if the arena has no room left for a
    /// new trampoline page.
    pub fn allocate_trampoline(&self) -> Result<u64, CoreError> {
        loop {
            let cursor = self.trampoline_cursor.load(Ordering::SeqCst);
            if cursor % TRAMPOLINE_PAGE_BYTES == 0 {
                let page = self.allocate(TRAMPOLINE_PAGE_BYTES, TRAMPOLINE_PAGE_BYTES, Protection::ReadWriteExecute)?;
                self.trampoline_cursor.store(
                    (page - self.base as u64) as usize,
                    Ordering::SeqCst,
                );
                continue;
            }
            let addr = self.base as u64 + cursor as u64;
            self.trampoline_cursor
                .store(cursor + TRAMPOLINE_BYTES, Ordering::SeqCst);
            return Ok(addr);
        }
    }

    /// Protects `[addr, addr+size)` (which must lie inside the arena) to the
    /// given protection level. Used to tighten read-only sections after JIT
    /// finalization.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfArena`] if the range is not contained in the
    /// arena, or [`CoreError::MemoryProtectionFailed`] if `mprotect` itself
    /// fails.
    pub fn protect(&self, addr: u64, size: usize, protection: Protection) -> Result<(), CoreError> {
        if !self.contains(addr) || !self.contains(addr + size as u64 - 1) {
            return Err(CoreError::OutOfArena {
                requested: size,
                remaining: 0,
            });
        }
        // SAFETY: range checked above to lie within the arena's reservation.
        unsafe { commit(addr as *mut libc::c_void, size, protection) }
    }
}

impl Drop for CodeArena {
    fn drop(&mut self) {
        // SAFETY: `self.base`/`self.size` are exactly the reservation made in `reserve`.
        unsafe {
            let _ = libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

impl std::fmt::Debug for CodeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeArena")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &self.size)
            .field("used", &self.next.load(Ordering::SeqCst))
            .finish()
    }
}

/// Memory protection requested for an arena allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Read/write, for data sections.
    ReadWrite,
    /// Read/write/execute, committed lazily for code sections.
    ReadWriteExecute,
    /// Read/execute only, applied by `finalize` to tighten read-only code/data
    /// after JIT linking completes.
    ReadExecute,
    /// Read-only, applied by `finalize` to tighten constant data sections.
    ReadOnly,
}

impl Protection {
    fn to_prot(self) -> libc::c_int {
        match self {
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadWriteExecute => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            Protection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
            Protection::ReadOnly => libc::PROT_READ,
        }
    }
}

/// Commits `[addr, addr+size)` with the given protection.
///
/// # Errors
///
/// Returns [`CoreError::MemoryProtectionFailed`] if `mprotect` rejects the
/// request (e.g. `addr` is not page-aligned).
///
/// # Safety
///
/// `addr`/`size` must describe a range reserved by a prior `mmap` (i.e.
/// inside a `CodeArena`'s reservation).
unsafe fn commit(addr: *mut libc::c_void, size: usize, protection: Protection) -> Result<(), CoreError> {
    let result = unsafe { libc::mprotect(addr, size, protection.to_prot()) };
    if result != 0 {
        return Err(CoreError::MemoryProtectionFailed {
            addr: addr as u64,
            size,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ArenaConfig {
        ArenaConfig {
            size_bytes: 4 * 1024 * 1024,
            base_low: 0x2000_0000,
            base_high: 0x7000_0000,
            probe_step: 0x0100_0000,
        }
    }

    #[test]
    fn reservation_lands_below_2gib() {
        let arena = CodeArena::reserve(&test_config()).unwrap();
        assert!(arena.base() + arena.size as u64 <= 0x8000_0000);
    }

    #[test]
    fn bump_allocation_stays_in_bounds_and_is_monotonic() {
        let arena = CodeArena::reserve(&test_config()).unwrap();
        let a = arena.allocate(64, 8, Protection::ReadWrite).unwrap();
        let b = arena.allocate(64, 8, Protection::ReadWrite).unwrap();
        assert!(b >= a + 64);
        assert!(arena.contains(a));
        assert!(arena.contains(b));
    }

    #[test]
    fn allocation_past_arena_size_fails() {
        let arena = CodeArena::reserve(&test_config()).unwrap();
        let err = arena.allocate(8 * 1024 * 1024, 8, Protection::ReadWrite);
        assert!(matches!(err, Err(CoreError::OutOfArena { .. })));
    }

    #[test]
    fn allocate_aligns_the_start_offset_not_just_the_size() {
        let arena = CodeArena::reserve(&test_config()).unwrap();
        arena.allocate(3, 1, Protection::ReadWrite).unwrap();
        let aligned = arena.allocate(64, TRAMPOLINE_PAGE_BYTES, Protection::ReadWrite).unwrap();
        assert_eq!((aligned - arena.base()) % TRAMPOLINE_PAGE_BYTES as u64, 0);
    }

    #[test]
    fn trampolines_stay_16_byte_spaced_within_a_page() {
        let arena = CodeArena::reserve(&test_config()).unwrap();
        let t0 = arena.allocate_trampoline().unwrap();
        let t1 = arena.allocate_trampoline().unwrap();
        assert_eq!(t1 - t0, TRAMPOLINE_BYTES as u64);
        assert_eq!(t0 % TRAMPOLINE_PAGE_BYTES as u64, 0);
    }
}
