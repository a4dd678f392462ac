//! The executable cache: a flat, address-indexed table mapping every guest
//! instruction address to a dispatch handler.
//!
//! The table is backed by one large `PROT_NONE` reservation covering the
//! full 32-bit guest address space, committed page-by-page as ranges are
//! registered, in the same spirit as [`crate::arena::CodeArena`]. This keeps
//! cache totality (every registered address has a valid entry) without
//! materializing gigabytes of physical memory up front.

pub mod handler;

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::common::addr::GuestAddr;
use handler::{fallback_handler, Handler};

const SLOT_BYTES: usize = mem::size_of::<usize>();
/// One slot per 4-byte-aligned guest address across the full 32-bit space.
const SLOT_COUNT: usize = (1usize << 32) / 4;
const MAP_BYTES: usize = SLOT_COUNT * SLOT_BYTES;
const PAGE_BYTES: usize = 4096;

/// Address-indexed dispatch table.
///
/// Reads and unconditional writes are lock-free; `set_breakpoint` and
/// `install_toc_checked` additionally record the handler they displaced in
/// a side table (`shadow`) so the wrapper can forward to it and so
/// `clear_breakpoint` can restore it exactly.
pub struct ExecutableCache {
    base: *mut u8,
    shadow: Mutex<HashMap<u32, Handler>>,
}

// SAFETY: `base` refers to a reservation owned exclusively by this cache;
// every slot is accessed through an `AtomicUsize` reference, so concurrent
// reads and writes across threads are race-free at the slot level.
unsafe impl Send for ExecutableCache {}
unsafe impl Sync for ExecutableCache {}

impl ExecutableCache {
    /// Reserves the full cache address space. Cheap: no physical memory is
    /// committed until [`ExecutableCache::install_range`] touches a range.
    pub fn reserve() -> Result<Self, crate::common::error::CoreError> {
        // SAFETY: anonymous, unbacked reservation; no hint address required
        // since the cache does not need to fit below any particular line.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                MAP_BYTES,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(crate::common::error::CoreError::OutOfArena {
                requested: MAP_BYTES,
                remaining: 0,
            });
        }
        Ok(Self {
            base: ptr as *mut u8,
            shadow: Mutex::new(HashMap::new()),
        })
    }

    fn slot(&self, addr: GuestAddr) -> &AtomicUsize {
        let index = addr.cache_index();
        // SAFETY: `index < SLOT_COUNT` for any `u32` guest address, and the
        // reservation covers `SLOT_COUNT` slots.
        unsafe { &*(self.base.add(index * SLOT_BYTES) as *const AtomicUsize) }
    }

    fn page_range(addr: GuestAddr, size: u32) -> (usize, usize) {
        let start_byte = addr.cache_index() * SLOT_BYTES;
        let end_byte = (addr.cache_index() + (size as usize).div_ceil(4)) * SLOT_BYTES;
        let start_page = (start_byte / PAGE_BYTES) * PAGE_BYTES;
        let end_page = end_byte.div_ceil(PAGE_BYTES) * PAGE_BYTES;
        (start_page, end_page - start_page)
    }

    /// Commits backing for `[addr, addr+size)` and fills every covered slot
    /// with the fallback handler.
    pub fn install_range(&self, addr: GuestAddr, size: u32) {
        let (page_start, page_len) = Self::page_range(addr, size);
        // SAFETY: `page_start..page_start+page_len` lies within the
        // reservation made by `reserve`.
        unsafe {
            let _ = libc::mprotect(
                self.base.add(page_start) as *mut libc::c_void,
                page_len,
                libc::PROT_READ | libc::PROT_WRITE,
            );
        }
        let start = addr.cache_index();
        let count = (size as usize).div_ceil(4);
        for i in 0..count {
            self.slot(GuestAddr::new(addr.val() + (i * 4) as u32))
                .store(fallback_handler as usize, Ordering::SeqCst);
        }
    }

    /// Unconditionally writes `handler` at `addr`.
    pub fn install_function_at(&self, addr: GuestAddr, handler: Handler) {
        self.slot(addr).store(handler as usize, Ordering::SeqCst);
    }

    /// Writes `handler` at `addr` only if the current entry is still the
    /// fallback handler, so a specialized entry (breakpoint, TOC-check,
    /// compiled) is never clobbered.
    pub fn install_interpreter_slot(&self, addr: GuestAddr, handler: Handler) {
        let _ = self.slot(addr).compare_exchange(
            fallback_handler as usize,
            handler as usize,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Installs a TOC-check wrapper at `addr`, remembering `underlying` so
    /// the wrapper can forward to it.
    pub fn install_toc_checked(&self, addr: GuestAddr, underlying: Handler) {
        self.shadow.lock().expect("cache shadow lock poisoned").insert(addr.val(), underlying);
        self.install_function_at(addr, handler::toc_check_handler);
    }

    /// Swaps the entry at `addr` for the breakpoint handler, remembering the
    /// displaced entry.
    pub fn set_breakpoint(&self, addr: GuestAddr) {
        let saved = self.resolve(addr);
        self.shadow.lock().expect("cache shadow lock poisoned").insert(addr.val(), saved);
        self.install_function_at(addr, handler::breakpoint_handler);
    }

    /// Restores the entry displaced by a prior `set_breakpoint`, if any.
    pub fn clear_breakpoint(&self, addr: GuestAddr) {
        let restored = self.shadow.lock().expect("cache shadow lock poisoned").remove(&addr.val());
        if let Some(handler) = restored {
            self.install_function_at(addr, handler);
        }
    }

    /// Returns the handler displaced by `set_breakpoint` or
    /// `install_toc_checked` at `addr`, for the wrapper handlers to forward
    /// to.
    pub fn underlying(&self, addr: GuestAddr) -> Option<Handler> {
        self.shadow
            .lock()
            .expect("cache shadow lock poisoned")
            .get(&addr.val())
            .copied()
    }

    /// Reads the current entry at `addr`.
    ///
    /// # Panics
    ///
    /// Reading an address outside any range passed to `install_range` reads
    /// `PROT_NONE` memory and faults; callers must only resolve addresses
    /// that have been registered.
    #[must_use]
    pub fn resolve(&self, addr: GuestAddr) -> Handler {
        let bits = self.slot(addr).load(Ordering::SeqCst);
        // SAFETY: every slot is either uninitialized (never read without a
        // prior `install_range`/`install_function_at`) or holds a bit
        // pattern produced by casting a `Handler` value to `usize`.
        unsafe { mem::transmute::<usize, Handler>(bits) }
    }
}

impl Drop for ExecutableCache {
    fn drop(&mut self) {
        // SAFETY: `self.base` is exactly the reservation made in `reserve`.
        unsafe {
            let _ = libc::munmap(self.base as *mut libc::c_void, MAP_BYTES);
        }
    }
}

impl std::fmt::Debug for ExecutableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::handler::noop_handler;

    #[test]
    fn install_range_fills_with_fallback() {
        let cache = ExecutableCache::reserve().unwrap();
        cache.install_range(GuestAddr::new(0x1_0000), 16);
        for i in 0..4u32 {
            let addr = GuestAddr::new(0x1_0000 + i * 4);
            assert_eq!(cache.resolve(addr) as usize, fallback_handler as usize);
        }
    }

    #[test]
    fn interpreter_slot_does_not_clobber_specialized_entries() {
        let cache = ExecutableCache::reserve().unwrap();
        let addr = GuestAddr::new(0x1_0004);
        cache.install_range(GuestAddr::new(0x1_0000), 16);
        cache.install_interpreter_slot(addr, noop_handler);
        assert_eq!(cache.resolve(addr) as usize, noop_handler as usize);

        // A second install_interpreter_slot call must not overwrite it again
        // (idempotence; and it must never clobber a non-fallback entry).
        cache.install_interpreter_slot(addr, fallback_handler);
        assert_eq!(cache.resolve(addr) as usize, noop_handler as usize);

        // Sibling slots are untouched.
        assert_eq!(
            cache.resolve(GuestAddr::new(0x1_0000)) as usize,
            fallback_handler as usize
        );
        assert_eq!(
            cache.resolve(GuestAddr::new(0x1_0008)) as usize,
            fallback_handler as usize
        );
    }

    #[test]
    fn breakpoint_round_trip_restores_prior_entry() {
        let cache = ExecutableCache::reserve().unwrap();
        let addr = GuestAddr::new(0x1_0008);
        cache.install_range(GuestAddr::new(0x1_0000), 16);
        cache.install_interpreter_slot(addr, noop_handler);

        cache.set_breakpoint(addr);
        assert_eq!(
            cache.resolve(addr) as usize,
            handler::breakpoint_handler as usize
        );
        assert_eq!(cache.underlying(addr).map(|h| h as usize), Some(noop_handler as usize));

        cache.clear_breakpoint(addr);
        assert_eq!(cache.resolve(addr) as usize, noop_handler as usize);
    }
}
