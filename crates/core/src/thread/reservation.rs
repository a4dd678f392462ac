//! The load-linked/store-conditional reservation protocol.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::common::addr::GuestAddr;

/// Per-thread reservation record set by `lwarx` and consumed by `stwcx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reservation {
    /// The reserved address; `0` means no reservation is held.
    pub raddr: u32,
    /// The reservation clock value sampled when the reservation was taken.
    pub rtime: u64,
    /// The value observed at `raddr` at reservation time.
    pub rdata: u64,
}

impl Reservation {
    /// No active reservation.
    pub const NONE: Reservation = Reservation { raddr: 0, rtime: 0, rdata: 0 };

    /// Returns `true` if a reservation is currently held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.raddr != 0
    }
}

/// The process-wide reservation clock and writer lock backing `stwcx`.
///
/// A successful store-conditional takes the writer lock, advances the
/// clock, and performs a single atomic compare-exchange on the guest data
/// word; a reader samples the clock under an `lfence`-equivalent ordering
/// (`Acquire`) so the timestamp read is never reordered after the data read.
#[derive(Debug, Default)]
pub struct ReservationClock {
    clock: AtomicU64,
    writer: RwLock<()>,
}

impl ReservationClock {
    /// Creates a fresh clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            writer: RwLock::new(()),
        }
    }

    /// Samples the current clock value, establishing a `lwarx` reservation.
    #[must_use]
    pub fn sample(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Attempts a store-conditional: succeeds only if `reservation` is still
    /// active, the clock has not advanced past `reservation.rtime`, and
    /// `current_value` still equals `reservation.rdata`. On success, writes
    /// `new_value` to `slot` and advances the clock.
    #[must_use]
    pub fn try_store_conditional(
        &self,
        reservation: Reservation,
        addr: GuestAddr,
        slot: &AtomicU64,
        new_value: u64,
    ) -> bool {
        if !reservation.is_active() || reservation.raddr != addr.val() {
            return false;
        }
        let _guard = self.writer.write().expect("reservation writer lock poisoned");
        if self.clock.load(Ordering::Acquire) != reservation.rtime {
            return false;
        }
        let observed = slot.load(Ordering::Acquire);
        if observed != reservation.rdata {
            return false;
        }
        let swapped = slot
            .compare_exchange(observed, new_value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.clock.fetch_add(1, Ordering::AcqRel);
        }
        swapped
    }

    /// Advances the clock for a plain (non-conditional) write to a
    /// reserved granule, invalidating any outstanding reservation on it.
    pub fn invalidate(&self) {
        let _guard = self.writer.write().expect("reservation writer lock poisoned");
        self.clock.fetch_add(1, Ordering::AcqRel);
    }
}
