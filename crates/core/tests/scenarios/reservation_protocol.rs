//! The reservation protocol under real cross-thread contention, driven
//! through a shared [`Runtime`] rather than a bare `ReservationClock`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::test_runtime;
use ppu_core::common::addr::GuestAddr;
use ppu_core::thread::reservation::Reservation;

#[test]
fn only_one_racing_store_conditional_wins_the_same_granule() {
    let runtime = Arc::new(test_runtime(0x10_0000));
    let addr = GuestAddr::new(0x4000);
    let slot = Arc::new(AtomicU64::new(0));

    let rtime = runtime.reservation_clock().sample();
    let reservation = Reservation {
        raddr: addr.val(),
        rtime,
        rdata: 0,
    };

    let mut handles = Vec::new();
    for writer_id in 1..=8u64 {
        let runtime = Arc::clone(&runtime);
        let slot = Arc::clone(&slot);
        handles.push(std::thread::spawn(move || {
            runtime
                .reservation_clock()
                .try_store_conditional(reservation, addr, &slot, writer_id)
        }));
    }

    let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).filter(|&won| won).count();
    assert_eq!(wins, 1, "exactly one racing store-conditional on a shared reservation must succeed");
    assert_ne!(slot.load(Ordering::SeqCst), 0, "the winner's value must be observable afterward");
}

#[test]
fn reservation_sampled_before_a_concurrent_plain_write_is_invalidated() {
    let runtime = test_runtime(0x10_0000);
    let addr = GuestAddr::new(0x5000);
    let slot = AtomicU64::new(42);

    let rtime = runtime.reservation_clock().sample();
    let reservation = Reservation {
        raddr: addr.val(),
        rtime,
        rdata: 42,
    };

    // A plain (non-conditional) write elsewhere in the guest invalidates
    // every outstanding reservation, modeling a second thread's `stw` to
    // the same granule racing ahead of our `stwcx`.
    runtime.reservation_clock().invalidate();

    assert!(!runtime
        .reservation_clock()
        .try_store_conditional(reservation, addr, &slot, 99));
    assert_eq!(slot.load(Ordering::SeqCst), 42);
}
