//! End-to-end interpreter scenarios: cache totality, breakpoint round trip,
//! and fallback-then-interpreted dispatch equivalence across a full
//! `Runtime`, not just one module in isolation.

use crate::common::test_runtime;
use ppu_core::common::addr::GuestAddr;

#[test]
fn every_installed_address_resolves_to_a_valid_handler() {
    let runtime = test_runtime(0x10_0000);
    runtime.cache().install_range(GuestAddr::new(0x1000), 64);
    for i in 0..16u32 {
        let addr = GuestAddr::new(0x1000 + i * 4);
        // resolve must not panic: every slot in the installed range has a
        // concrete handler, never an uninitialized bit pattern.
        let _ = runtime.cache().resolve(addr);
    }
}

#[test]
fn breakpoint_then_clear_restores_dispatch_through_fast_call() {
    use ppu_core::thread::call::fast_call;
    use ppu_core::thread::{GuestThread, ThreadId};

    let runtime = test_runtime(0x10_0000);
    let entry = GuestAddr::new(0x2000);
    runtime.cache().install_range(entry, 4);
    runtime.cache().install_interpreter_slot(
        entry,
        |_rt, thread, _op| {
            thread.registers.cia = GuestAddr::new(thread.registers.lr as u32);
            thread.flags.set_ret();
            false
        },
    );

    runtime.cache().set_breakpoint(entry);
    assert_eq!(
        runtime.cache().resolve(entry) as usize,
        ppu_core::cache::handler::breakpoint_handler as usize
    );
    runtime.cache().clear_breakpoint(entry);

    let mut thread = GuestThread::new(ThreadId(0), 8);
    fast_call(&runtime, &mut thread, entry, 0);
    // fast_call must have restored the saved lr-as-sentinel context exactly,
    // proving the breakpoint's shadowed handler round-tripped correctly.
    assert_eq!(thread.registers.cia, GuestAddr::new(0));
}

#[test]
fn fallback_then_interpreter_slot_agree_on_first_dispatch() {
    let runtime = test_runtime(0x10_0000);
    let addr = GuestAddr::new(0x3000);
    runtime.cache().install_range(addr, 4);
    assert_eq!(
        runtime.cache().resolve(addr) as usize,
        ppu_core::cache::handler::fallback_handler as usize
    );

    use ppu_core::thread::{GuestThread, ThreadId};
    let mut thread = GuestThread::new(ThreadId(0), 8);
    thread.registers.cia = addr;
    let advanced = (runtime.cache().resolve(addr))(&runtime, &mut thread, 0);
    assert!(advanced);
    // EmptyDecoderTable always resolves to noop_handler, so the slot the
    // fallback installs must be exactly that handler from then on.
    assert_eq!(
        runtime.cache().resolve(addr) as usize,
        ppu_core::cache::handler::noop_handler as usize
    );
}
