//! The threaded interpreter: a speculative, block-at-a-time dispatch loop.

use crate::common::addr::GuestAddr;
use crate::runtime::Runtime;
use crate::thread::{GuestThread, StateFlags};

const BLOCK_INSTRUCTIONS: u32 = 4;

/// Decodes and executes exactly one instruction at the thread's current PC.
///
/// Used for misaligned PCs, for single-stepping under a debugger, and as
/// the non-speculative fallback path whenever any state flag is set.
pub fn step_one(runtime: &Runtime, thread: &mut GuestThread) {
    let pc = thread.registers.cia;
    let handler = runtime.cache().resolve(pc);
    let opcode = runtime.vm().read32(pc);
    let advance = handler(runtime, thread, opcode);
    if advance {
        thread.registers.cia = GuestAddr::new(pc.val() + 4);
    }
}

/// Dispatches one speculative 4-instruction block starting at the thread's
/// current (16-byte-aligned) PC.
///
/// Executes handlers 0..3 in order; between handler 1 and handler 2,
/// prefetches the *next* block's cache entries. Returns `true` if all four
/// instructions ran and the thread should continue speculating the next
/// block; `false` if a handler returned `false`, a state flag appeared
/// between iterations, or the block ended misaligned.
fn run_block(runtime: &Runtime, thread: &mut GuestThread) -> bool {
    let base = thread.registers.cia;
    let addrs: [GuestAddr; BLOCK_INSTRUCTIONS as usize] =
        std::array::from_fn(|i| GuestAddr::new(base.val() + (i as u32) * 4));
    let handlers = addrs.map(|addr| runtime.cache().resolve(addr));
    let opcodes = addrs.map(|addr| runtime.vm().read32(addr));

    for i in 0..BLOCK_INSTRUCTIONS as usize {
        if i == 2 {
            // Speculative prefetch of the next block's cache entries,
            // matching the threaded interpreter's "warm the next four
            // slots while still retiring this block" pipeline shape.
            let next_base = base.val() + BLOCK_INSTRUCTIONS * 4;
            for j in 0..BLOCK_INSTRUCTIONS {
                let _ = runtime.cache().resolve(GuestAddr::new(next_base + j * 4));
            }
        }
        thread.registers.cia = addrs[i];
        let advance = handlers[i](runtime, thread, opcodes[i]);
        if !advance {
            return false;
        }
        thread.registers.cia = GuestAddr::new(addrs[i].val() + 4);
        if thread.flags.any() {
            return false;
        }
    }
    true
}

/// Runs the guest thread's main dispatch loop until a *stop*, *exit*, or
/// *ret* flag is observed.
///
/// This is `exec_task()`: the loop `fast_call` enters after installing a
/// guest function's entry point.
pub fn run_task(runtime: &Runtime, thread: &mut GuestThread) {
    loop {
        let flags = thread.flags.get();
        if flags.intersects(StateFlags::STOP | StateFlags::EXIT | StateFlags::RET) {
            return;
        }
        if flags.intersects(StateFlags::SUSPEND | StateFlags::MEMORY | StateFlags::PAUSE) {
            step_one(runtime, thread);
            continue;
        }
        if !thread.registers.cia.is_block_aligned() {
            step_one(runtime, thread);
            continue;
        }
        run_block(runtime, thread);
    }
}
