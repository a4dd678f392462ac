//! Guest function invocation from host code.

use crate::common::addr::GuestAddr;
use crate::runtime::Runtime;
use crate::thread::GuestThread;

/// The link-register value installed by `fast_call`; a guest `blr` to this
/// address is recognized as "the call we just made has returned" rather
/// than a real guest branch target.
pub const HLE_RETURN_SENTINEL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Invokes guest function `entry` with TOC `toc`, as if called from host
/// code.
///
/// Saves `(cia, r2, lr, last_function)`, installs the sentinel return
/// address, runs the guest task loop, then restores the saved context
/// whether the task loop returned normally or unwound. The only unwind
/// `fast_call` itself absorbs is the *ret* state flag raised when guest
/// execution reaches [`HLE_RETURN_SENTINEL`]; any other panic resumes
/// after the context is restored.
pub fn fast_call(runtime: &Runtime, thread: &mut GuestThread, entry: GuestAddr, toc: u64) {
    let saved_cia = thread.registers.cia;
    let saved_r2 = thread.registers.gpr[2];
    let saved_lr = thread.registers.lr;
    let saved_last_function = thread.last_function;

    thread.registers.cia = entry;
    thread.registers.gpr[2] = toc;
    thread.registers.lr = HLE_RETURN_SENTINEL;

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        crate::interpreter::run_task(runtime, thread);
    }));

    thread.flags.clear_ret();
    thread.registers.cia = saved_cia;
    thread.registers.gpr[2] = saved_r2;
    thread.registers.lr = saved_lr;
    thread.last_function = saved_last_function;

    if let Err(payload) = outcome {
        tracing::warn!(
            last_function = saved_last_function.unwrap_or("<unknown>"),
            "guest execution unwound out of fast_call"
        );
        std::panic::resume_unwind(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExecutableCache;
    use crate::config::Config;
    use crate::decoder::EmptyDecoderTable;
    use crate::debug::NullDebugger;
    use crate::syscall::EmptySyscallRegistry;
    use crate::thread::ThreadId;
    use crate::vm::FlatMemory;

    fn test_runtime() -> Runtime {
        Runtime::new(
            Config::default(),
            Box::new(EmptyDecoderTable),
            Box::new(NullDebugger),
            Box::new(EmptySyscallRegistry),
            Box::new(FlatMemory::new(0x10_0000)),
        )
        .expect("runtime construction in tests should not fail")
    }

    #[test]
    fn fast_call_restores_prior_context_after_immediate_return() {
        let runtime = test_runtime();
        let cache: &ExecutableCache = runtime.cache();
        cache.install_range(GuestAddr::new(0x1000), 4);
        cache.install_function_at(GuestAddr::new(0x1000), |_rt, thread, _op| {
            thread.registers.cia = GuestAddr::new(thread.registers.lr as u32);
            thread.flags.set_ret();
            false
        });

        let mut thread = GuestThread::new(ThreadId(0), 8);
        thread.registers.cia = GuestAddr::new(0x2000);
        thread.registers.gpr[2] = 0x3000;
        thread.registers.lr = 0xDEAD;

        fast_call(&runtime, &mut thread, GuestAddr::new(0x1000), 0x4000);

        assert_eq!(thread.registers.cia, GuestAddr::new(0x2000));
        assert_eq!(thread.registers.gpr[2], 0x3000);
        assert_eq!(thread.registers.lr, 0xDEAD);
        assert!(!thread.flags.get().contains(crate::thread::StateFlags::RET));
    }
}
