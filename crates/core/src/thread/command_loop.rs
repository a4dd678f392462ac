//! The guest-thread command loop: drains a thread's command queue in FIFO
//! order, applying each command's effect, checking the state bitfield
//! between commands.

use crate::common::addr::GuestAddr;
use crate::config::DecoderKind;
use crate::runtime::Runtime;
use crate::thread::call::fast_call;
use crate::thread::command_queue::Command;
use crate::thread::{GuestThread, StateFlags};

/// Runs `thread`'s command loop until a *stop* or *exit* flag is observed.
///
/// This is the guest thread's top-level work loop: the host emulator's
/// scheduler pushes commands (`lle_call`, `hle_call`, `set-gpr`, ...) onto
/// the thread's queue and this loop drains and applies them one at a time,
/// in contrast to `interpreter::run_task`, which only runs *inside* a
/// single `lle_call`'s guest function invocation.
pub fn run_command_loop(runtime: &Runtime, thread: &mut GuestThread) {
    loop {
        if thread.flags.get().intersects(StateFlags::STOP | StateFlags::EXIT) {
            return;
        }
        let command = thread.commands.pop_blocking();
        apply(runtime, thread, command);
        if thread.flags.get().intersects(StateFlags::STOP | StateFlags::EXIT) {
            return;
        }
    }
}

fn apply(runtime: &Runtime, thread: &mut GuestThread, command: Command) {
    match command {
        Command::Opcode(opcode) => {
            let decoded = runtime.decoder().decode(opcode, DecoderKind::Fast);
            decoded(runtime, thread, opcode);
        }
        Command::SetGpr { index, value } => {
            thread.registers.gpr[index as usize] = value;
        }
        Command::SetArgs { values } => {
            for (i, value) in values.iter().take(8).enumerate() {
                thread.registers.gpr[3 + i] = *value;
            }
        }
        Command::LleCall { descriptor } => {
            let descriptor_addr = GuestAddr::new(descriptor);
            let entry = runtime.vm().read32(descriptor_addr);
            let toc = runtime.vm().read64(GuestAddr::new(descriptor + 4));
            fast_call(runtime, thread, GuestAddr::new(entry), toc);
        }
        Command::HleCall { index } => {
            if let Some(handler) = runtime.syscalls().get(index) {
                handler(runtime, thread);
            }
        }
        Command::Initialize => {
            runtime.initializer().initialize(runtime, thread);
        }
        Command::Sleep => {
            thread.park_until_woken();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArenaConfig, Config};
    use crate::decoder::EmptyDecoderTable;
    use crate::debug::NullDebugger;
    use crate::syscall::EmptySyscallRegistry;
    use crate::thread::{GuestThread, ThreadId};
    use crate::vm::FlatMemory;

    fn test_runtime() -> Runtime {
        let mut config = Config::default();
        config.arena = ArenaConfig {
            size_bytes: 4 * 1024 * 1024,
            base_low: 0x2000_0000,
            base_high: 0x7000_0000,
            probe_step: 0x0100_0000,
        };
        Runtime::new(
            config,
            Box::new(EmptyDecoderTable),
            Box::new(NullDebugger),
            Box::new(EmptySyscallRegistry),
            Box::new(FlatMemory::new(0x10_0000)),
        )
        .expect("runtime construction in tests should not fail")
    }

    #[test]
    fn set_gpr_assigns_the_named_register() {
        let runtime = test_runtime();
        let mut thread = GuestThread::new(ThreadId(0), 8);
        apply(&runtime, &mut thread, Command::SetGpr { index: 5, value: 0x42 });
        assert_eq!(thread.registers.gpr[5], 0x42);
    }

    #[test]
    fn set_args_assigns_starting_at_gpr3() {
        let runtime = test_runtime();
        let mut thread = GuestThread::new(ThreadId(0), 8);
        apply(
            &runtime,
            &mut thread,
            Command::SetArgs { values: vec![1, 2, 3] },
        );
        assert_eq!(&thread.registers.gpr[3..6], &[1, 2, 3]);
    }

    #[test]
    fn lle_call_reads_the_descriptor_and_invokes_fast_call() {
        let runtime = test_runtime();
        runtime.cache().install_range(GuestAddr::new(0x1000), 4);
        runtime.cache().install_function_at(GuestAddr::new(0x1000), |rt, thread, _op| {
            rt.vm().write64(GuestAddr::new(0x3000), thread.registers.gpr[2]);
            thread.flags.set_ret();
            false
        });
        runtime.vm().write32(GuestAddr::new(0x2000), 0x1000);
        runtime.vm().write64(GuestAddr::new(0x2004), 0x55);

        let mut thread = GuestThread::new(ThreadId(0), 8);
        apply(&runtime, &mut thread, Command::LleCall { descriptor: 0x2000 });
        assert_eq!(runtime.vm().read64(GuestAddr::new(0x3000)), 0x55);
        assert_eq!(thread.registers.gpr[2], 0);
    }

    #[test]
    fn command_loop_stops_once_the_stop_flag_is_set() {
        let runtime = test_runtime();
        let mut thread = GuestThread::new(ThreadId(0), 8);
        thread.commands.push(Command::SetGpr { index: 3, value: 1 }).unwrap();
        thread.raise(crate::common::error::Trap::IllegalInstruction {
            addr: GuestAddr::new(0),
            opcode: 0,
        });
        run_command_loop(&runtime, &mut thread);
        assert_eq!(thread.registers.gpr[3], 0);
    }
}
