//! Shared test harness: a minimal [`Runtime`] wired up with flat guest
//! memory and no-op external collaborators.

use ppu_core::config::{ArenaConfig, Config};
use ppu_core::decoder::EmptyDecoderTable;
use ppu_core::debug::NullDebugger;
use ppu_core::syscall::EmptySyscallRegistry;
use ppu_core::vm::FlatMemory;
use ppu_core::Runtime;

/// Builds a [`Runtime`] over `memory_bytes` of flat guest memory, a small
/// arena, and every external collaborator defaulted to a no-op.
pub fn test_runtime(memory_bytes: usize) -> Runtime {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

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
        Box::new(FlatMemory::new(memory_bytes)),
    )
    .expect("test runtime construction should not fail")
}
