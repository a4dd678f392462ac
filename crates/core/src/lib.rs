//! PPU execution core: executable cache, threaded interpreter, and LLVM recompiler driver.
//!
//! This crate implements the performance- and correctness-critical heart of a
//! PlayStation 3 PPU (PowerPC-64) execution engine:
//! 1. **Cache:** a flat, address-indexed table of host handler pointers (`cache`).
//! 2. **Interpreter:** a speculative, block-at-a-time threaded dispatch loop (`interpreter`).
//! 3. **Recompiler:** module partitioning, a content-addressed object cache, and a
//!    bump-allocating JIT memory manager laying code into a 32-bit-addressable arena
//!    (`recompiler`).
//!
//! The instruction decoder tables, the SELF/ELF loader, virtual memory, HLE syscall
//! dispatch, the IR translator, and the debugger are external collaborators: this
//! crate depends on them only through the narrow traits in [`decoder`], [`vm`],
//! [`syscall`], [`debug`], and [`recompiler::ir`]/[`recompiler::codegen`].

/// Guest addresses, the error/trap taxonomy, and shared primitives.
pub mod common;
/// Simulator configuration (decoder kind, arena sizing, cache path, debug flags).
pub mod config;
/// The reserved 32-bit-addressable code arena and its trampoline pool.
pub mod arena;
/// The executable cache: address-indexed handler table, install/breakpoint operations.
pub mod cache;
/// The instruction decoder table collaborator contract.
pub mod decoder;
/// The debugger collaborator contract.
pub mod debug;
/// The module re-initialization collaborator contract.
pub mod initializer;
/// Per-thread guest register state, reservations, command queue, and `fast_call`.
pub mod thread;
/// The threaded interpreter's speculative main loop.
pub mod interpreter;
/// The LLVM recompiler driver: partitioning, object cache, JIT memory manager.
pub mod recompiler;
/// Process-wide runtime handle (arena, cache, reservation clock, thread registry).
pub mod runtime;
/// The HLE syscall registry collaborator contract.
pub mod syscall;
/// The virtual memory collaborator contract.
pub mod vm;

pub use common::error::{CoreError, Trap};
pub use config::Config;
pub use runtime::Runtime;
