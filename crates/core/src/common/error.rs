//! Error kinds and guest trap representations.
//!
//! This module defines:
//! 1. **`CoreError`:** operational failures in setup/compile paths.
//! 2. **`Trap`:** guest-visible faults that unwind through `thread::call::fast_call`.

use std::fmt;

use crate::common::addr::GuestAddr;

/// Operational errors raised by the cache, arena, and recompiler.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// The arena could not be reserved below the 2 GiB mark. A wider cache
    /// entry is out of scope, so this is fatal rather than a degraded mode.
    #[error("code arena could not be reserved below the 2 GiB mark")]
    ArenaUnplaceable,

    /// The JIT's bump pointer would exceed the arena's reserved size.
    #[error("out of arena space: requested {requested:#x}, {remaining:#x} remaining")]
    OutOfArena {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Bytes left in the arena before the request.
        remaining: usize,
    },

    /// A linked symbol could not be resolved to a host address.
    #[error("linkage failed: unresolved symbol '{0}'")]
    LinkageFailure(String),

    /// A guest stack allocation exceeded the thread's stack region.
    #[error("stack overflow: sp={sp:#x} requested={requested:#x} base={base:#x}")]
    StackOverflow {
        /// Current guest stack pointer.
        sp: u32,
        /// Requested frame size in bytes.
        requested: u32,
        /// Base (low address) of the guest stack region.
        base: u32,
    },

    /// A command queue slot held an unrecognized tag.
    #[error("command queue corruption: unknown tag {0:#x}")]
    CommandQueueCorruption(u8),

    /// The LLVM IR verifier rejected a compiled module.
    #[error("IR verification failed for part '{0}': {1}")]
    IrVerificationFailed(String, String),

    /// An object-cache file could not be read or written.
    #[error("object cache I/O error for '{path}': {source}")]
    CacheIo {
        /// Path of the object-cache entry.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `.pdata` unwind record used a relocation type other than `3`;
    /// rejected rather than silently ignored.
    #[error("unsupported unwind relocation type {0}")]
    UnsupportedUnwindRelocation(u32),

    /// The codegen backend produced an object file this crate could not parse.
    #[error("malformed compiled object: {0}")]
    MalformedObject(String),

    /// `mprotect` rejected a protection change on arena-owned memory.
    #[error("mprotect failed for {size:#x} bytes at {addr:#x}: {source}")]
    MemoryProtectionFailed {
        /// Address passed to `mprotect`.
        addr: u64,
        /// Size passed to `mprotect`.
        size: usize,
        /// The OS error `mprotect` failed with.
        #[source]
        source: std::io::Error,
    },
}

/// Guest-visible faults raised during instruction execution.
///
/// Traps propagate through `thread::call::fast_call`'s scope guard, which
/// restores per-thread context and (for `Ret`) absorbs the trap silently;
/// every other trap is fatal to the calling guest thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    /// An illegal or unimplemented PPU opcode was decoded.
    IllegalInstruction {
        /// Address of the faulting instruction.
        addr: GuestAddr,
        /// The raw 32-bit instruction word.
        opcode: u32,
    },
    /// A guest fetch, load, or store referenced an address with no mapping.
    MemoryFault {
        /// Faulting address.
        addr: GuestAddr,
        /// Human-readable description (e.g. "fetch", "load", "store").
        kind: &'static str,
    },
    /// The fallback handler was reached while the recompiler is enabled:
    /// the cache slot at this address was never installed.
    UnregisteredFunction(GuestAddr),
    /// The sentinel non-local return used to unwind `fast_call`. Absorbed by
    /// its scope guard; never observed outside `thread::call`.
    Ret,
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::IllegalInstruction { addr, opcode } => {
                write!(f, "IllegalInstruction(pc={:#010x}, op={:#010x})", addr.0, opcode)
            }
            Trap::MemoryFault { addr, kind } => {
                write!(f, "MemoryFault({kind} @ {:#010x})", addr.0)
            }
            Trap::UnregisteredFunction(addr) => {
                write!(f, "Unregistered PPU function at {:#010x}", addr.0)
            }
            Trap::Ret => write!(f, "Ret"),
        }
    }
}

impl std::error::Error for Trap {}
