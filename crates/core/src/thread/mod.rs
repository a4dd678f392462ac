//! Guest thread context: registers, reservation, command queue, and the
//! cooperative state-flag bitfield checked at scheduling points.

pub mod call;
pub mod command_loop;
pub mod command_queue;
pub mod registers;
pub mod reservation;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::park;

use bitflags::bitflags;

use crate::common::error::{CoreError, Trap};
use crate::config::RuntimeConfig;
use command_queue::CommandQueue;
use registers::Registers;
use reservation::Reservation;

/// Identifies a guest thread within the runtime's [`crate::runtime::ThreadRegistry`].
///
/// Threads hold only this integer back-reference, never a pointer to the
/// runtime itself, so the runtime and its threads never form an ownership
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

bitflags! {
    /// The cooperative scheduling bitfield, checked at well-defined points:
    /// between instruction blocks in the interpreter, after every command
    /// in the command loop, and inside handlers that call back into the
    /// runtime (syscalls, sleep, `lwarx`/`stwcx`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u32 {
        /// The thread should block until resumed.
        const SUSPEND = 1 << 0;
        /// The thread is waiting on a memory operation to complete.
        const MEMORY  = 1 << 1;
        /// A debugger has requested the thread pause.
        const PAUSE   = 1 << 2;
        /// The thread should unwind and terminate.
        const STOP    = 1 << 3;
        /// The thread should unwind and exit the process.
        const EXIT    = 1 << 4;
        /// Sentinel non-local return from `fast_call`'s scope guard.
        const RET     = 1 << 5;
    }
}

/// An atomic holder for [`StateFlags`], shared between a guest thread and
/// whatever external code (debugger, scheduler) requests a state change.
#[derive(Debug, Default)]
pub struct StateFlagsCell {
    bits: AtomicU32,
    lock: Mutex<()>,
    resumed: Condvar,
}

impl StateFlagsCell {
    /// Returns the currently set flags.
    #[must_use]
    pub fn get(&self) -> StateFlags {
        StateFlags::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Returns `true` if any flag is set, i.e. a scheduling check is due.
    #[must_use]
    pub fn any(&self) -> bool {
        !self.get().is_empty()
    }

    /// Sets the *pause* flag.
    pub fn set_pause(&self) {
        self.bits.fetch_or(StateFlags::PAUSE.bits(), Ordering::AcqRel);
    }

    /// Sets the *ret* flag.
    pub fn set_ret(&self) {
        self.bits.fetch_or(StateFlags::RET.bits(), Ordering::AcqRel);
    }

    /// Clears the *ret* flag, absorbing it.
    pub fn clear_ret(&self) {
        self.bits.fetch_and(!StateFlags::RET.bits(), Ordering::AcqRel);
    }

    /// Clears the *pause* flag and wakes any thread parked in
    /// `wait_while_paused`.
    pub fn clear_pause(&self) {
        let _guard = self.lock.lock().expect("state flags lock poisoned");
        self.bits.fetch_and(!StateFlags::PAUSE.bits(), Ordering::AcqRel);
        self.resumed.notify_all();
    }

    /// Blocks the calling thread while *pause* is set.
    pub fn wait_while_paused(&self) {
        let mut guard = self.lock.lock().expect("state flags lock poisoned");
        while self.get().contains(StateFlags::PAUSE) {
            guard = self.resumed.wait(guard).expect("state flags lock poisoned");
        }
    }
}

/// A guest thread's stack region: `[base, base+size)`, with a
/// `guard_bytes`-sized inaccessible guard page immediately below `base`.
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    /// Lowest addressable byte of the stack.
    pub base: u32,
    /// Size of the stack region in bytes.
    pub size: u32,
    /// Size of the inaccessible guard page below `base`.
    pub guard_bytes: u32,
}

/// One guest thread's full context.
pub struct GuestThread {
    /// This thread's identifier in the owning [`crate::runtime::ThreadRegistry`].
    pub id: ThreadId,
    /// Architectural register file.
    pub registers: Registers,
    /// Current load-linked/store-conditional reservation.
    pub reservation: Reservation,
    /// Cooperative scheduling flags.
    pub flags: StateFlagsCell,
    /// Pending command ring.
    pub commands: CommandQueue,
    /// Name of the most recently entered guest function, retained across
    /// unwinding so crash diagnostics keep the innermost guest frame.
    pub last_function: Option<&'static str>,
    /// This thread's guest stack region, once allocated.
    pub stack: Option<StackRegion>,
    trap: Mutex<Option<Trap>>,
}

impl GuestThread {
    /// Creates a new, suspended guest thread with the given identifier and
    /// command queue capacity. Threads start with *suspend* and *memory*
    /// set; the owning runtime clears them once the guest stack has been
    /// allocated.
    #[must_use]
    pub fn new(id: ThreadId, command_queue_capacity: usize) -> Self {
        let flags = StateFlagsCell::default();
        flags.bits.store(
            (StateFlags::SUSPEND | StateFlags::MEMORY).bits(),
            Ordering::Release,
        );
        Self {
            id,
            registers: Registers::default(),
            reservation: Reservation::NONE,
            flags,
            commands: CommandQueue::new(command_queue_capacity),
            last_function: None,
            stack: None,
            trap: Mutex::new(None),
        }
    }

    /// Allocates this thread's guest stack region and clears the *suspend*
    /// and *memory* flags set at construction, completing the lifecycle
    /// step "initialized by allocating a guest stack". Sets `gpr[1]` (the
    /// stack pointer) to the top of the region, since the PPU stack grows
    /// downward.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StackOverflow`] if `config.min_stack_bytes`
    /// would push the region past the top of the 32-bit address space.
    pub fn allocate_stack(&mut self, base: u32, config: &RuntimeConfig) -> Result<(), CoreError> {
        let size = config.min_stack_bytes;
        let top = base.checked_add(size).ok_or(CoreError::StackOverflow {
            sp: base,
            requested: size,
            base,
        })?;
        self.stack = Some(StackRegion {
            base,
            size,
            guard_bytes: config.stack_guard_bytes,
        });
        self.registers.gpr[1] = u64::from(top);
        self.flags
            .bits
            .fetch_and(!(StateFlags::SUSPEND | StateFlags::MEMORY).bits(), Ordering::AcqRel);
        Ok(())
    }

    /// Checks that `requested` bytes can be pushed below the current stack
    /// pointer without entering the guard page below the stack's base.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StackOverflow`] naming the current SP, the
    /// requested size, and the stack base.
    ///
    /// # Panics
    ///
    /// Panics if called before [`GuestThread::allocate_stack`].
    pub fn stack_push_check(&self, requested: u32) -> Result<(), CoreError> {
        let region = self.stack.as_ref().expect("stack not yet allocated");
        let sp = self.registers.gpr[1] as u32;
        if sp.saturating_sub(requested) < region.base {
            return Err(CoreError::StackOverflow {
                sp,
                requested,
                base: region.base,
            });
        }
        Ok(())
    }

    /// Records a fatal guest trap, to be observed by the caller of the
    /// current dispatch step.
    pub fn raise(&mut self, trap: Trap) {
        if trap == Trap::Ret {
            self.flags.set_ret();
            return;
        }
        *self.trap.lock().expect("trap slot lock poisoned") = Some(trap);
        self.flags.bits.fetch_or(StateFlags::STOP.bits(), Ordering::AcqRel);
    }

    /// Takes the most recently raised trap, if any, clearing it.
    pub fn take_trap(&self) -> Option<Trap> {
        self.trap.lock().expect("trap slot lock poisoned").take()
    }

    /// Parks the calling OS thread until woken; used by `Sleep` commands
    /// and blocking syscalls pending the external scheduler collaborator.
    pub fn park_until_woken(&self) {
        park();
    }
}

impl std::fmt::Debug for GuestThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestThread")
            .field("id", &self.id)
            .field("cia", &self.registers.cia)
            .field("flags", &self.flags.get())
            .finish_non_exhaustive()
    }
}

/// Validates that a command-queue tag byte is one of the recognized
/// commands; stray tags indicate ring corruption.
pub fn validate_tag(tag: u8) -> Result<(), CoreError> {
    if tag < 7 {
        Ok(())
    } else {
        Err(CoreError::CommandQueueCorruption(tag))
    }
}
