//! The per-thread command ring queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::common::error::CoreError;

/// One entry popped from a guest thread's command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Decode once under the fast interpreter and execute.
    Opcode(u32),
    /// Assign `gpr[index]`.
    SetGpr {
        /// Register index.
        index: u8,
        /// Value to assign.
        value: u64,
    },
    /// Assign `gpr[3..3+values.len()]`, at most 8 values.
    SetArgs {
        /// Argument values, assigned starting at `gpr[3]`.
        values: Vec<u64>,
    },
    /// Call a guest function descriptor `(entry, toc)` read from guest memory.
    LleCall {
        /// Address of the `(entry, toc)` descriptor in guest memory.
        descriptor: u32,
    },
    /// Invoke the HLE handler registered at `index`.
    HleCall {
        /// Syscall registry index.
        index: u32,
    },
    /// Trigger full module re-initialization (partition + compile).
    Initialize,
    /// Yield via the external scheduler collaborator.
    Sleep,
}

/// A fixed-capacity FIFO ring of [`Command`]s, with a blocking pop used by
/// the guest thread's main loop.
///
/// Push writes the tail of a multi-word command before publishing the head,
/// so a concurrent consumer never observes a torn head; in this in-memory
/// model that ordering is provided by the queue's own mutex rather than by
/// raw ring-buffer slot writes.
#[derive(Debug)]
pub struct CommandQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Command>>,
    not_empty: Condvar,
}

impl CommandQueue {
    /// Creates an empty queue with room for `capacity` commands.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `command` onto the tail of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CommandQueueCorruption`] if the queue is full.
    pub fn push(&self, command: Command) -> Result<(), CoreError> {
        let mut queue = self.inner.lock().expect("command queue lock poisoned");
        if queue.len() >= self.capacity {
            return Err(CoreError::CommandQueueCorruption(0xFF));
        }
        queue.push_back(command);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the head command, blocking until one is available.
    #[must_use]
    pub fn pop_blocking(&self) -> Command {
        let mut queue = self.inner.lock().expect("command queue lock poisoned");
        while queue.is_empty() {
            queue = self.not_empty.wait(queue).expect("command queue lock poisoned");
        }
        queue.pop_front().expect("queue non-empty under lock")
    }

    /// Pops the head command if one is present, without blocking.
    pub fn try_pop(&self) -> Option<Command> {
        self.inner.lock().expect("command queue lock poisoned").pop_front()
    }

    /// Returns the number of commands currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("command queue lock poisoned").len()
    }

    /// Returns `true` if the queue holds no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
