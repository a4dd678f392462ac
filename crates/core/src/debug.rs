//! The debugger collaborator.

/// Notified by the breakpoint handler when execution reaches a breakpoint.
pub trait Debugger: Send + Sync {
    /// Called from the breakpoint handler before it waits for the debugger
    /// to resume the thread.
    fn notify(&self);
}

/// A debugger that does nothing, used when no external debugger is attached.
#[derive(Debug, Default)]
pub struct NullDebugger;

impl Debugger for NullDebugger {
    fn notify(&self) {}
}
