//! The module re-initialization collaborator.

use crate::runtime::Runtime;
use crate::thread::GuestThread;

/// Invoked by the command loop's *initialize* command to trigger full
/// module re-partitioning and recompilation.
///
/// What constitutes "the thread's current module" (which guest addresses,
/// which function bytes) is owned by the host emulator's loader; this
/// crate only provides the trigger point the command queue drains into.
pub trait ModuleInitializer: Send + Sync {
    /// Performs the reinitialization for `thread`'s current module.
    fn initialize(&self, runtime: &Runtime, thread: &mut GuestThread);
}

/// An initializer with no effect, used when no host loader is attached.
#[derive(Debug, Default)]
pub struct NullModuleInitializer;

impl ModuleInitializer for NullModuleInitializer {
    fn initialize(&self, _runtime: &Runtime, _thread: &mut GuestThread) {}
}
