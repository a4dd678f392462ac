//! The HLE syscall registry collaborator.

/// A host function implementing one HLE syscall handler, invoked with the
/// owning guest thread.
pub type HleHandler = fn(&crate::runtime::Runtime, &mut crate::thread::GuestThread);

/// Resolves syscall indices to host handlers and names.
pub trait SyscallRegistry: Send + Sync {
    /// Returns the host handler for `index`, if one is registered.
    fn get(&self, index: u32) -> Option<HleHandler>;
    /// Returns the human-readable name of the syscall at `index`, for logging.
    fn name(&self, index: u32) -> Option<&str>;
}

/// A syscall registry with no entries, used in tests.
#[derive(Debug, Default)]
pub struct EmptySyscallRegistry;

impl SyscallRegistry for EmptySyscallRegistry {
    fn get(&self, _index: u32) -> Option<HleHandler> {
        None
    }

    fn name(&self, _index: u32) -> Option<&str> {
        None
    }
}
