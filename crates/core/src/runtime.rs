//! The process-wide runtime handle tying together the arena, cache,
//! reservation clock, and the external collaborators.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::arena::CodeArena;
use crate::cache::ExecutableCache;
use crate::common::addr::GuestAddr;
use crate::common::error::CoreError;
use crate::config::{Config, RuntimeConfig};
use crate::debug::Debugger;
use crate::decoder::DecoderTable;
use crate::initializer::ModuleInitializer;
use crate::syscall::SyscallRegistry;
use crate::thread::reservation::ReservationClock;
use crate::thread::{GuestThread, ThreadId};
use crate::vm::VirtualMemory;

/// Records of a function's expected TOC (`r2`) value, consulted by the
/// TOC-check handler.
#[derive(Debug, Default)]
pub struct TocTable {
    entries: Mutex<HashMap<u32, u64>>,
}

impl TocTable {
    /// Records the expected TOC for the function at `addr`.
    pub fn insert(&self, addr: GuestAddr, toc: u64) {
        self.entries.lock().expect("toc table lock poisoned").insert(addr.val(), toc);
    }

    /// Returns the expected TOC for the function at `addr`, if recorded.
    #[must_use]
    pub fn get(&self, addr: GuestAddr) -> Option<u64> {
        self.entries.lock().expect("toc table lock poisoned").get(&addr.val()).copied()
    }
}

/// The arena of guest threads owned by this runtime.
///
/// Threads are looked up by [`ThreadId`]; nothing outside this registry
/// holds a long-lived reference to a `GuestThread`, which is how the
/// runtime and its threads avoid an ownership cycle.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: Mutex<HashMap<ThreadId, GuestThread>>,
    next_id: Mutex<u32>,
}

impl ThreadRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a new guest thread at `stack_base`, allocating
    /// its stack (clearing *suspend*/*memory*) before it is registered.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StackOverflow`] if the stack region would
    /// overflow the 32-bit address space.
    pub fn spawn(
        &self,
        command_queue_capacity: usize,
        stack_base: u32,
        runtime_config: &RuntimeConfig,
    ) -> Result<ThreadId, CoreError> {
        let mut next_id = self.next_id.lock().expect("thread registry lock poisoned");
        let id = ThreadId(*next_id);
        *next_id += 1;
        let mut thread = GuestThread::new(id, command_queue_capacity);
        thread.allocate_stack(stack_base, runtime_config)?;
        self.threads.lock().expect("thread registry lock poisoned").insert(id, thread);
        Ok(id)
    }

    /// Runs `f` with exclusive access to the thread registered under `id`.
    pub fn with_thread<R>(&self, id: ThreadId, f: impl FnOnce(&mut GuestThread) -> R) -> Option<R> {
        let mut threads = self.threads.lock().expect("thread registry lock poisoned");
        threads.get_mut(&id).map(f)
    }

    /// Removes the thread registered under `id`, freeing its context.
    pub fn retire(&self, id: ThreadId) {
        self.threads.lock().expect("thread registry lock poisoned").remove(&id);
    }

    /// Returns the number of currently registered threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.lock().expect("thread registry lock poisoned").len()
    }

    /// Returns `true` if no threads are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The process-wide handle passed to every handler, command, and
/// recompiler call.
///
/// Constructed once per process; the arena, executable cache, and
/// reservation clock are the global, initialization-once singletons this
/// crate owns, while the decoder, debugger, syscall registry, and virtual
/// memory are external collaborators supplied by the host emulator.
pub struct Runtime {
    config: Config,
    arena: CodeArena,
    cache: ExecutableCache,
    reservation_clock: ReservationClock,
    toc_table: TocTable,
    threads: ThreadRegistry,
    decoder: Box<dyn DecoderTable>,
    debugger: Box<dyn Debugger>,
    syscalls: Box<dyn SyscallRegistry>,
    vm: Box<dyn VirtualMemory>,
    initializer: Box<dyn ModuleInitializer>,
}

impl Runtime {
    /// Constructs the runtime: reserves the code arena and the executable
    /// cache, and takes ownership of the supplied collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ArenaUnplaceable`] or [`CoreError::OutOfArena`]
    /// if either reservation fails.
    pub fn new(
        config: Config,
        decoder: Box<dyn DecoderTable>,
        debugger: Box<dyn Debugger>,
        syscalls: Box<dyn SyscallRegistry>,
        vm: Box<dyn VirtualMemory>,
    ) -> Result<Self, CoreError> {
        Self::with_initializer(
            config,
            decoder,
            debugger,
            syscalls,
            vm,
            Box::new(crate::initializer::NullModuleInitializer),
        )
    }

    /// As [`Runtime::new`], additionally taking an explicit
    /// [`ModuleInitializer`] collaborator instead of defaulting to a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ArenaUnplaceable`] or [`CoreError::OutOfArena`]
    /// if either reservation fails.
    pub fn with_initializer(
        config: Config,
        decoder: Box<dyn DecoderTable>,
        debugger: Box<dyn Debugger>,
        syscalls: Box<dyn SyscallRegistry>,
        vm: Box<dyn VirtualMemory>,
        initializer: Box<dyn ModuleInitializer>,
    ) -> Result<Self, CoreError> {
        let arena = CodeArena::reserve(&config.arena)?;
        let cache = ExecutableCache::reserve()?;
        Ok(Self {
            config,
            arena,
            cache,
            reservation_clock: ReservationClock::new(),
            toc_table: TocTable::default(),
            threads: ThreadRegistry::new(),
            decoder,
            debugger,
            syscalls,
            vm,
            initializer,
        })
    }

    /// Spawns a guest thread at `stack_base` using this runtime's
    /// configured stack size and command queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StackOverflow`] if the stack region would
    /// overflow the 32-bit address space.
    pub fn spawn_thread(&self, stack_base: u32) -> Result<ThreadId, CoreError> {
        self.threads.spawn(self.config.runtime.command_queue_capacity, stack_base, &self.config.runtime)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The reserved code arena.
    #[must_use]
    pub fn arena(&self) -> &CodeArena {
        &self.arena
    }

    /// The executable cache.
    #[must_use]
    pub fn cache(&self) -> &ExecutableCache {
        &self.cache
    }

    /// The reservation clock backing `lwarx`/`stwcx`.
    #[must_use]
    pub fn reservation_clock(&self) -> &ReservationClock {
        &self.reservation_clock
    }

    /// The TOC-check table.
    #[must_use]
    pub fn toc_table(&self) -> &TocTable {
        &self.toc_table
    }

    /// The guest thread registry.
    #[must_use]
    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// The instruction decoder table collaborator.
    #[must_use]
    pub fn decoder(&self) -> &dyn DecoderTable {
        self.decoder.as_ref()
    }

    /// The debugger collaborator.
    #[must_use]
    pub fn debugger(&self) -> &dyn Debugger {
        self.debugger.as_ref()
    }

    /// The HLE syscall registry collaborator.
    #[must_use]
    pub fn syscalls(&self) -> &dyn SyscallRegistry {
        self.syscalls.as_ref()
    }

    /// The guest virtual memory collaborator.
    #[must_use]
    pub fn vm(&self) -> &dyn VirtualMemory {
        self.vm.as_ref()
    }

    /// The module re-initialization collaborator.
    #[must_use]
    pub fn initializer(&self) -> &dyn ModuleInitializer {
        self.initializer.as_ref()
    }
}
