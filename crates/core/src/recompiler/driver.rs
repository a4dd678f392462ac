//! The end-to-end recompile pipeline: partition, check the object cache,
//! translate, optimize, generate code, load, and publish into the
//! executable cache.

use crate::arena::CodeArena;
use crate::cache::handler::Handler;
use crate::cache::ExecutableCache;
use crate::common::addr::{GuestAddr, HostAddr};
use crate::common::error::CoreError;
use crate::recompiler::codegen::CodeGenBackend;
use crate::recompiler::hash::object_cache_name;
use crate::recompiler::ir::{self, IrTranslator};
use crate::recompiler::jit_memory::JitMemoryManager;
use crate::recompiler::object_cache::{CacheStore, ObjectCache};
use crate::recompiler::partition::{partition_module, FunctionRecord};

/// Ties together every recompiler stage for one registered module.
pub struct RecompilerDriver<'a, S, T, C> {
    arena: &'a CodeArena,
    cache: &'a ExecutableCache,
    object_cache: &'a ObjectCache<S>,
    translator: &'a T,
    backend: &'a C,
    max_part_bytes: u32,
}

impl<'a, S, T, C> RecompilerDriver<'a, S, T, C>
where
    S: CacheStore,
    T: IrTranslator,
    C: CodeGenBackend,
{
    /// Builds a driver over the given collaborators and sizing.
    #[must_use]
    pub fn new(
        arena: &'a CodeArena,
        cache: &'a ExecutableCache,
        object_cache: &'a ObjectCache<S>,
        translator: &'a T,
        backend: &'a C,
        max_part_bytes: u32,
    ) -> Self {
        Self {
            arena,
            cache,
            object_cache,
            translator,
            backend,
            max_part_bytes,
        }
    }

    /// Compiles every part of `module_name`'s `functions` and publishes a
    /// compiled entry into the executable cache for each function.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedObject`] if a compiled object fails to
    /// load, or [`CoreError::OutOfArena`] if the arena runs out of room.
    pub fn recompile_module(&self, module_name: &str, functions: &[FunctionRecord]) -> Result<usize, CoreError> {
        let parts = partition_module(module_name, functions, self.max_part_bytes);
        let mut published = 0;
        for part in &parts {
            let name = object_cache_name(part);
            let backend = self.backend;
            let translator = self.translator;
            let object_bytes = self.object_cache.get_or_compile(&name, || {
                let mut ir_module = translator.translate(&part.functions);
                ir::optimize(&mut ir_module);
                ir::verify(&ir_module)
                    .map_err(|reason| CoreError::IrVerificationFailed(part.name.clone(), reason))?;
                Ok(backend.compile(part, &ir_module))
            })?;

            let jit = JitMemoryManager::new(self.arena);
            let loaded = jit.load(&object_bytes)?;
            for function in &part.functions {
                let symbol = format!("fn_{:08x}", function.addr);
                let Some(loaded_function) = loaded.get(&symbol) else {
                    return Err(CoreError::LinkageFailure(symbol));
                };
                jit.finalize(loaded_function.host_addr, loaded_function.size.max(1))?;
                self.publish(function.addr, loaded_function.host_addr)?;
                published += 1;
            }
        }
        Ok(published)
    }

    /// Installs a compiled entry at `addr` in the executable cache, after
    /// verifying it lies inside the arena (the 32-bit compiled-entry
    /// containment invariant).
    fn publish(&self, addr: u32, host_addr: HostAddr) -> Result<(), CoreError> {
        if !self.arena.contains(host_addr.val()) {
            return Err(CoreError::OutOfArena {
                requested: 0,
                remaining: 0,
            });
        }
        let low = host_addr.truncate();
        debug_assert_eq!(HostAddr::widen(low, self.arena.high_bits()), host_addr);
        // SAFETY: the handler produced by a real backend honors this
        // crate's calling convention by contract (see `CodeGenBackend`); the
        // stub backend used in tests only exercises the load/publish path,
        // never the call path.
        let handler: Handler = unsafe { std::mem::transmute::<usize, Handler>(host_addr.val() as usize) };
        self.cache.install_function_at(GuestAddr::new(addr), handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::recompiler::codegen::StubCodeGenBackend;
    use crate::recompiler::ir::IrModule;
    use crate::recompiler::object_cache::FsCacheStore;

    struct PassthroughTranslator;
    impl IrTranslator for PassthroughTranslator {
        fn translate(&self, functions: &[FunctionRecord]) -> IrModule {
            IrModule {
                functions: functions.iter().map(|_| Default::default()).collect(),
            }
        }
    }

    #[test]
    fn recompiling_a_module_populates_the_object_cache() {
        let arena = CodeArena::reserve(&ArenaConfig {
            size_bytes: 4 * 1024 * 1024,
            base_low: 0x2000_0000,
            base_high: 0x7000_0000,
            probe_step: 0x0100_0000,
        })
        .unwrap();
        let cache = ExecutableCache::reserve().unwrap();
        cache.install_range(GuestAddr::new(0x8000_0000), 16);

        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::open(dir.path()).unwrap();
        let object_cache = ObjectCache::new(store);
        let translator = PassthroughTranslator;
        let backend = StubCodeGenBackend;

        let driver = RecompilerDriver::new(&arena, &cache, &object_cache, &translator, &backend, 1024 * 1024);
        let functions = vec![FunctionRecord {
            addr: 0x8000_0000,
            size: 16,
            toc: 0,
            instructions: vec![0; 16],
        }];
        let published = driver.recompile_module("mod.sprx", &functions).unwrap();
        assert_eq!(published, 1);
    }

    #[test]
    fn recompiling_twice_reuses_the_cached_object() {
        let arena = CodeArena::reserve(&ArenaConfig {
            size_bytes: 4 * 1024 * 1024,
            base_low: 0x2000_0000,
            base_high: 0x7000_0000,
            probe_step: 0x0100_0000,
        })
        .unwrap();
        let cache = ExecutableCache::reserve().unwrap();
        cache.install_range(GuestAddr::new(0x8000_0000), 16);

        let dir = tempfile::tempdir().unwrap();
        let store = FsCacheStore::open(dir.path()).unwrap();
        let object_cache = ObjectCache::new(store);
        let translator = PassthroughTranslator;
        let backend = StubCodeGenBackend;

        let driver = RecompilerDriver::new(&arena, &cache, &object_cache, &translator, &backend, 1024 * 1024);
        let functions = vec![FunctionRecord {
            addr: 0x8000_0000,
            size: 16,
            toc: 0,
            instructions: vec![0; 16],
        }];
        driver.recompile_module("mod.sprx", &functions).unwrap();
        let cached_name = object_cache_name(&partition_module("mod.sprx", &functions, 1024 * 1024)[0]);
        assert!(object_cache.store().contains(&cached_name).unwrap());
        let published_again = driver.recompile_module("mod.sprx", &functions).unwrap();
        assert_eq!(published_again, 1);
    }
}
