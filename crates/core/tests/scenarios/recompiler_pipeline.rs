//! End-to-end recompiler scenario: partitioning a two-function module,
//! compiling each part exactly once, and publishing compiled entries into
//! a real `Runtime`'s executable cache.

use ppu_core::cache::handler::fallback_handler;
use ppu_core::common::addr::GuestAddr;
use ppu_core::recompiler::codegen::StubCodeGenBackend;
use ppu_core::recompiler::ir::{IrModule, IrTranslator};
use ppu_core::recompiler::object_cache::{FsCacheStore, ObjectCache};
use ppu_core::recompiler::{partition_module, FunctionRecord, RecompilerDriver};

use crate::common::test_runtime;

struct PassthroughTranslator;

impl IrTranslator for PassthroughTranslator {
    fn translate(&self, functions: &[FunctionRecord]) -> IrModule {
        IrModule {
            functions: functions.iter().map(|_| Default::default()).collect(),
        }
    }
}

#[test]
fn a_two_function_module_splits_into_two_parts_and_both_publish() {
    let runtime = test_runtime(0x10_0000);
    let functions = vec![
        FunctionRecord {
            addr: 0x8000_0000,
            size: 512 * 1024,
            toc: 0x1000,
            instructions: vec![0; 16],
        },
        FunctionRecord {
            addr: 0x8008_0000,
            size: 600 * 1024,
            toc: 0x1000,
            instructions: vec![1; 16],
        },
    ];
    let parts = partition_module("liblv2.sprx", &functions, 1024 * 1024);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[1].name, "liblv2.sprx+080000");

    runtime.cache().install_range(GuestAddr::new(0x8000_0000), 4);
    runtime.cache().install_range(GuestAddr::new(0x8008_0000), 4);

    let dir = tempfile::tempdir().unwrap();
    let store = FsCacheStore::open(dir.path()).unwrap();
    let object_cache = ObjectCache::new(store);
    let translator = PassthroughTranslator;
    let backend = StubCodeGenBackend;

    let driver = RecompilerDriver::new(
        runtime.arena(),
        runtime.cache(),
        &object_cache,
        &translator,
        &backend,
        1024 * 1024,
    );
    let published = driver.recompile_module("liblv2.sprx", &functions).unwrap();
    assert_eq!(published, 2);

    for function in &functions {
        let resolved = runtime.cache().resolve(GuestAddr::new(function.addr)) as usize;
        assert_ne!(
            resolved,
            fallback_handler as usize,
            "a published compiled entry must replace the fallback handler"
        );
    }
}
