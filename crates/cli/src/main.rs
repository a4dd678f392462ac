//! PPU execution core CLI.
//!
//! The decoder tables, SELF/ELF loader, and HLE syscall registry are
//! external collaborators supplied by a host emulator; this binary cannot
//! boot a real PS3 title on its own. It exists to validate configuration
//! and to exercise the cache/interpreter/recompiler pipeline end to end
//! against synthetic guest code, the way a unit test would but from the
//! command line.

use std::fs;
use std::process;

use clap::{Parser, Subcommand};

use ppu_core::cache::handler::noop_handler;
use ppu_core::common::addr::GuestAddr;
use ppu_core::config::{ArenaConfig, Config};
use ppu_core::debug::NullDebugger;
use ppu_core::decoder::EmptyDecoderTable;
use ppu_core::recompiler::codegen::StubCodeGenBackend;
use ppu_core::recompiler::ir::{IrFunction, IrModule, IrTranslator};
use ppu_core::recompiler::object_cache::{FsCacheStore, ObjectCache};
use ppu_core::recompiler::{partition_module, FunctionRecord, RecompilerDriver};
use ppu_core::syscall::EmptySyscallRegistry;
use ppu_core::thread::{GuestThread, ThreadId};
use ppu_core::vm::FlatMemory;
use ppu_core::Runtime;

#[derive(Parser, Debug)]
#[command(
    name = "ppu",
    author,
    version,
    about = "PPU execution core driver",
    long_about = "Validate a configuration file and exercise the executable cache, \
threaded interpreter, and recompiler pipeline against synthetic guest code.\n\n\
Examples:\n  ppu config-check --path ppu.json\n  ppu selftest\n  ppu recompile-demo"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Loads a configuration file (or the defaults) and prints the resolved values.
    ConfigCheck {
        /// Path to a JSON configuration file; defaults are used if omitted.
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Builds a runtime over flat guest memory and dispatches one
    /// instruction, proving the cache/interpreter wiring is sound.
    Selftest,
    /// Partitions and compiles a small synthetic module through the
    /// recompiler pipeline, publishing its entries into a fresh cache.
    RecompileDemo,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::ConfigCheck { path } => cmd_config_check(path),
        Commands::Selftest => cmd_selftest(),
        Commands::RecompileDemo => cmd_recompile_demo(),
    }
}

fn cmd_config_check(path: Option<String>) {
    let config: Config = match path {
        Some(path) => {
            let contents = fs::read_to_string(&path).unwrap_or_else(|err| {
                eprintln!("error reading {path}: {err}");
                process::exit(1);
            });
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                eprintln!("error parsing {path}: {err}");
                process::exit(1);
            })
        }
        None => Config::default(),
    };

    println!("decoder.kind   = {:?}", config.decoder.kind);
    println!("decoder.cpu    = {}", config.decoder.cpu);
    println!("arena.size     = {} MiB", config.arena.size_bytes / (1024 * 1024));
    println!("max_part_bytes = {} KiB", config.runtime.max_part_bytes / 1024);
    println!("cache_path     = {}", config.cache_path);
}

fn selftest_config() -> Config {
    let mut config = Config::default();
    config.arena = ArenaConfig {
        size_bytes: 4 * 1024 * 1024,
        base_low: 0x2000_0000,
        base_high: 0x7000_0000,
        probe_step: 0x0100_0000,
    };
    config
}

fn build_runtime() -> Runtime {
    Runtime::new(
        selftest_config(),
        Box::new(EmptyDecoderTable),
        Box::new(NullDebugger),
        Box::new(EmptySyscallRegistry),
        Box::new(FlatMemory::new(0x10_0000)),
    )
    .unwrap_or_else(|err| {
        eprintln!("failed to construct runtime: {err}");
        process::exit(1);
    })
}

fn cmd_selftest() {
    let runtime = build_runtime();
    let entry = GuestAddr::new(0x1000);
    runtime.cache().install_range(entry, 16);
    for i in 0..4u32 {
        runtime.cache().install_function_at(GuestAddr::new(entry.val() + i * 4), noop_handler);
    }

    let mut thread = GuestThread::new(ThreadId(0), 8);
    thread.registers.cia = entry;
    ppu_core::interpreter::step_one(&runtime, &mut thread);

    println!("dispatched one instruction at {:#010x}", entry.val());
    println!("thread pc advanced to {:#010x}", thread.registers.cia.val());
}

struct PassthroughTranslator;

impl IrTranslator for PassthroughTranslator {
    fn translate(&self, functions: &[FunctionRecord]) -> IrModule {
        IrModule {
            functions: functions.iter().map(|_| IrFunction::default()).collect(),
        }
    }
}

fn cmd_recompile_demo() {
    let runtime = build_runtime();
    let functions = vec![FunctionRecord {
        addr: 0x8000_0000,
        size: 16,
        toc: 0,
        instructions: vec![0; 16],
    }];
    runtime.cache().install_range(GuestAddr::new(functions[0].addr), 4);

    let object_cache = match FsCacheStore::open(runtime.config().cache_path.as_str()) {
        Ok(store) => ObjectCache::new(store),
        Err(err) => {
            eprintln!("failed to open object cache: {err}");
            process::exit(1);
        }
    };
    let translator = PassthroughTranslator;
    let backend = StubCodeGenBackend;
    let driver = RecompilerDriver::new(
        runtime.arena(),
        runtime.cache(),
        &object_cache,
        &translator,
        &backend,
        runtime.config().runtime.max_part_bytes,
    );

    let parts = partition_module("demo.sprx", &functions, runtime.config().runtime.max_part_bytes);
    println!("partitioned into {} part(s)", parts.len());

    match driver.recompile_module("demo.sprx", &functions) {
        Ok(published) => println!("published {published} compiled entry(ies)"),
        Err(err) => {
            eprintln!("recompilation failed: {err}");
            process::exit(1);
        }
    }
}
