//! The LLVM recompiler: partitions a registered module, checks the
//! object cache, translates and optimizes IR, generates code, loads it
//! into the arena, and publishes compiled entries into the executable
//! cache.
//!
//! The stages are deliberately separable: [`partition`] and [`hash`] have
//! no dependency on a real code generator, so they are fully exercised on
//! their own, while [`ir::IrTranslator`] and [`codegen::CodeGenBackend`]
//! mark the seam where a real PowerPC lifter and a real backend plug in.

pub mod codegen;
pub mod driver;
pub mod hash;
pub mod ir;
pub mod jit_memory;
pub mod object_cache;
pub mod partition;

pub use driver::RecompilerDriver;
pub use partition::{partition_module, FunctionRecord, ModulePart};
