//! Code generation: the seam between this crate's IR and a real backend
//! (LLVM, in the system this was modeled on) that turns an [`IrModule`]
//! into relocatable object bytes.

use object::write::{Object, StandardSection, Symbol, SymbolFlags, SymbolKind, SymbolScope, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness};

use crate::recompiler::ir::IrModule;
use crate::recompiler::partition::ModulePart;

/// External collaborator turning an optimized [`IrModule`] into a
/// relocatable object file for one [`ModulePart`].
///
/// The real backend this stands in for runs the guest IR through its own
/// instruction selector and emits native machine code for the host
/// architecture; this crate only needs the resulting bytes, which is why
/// the boundary is drawn here rather than around an in-process compiler
/// API.
pub trait CodeGenBackend: Send + Sync {
    /// Compiles `module` (the lifted and optimized form of `part`) into an
    /// ELF relocatable object.
    fn compile(&self, part: &ModulePart, module: &IrModule) -> Vec<u8>;
}

/// A backend for tests and local development: emits a minimal valid ELF
/// object with one `.text` symbol per function and no real machine code,
/// via the `object` crate's writer. Exercises the object-cache and
/// JIT-loader paths against real object bytes without depending on an
/// actual code generator.
#[derive(Debug, Default)]
pub struct StubCodeGenBackend;

impl CodeGenBackend for StubCodeGenBackend {
    fn compile(&self, part: &ModulePart, _module: &IrModule) -> Vec<u8> {
        let mut object = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = object.section_id(StandardSection::Text);
        for function in &part.functions {
            let bytes = vec![0xC3; function.size.max(1) as usize];
            let offset = object.append_section_data(text, &bytes, 16);
            object.add_symbol(Symbol {
                name: format!("fn_{:08x}", function.addr).into_bytes(),
                value: offset,
                size: bytes.len() as u64,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
        }
        object.write().expect("in-memory ELF object writer should not fail")
    }
}
