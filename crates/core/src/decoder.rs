//! The instruction decoder table collaborator.
//!
//! Per-instruction PPC semantics are out of scope for this crate; it only
//! needs, for each decoder variant, a dense table mapping a decoded opcode
//! field to a handler pointer. The decoder tables themselves are supplied by
//! the host emulator.

use crate::cache::handler::Handler;
use crate::config::DecoderKind;

/// A decoder variant's dense opcode-to-handler table.
///
/// Implementors own the actual instruction semantics; this crate treats them
/// as an opaque lookup: a dense array indexed by the decoded opcode field,
/// returning a handler pointer.
pub trait DecoderTable: Send + Sync {
    /// Returns the handler that implements `opcode` under the given decoder
    /// kind (precise or fast; `Llvm` never reaches this — see
    /// `cache::handler::fallback_handler`).
    fn decode(&self, opcode: u32, kind: DecoderKind) -> Handler;
}

/// A decoder table with no specialized instructions, used in tests and as a
/// placeholder before the host emulator installs its real tables.
#[derive(Debug, Default)]
pub struct EmptyDecoderTable;

impl DecoderTable for EmptyDecoderTable {
    fn decode(&self, _opcode: u32, _kind: DecoderKind) -> Handler {
        crate::cache::handler::noop_handler
    }
}
