//! A minimal intermediate representation, just expressive enough to state
//! the three peephole rewrites the recompiler always runs, plus the
//! `IrTranslator` seam where a real guest-to-IR lifter plugs in.

use crate::recompiler::partition::FunctionRecord;

/// An SSA value reference: the index of the instruction that produced it.
pub type ValueId = usize;

/// A single IR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    /// A compile-time constant.
    Const(u64),
    /// A volatile load from guest memory at a (possibly non-constant)
    /// address.
    VolatileLoad { addr: ValueId },
    /// A volatile store of `value` to guest memory at `addr`.
    VolatileStore { addr: ValueId, value: ValueId },
    /// An indirect call through a syscall index held in a runtime register.
    SyscallIndirect { index: ValueId },
    /// A direct call to a known HLE syscall index.
    SyscallDirect { index: u32 },
    /// An instruction with no further-modeled side effect (arithmetic,
    /// branches, etc. are opaque to the peephole passes).
    Opaque,
}

/// One instruction in a block: its operation and whether any later
/// instruction consumes its result.
#[derive(Debug, Clone, PartialEq)]
pub struct IrInst {
    pub op: IrOp,
    pub used: bool,
}

/// A straight-line sequence of instructions with no internal control flow.
#[derive(Debug, Clone, Default)]
pub struct IrBlock {
    pub insts: Vec<IrInst>,
}

/// The lifted form of one guest function: its entry block plus any blocks
/// reachable from it, in layout order. This model only tracks the entry
/// block explicitly because the peephole passes in this codebase only
/// touch entry-block stores; traversal of successor blocks is the
/// translator's concern, not this crate's.
#[derive(Debug, Clone, Default)]
pub struct IrFunction {
    pub entry: IrBlock,
}

/// One lifted module: one `IrFunction` per guest function in the part, in
/// the same order as [`FunctionRecord`]s were supplied.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
}

/// External collaborator translating raw guest instruction bytes into this
/// crate's IR. A real implementation lifts PowerPC machine code; tests use
/// a trivial translator that maps pre-built `IrModule`s straight through.
pub trait IrTranslator: Send + Sync {
    /// Lifts `functions` into an [`IrModule`].
    fn translate(&self, functions: &[FunctionRecord]) -> IrModule;
}

/// Runs the fixed, named optimization pipeline over `module`, in place.
///
/// Passes run in this order and each one is idempotent, so running the
/// pipeline twice has no further effect:
/// 1. `direct_syscall_folding` — turns an indirect syscall dispatch through
///    a compile-time-constant index into a direct call.
/// 2. `dead_volatile_load_elimination` — drops volatile loads whose result
///    is never consumed.
/// 3. `dead_entry_store_elimination` — drops volatile stores of an
///    as-yet-unconstrained (`Const` never reached) value in the entry
///    block, which can only be dead initialization noise.
pub fn optimize(module: &mut IrModule) {
    for function in &mut module.functions {
        direct_syscall_folding(&mut function.entry);
        dead_volatile_load_elimination(&mut function.entry);
        dead_entry_store_elimination(&mut function.entry);
    }
}

/// Verifies that every value reference in `module` names a strictly
/// earlier instruction in the same block, so no instruction consumes a
/// value that has not yet been produced (or consumes its own output).
///
/// # Errors
///
/// Returns a description of the first out-of-order or out-of-range
/// reference found, naming the function index, instruction index, and
/// referenced value id.
pub fn verify(module: &IrModule) -> Result<(), String> {
    for (fn_index, function) in module.functions.iter().enumerate() {
        for (inst_index, inst) in function.entry.insts.iter().enumerate() {
            let refs: &[ValueId] = match &inst.op {
                IrOp::VolatileLoad { addr } | IrOp::SyscallIndirect { index: addr } => {
                    std::slice::from_ref(addr)
                }
                IrOp::VolatileStore { addr, value } => {
                    if *value >= inst_index {
                        return Err(format!(
                            "function {fn_index}: instruction {inst_index} references value {value} not yet produced"
                        ));
                    }
                    std::slice::from_ref(addr)
                }
                IrOp::Const(_) | IrOp::SyscallDirect { .. } | IrOp::Opaque => &[],
            };
            if let Some(&id) = refs.iter().find(|&&id| id >= inst_index) {
                return Err(format!(
                    "function {fn_index}: instruction {inst_index} references value {id} not yet produced"
                ));
            }
        }
    }
    Ok(())
}

fn direct_syscall_folding(block: &mut IrBlock) {
    for i in 0..block.insts.len() {
        if let IrOp::SyscallIndirect { index } = block.insts[i].op {
            if let Some(IrOp::Const(value)) = block.insts.get(index).map(|inst| inst.op.clone()) {
                if let Ok(index) = u32::try_from(value) {
                    block.insts[i].op = IrOp::SyscallDirect { index };
                }
            }
        }
    }
}

fn dead_volatile_load_elimination(block: &mut IrBlock) {
    let consumed = consumed_value_ids(block);
    for (i, inst) in block.insts.iter_mut().enumerate() {
        if matches!(inst.op, IrOp::VolatileLoad { .. }) {
            inst.used = consumed.contains(&i);
        }
    }
    block.insts.retain(|inst| !matches!(inst.op, IrOp::VolatileLoad { .. }) || inst.used);
}

fn dead_entry_store_elimination(block: &mut IrBlock) {
    block.insts.retain(|inst| {
        !matches!(
            &inst.op,
            IrOp::VolatileStore { value, .. } if matches!(block_op(block, *value), None)
        )
    });
}

fn block_op(block: &IrBlock, id: ValueId) -> Option<&IrOp> {
    block.insts.get(id).map(|inst| &inst.op)
}

fn consumed_value_ids(block: &IrBlock) -> std::collections::HashSet<ValueId> {
    let mut consumed = std::collections::HashSet::new();
    for inst in &block.insts {
        match &inst.op {
            IrOp::VolatileLoad { addr } | IrOp::SyscallIndirect { index: addr } => {
                consumed.insert(*addr);
            }
            IrOp::VolatileStore { addr, value } => {
                consumed.insert(*addr);
                consumed.insert(*value);
            }
            IrOp::Const(_) | IrOp::SyscallDirect { .. } | IrOp::Opaque => {}
        }
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(op: IrOp) -> IrInst {
        IrInst { op, used: false }
    }

    #[test]
    fn folds_indirect_syscall_with_constant_index() {
        let mut module = IrModule {
            functions: vec![IrFunction {
                entry: IrBlock {
                    insts: vec![inst(IrOp::Const(7)), inst(IrOp::SyscallIndirect { index: 0 })],
                },
            }],
        };
        optimize(&mut module);
        assert_eq!(module.functions[0].entry.insts[1].op, IrOp::SyscallDirect { index: 7 });
    }

    #[test]
    fn drops_unused_volatile_load() {
        let mut module = IrModule {
            functions: vec![IrFunction {
                entry: IrBlock {
                    insts: vec![inst(IrOp::Const(0x1000)), inst(IrOp::VolatileLoad { addr: 0 })],
                },
            }],
        };
        optimize(&mut module);
        assert!(module.functions[0]
            .entry
            .insts
            .iter()
            .all(|i| !matches!(i.op, IrOp::VolatileLoad { .. })));
    }

    #[test]
    fn keeps_volatile_load_when_consumed() {
        let mut module = IrModule {
            functions: vec![IrFunction {
                entry: IrBlock {
                    insts: vec![
                        inst(IrOp::Const(0x1000)),
                        inst(IrOp::VolatileLoad { addr: 0 }),
                        inst(IrOp::VolatileStore { addr: 0, value: 1 }),
                    ],
                },
            }],
        };
        optimize(&mut module);
        assert!(module.functions[0]
            .entry
            .insts
            .iter()
            .any(|i| matches!(i.op, IrOp::VolatileLoad { .. })));
    }

    #[test]
    fn drops_store_of_unconstrained_value_in_entry_block() {
        let mut module = IrModule {
            functions: vec![IrFunction {
                entry: IrBlock {
                    insts: vec![inst(IrOp::VolatileStore { addr: 99, value: 99 })],
                },
            }],
        };
        optimize(&mut module);
        assert!(module.functions[0].entry.insts.is_empty());
    }
}
