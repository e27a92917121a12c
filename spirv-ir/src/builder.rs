//! Small helpers for materializing the handful of instruction shapes the unroll
//! transform needs to fabricate: unconditional/conditional branches and 32-bit integer
//! constants. Everything else the transform does is cloning and rewriting existing
//! instructions, not building new ones from scratch.

use crate::{
    error::IrError,
    function::{Function, Module},
    ids::Id,
    instruction::{Instruction, Opcode, Operand},
};

/// Where a newly built instruction should land: a specific index within a specific
/// block's instruction list.
///
/// Mirrors the "insertion cursor" external interface; in this crate it is just a
/// plain `(block, index)` pair rather than an opaque handle, since every caller already
/// has the block in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub block: Id,
    pub index: usize,
}

/// Stateless builder for the unconditional-branch, conditional-branch, and integer
/// constant instruction shapes the transform fabricates.
///
/// Unlike a typical IR builder, this one never allocates a result id itself for
/// branches (they have none) and defers constant interning to [Module], which already
/// owns the dedup table.
pub struct InstructionBuilder;

impl InstructionBuilder {
    pub fn branch(target: Id) -> Instruction {
        Instruction::new(Opcode::Branch { target }, Id::NONE, Id::NONE, &[])
    }

    pub fn branch_conditional(condition: Id, true_target: Id, false_target: Id) -> Instruction {
        Instruction::new(
            Opcode::BranchConditional { condition, true_target, false_target },
            Id::NONE,
            Id::NONE,
            &[],
        )
    }

    /// Replace `block`'s terminator with an unconditional branch to `target`.
    pub fn set_branch(function: &mut Function, block: Id, target: Id) -> Result<(), IrError> {
        let block = function.block_mut(block)?;
        block.set_terminator(Self::branch(target));
        Ok(())
    }

    /// Replace `block`'s terminator with a conditional branch.
    pub fn set_branch_conditional(
        function: &mut Function,
        block: Id,
        condition: Id,
        true_target: Id,
        false_target: Id,
    ) -> Result<(), IrError> {
        let block = function.block_mut(block)?;
        block.set_terminator(Self::branch_conditional(condition, true_target, false_target));
        Ok(())
    }

    /// Materialize (or reuse) a 32-bit integer constant of `type_id` with `value`,
    /// signed if `value` is negative and unsigned otherwise.
    pub fn int_constant(module: &mut Module, type_id: Id, value: i64) -> Id {
        module.get_or_make_int_constant(type_id, value)
    }

    /// Build a phi instruction with the given `(value, predecessor)` incoming pairs.
    pub fn phi(result_type: Id, result_id: Id, incoming: &[(Id, Id)]) -> Instruction {
        let mut operands = Vec::with_capacity(incoming.len() * 2);
        for (value, label) in incoming {
            operands.push(Operand::Id(*value));
            operands.push(Operand::Id(*label));
        }
        Instruction::new(Opcode::Phi, result_type, result_id, &operands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BasicBlock, ids::IdAllocator};

    fn function_with_single_return(entry: Id) -> Function {
        let blocks =
            vec![BasicBlock::new(entry, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])])];
        Function::new(Id(100), "f", blocks)
    }

    #[test]
    fn set_branch_replaces_the_terminator() {
        let entry = Id(1);
        let target = Id(2);
        let mut function = function_with_single_return(entry);

        InstructionBuilder::set_branch(&mut function, entry, target).unwrap();

        let terminator = function.block(entry).unwrap().terminator();
        assert_eq!(terminator.successors().as_slice(), &[target]);
    }

    #[test]
    fn int_constant_is_deduplicated() {
        let mut module = Module::new(Vec::new(), IdAllocator::new(10));
        let ty = Id(1);

        let a = InstructionBuilder::int_constant(&mut module, ty, 4);
        let b = InstructionBuilder::int_constant(&mut module, ty, 4);
        let c = InstructionBuilder::int_constant(&mut module, ty, -4);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.constants().len(), 2);
    }
}
