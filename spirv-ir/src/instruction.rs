use smallvec::SmallVec;

use crate::{error::IrError, ids::Id};

bitflags::bitflags! {
    /// The loop-control hint bitmask carried by an `OpLoopMerge`.
    ///
    /// Mirrors the subset of `SPIR-V`'s `LoopControl` mask this crate cares about; unknown
    /// bits are preserved but never interpreted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoopControl: u32 {
        const NONE = 0;
        const UNROLL = 1 << 0;
        const DONT_UNROLL = 1 << 1;
        const DEPENDENCY_INFINITE = 1 << 2;
        const DEPENDENCY_LENGTH = 1 << 3;
    }
}

/// The kind of comparison an `OpXLessThan`-family instruction performs.
///
/// Only signed-less-than is meaningful to the legality checker, but the full
/// enumeration exists so condition blocks using other comparisons are rejected rather
/// than misinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    SLessThan,
    ULessThan,
    SGreaterThan,
    Equal,
    NotEqual,
}

/// The tag discriminating what an [Instruction] computes.
///
/// SPIR-V instructions are polymorphic over opcode; rather than modeling that with an
/// inheritance hierarchy, every opcode variant is a case of this enum, and the
/// surrounding [Instruction] provides a uniform set of accessors regardless of which
/// case is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// Marks the start of a basic block; its result id is the block id.
    Label,
    /// A module or function level 32-bit integer constant.
    ConstantInt { value: i64, signed: bool },
    /// A function parameter, materialized as a pseudo-instruction in the entry block.
    FunctionParameter,
    /// Selects a value based on which predecessor transferred control.
    Phi,
    IAdd,
    ISub,
    Compare(Cmp),
    /// A generic, opaque side-effecting operation (e.g. a store to memory).
    ///
    /// Stands in for the long tail of real SPIR-V memory/image/arithmetic opcodes that
    /// are irrelevant to the unroll transform itself: all that matters to the transform
    /// is whether an instruction reads/writes ids, not what it otherwise does.
    Effect,
    /// Structured-control marker naming the merge and continue (latch) targets of a loop.
    LoopMerge { merge: Id, continue_target: Id, control: LoopControl },
    /// Structured-control marker naming the merge target of a selection.
    SelectionMerge { merge: Id },
    Branch { target: Id },
    BranchConditional { condition: Id, true_target: Id, false_target: Id },
    Return,
    ReturnValue,
    Kill,
    Unreachable,
}

/// A single operand word: either a reference to another instruction's result id, or an
/// immediate literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Id(Id),
    Literal(i64),
}

impl Operand {
    #[inline]
    pub fn as_id(self) -> Option<Id> {
        match self {
            Operand::Id(id) => Some(id),
            Operand::Literal(_) => None,
        }
    }
}

/// A single SPIR-V instruction.
///
/// `result_type` and `result_id` are `Id::NONE` when absent.
/// `operands` holds only the "in" operands that are not already captured structurally
/// by the [Opcode] (branch/merge targets live on the opcode itself, since they are not
/// ordinary dataflow operands but are still ids that must be remapped when a block is
/// cloned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    opcode: Opcode,
    result_type: Id,
    result_id: Id,
    operands: SmallVec<[Operand; 4]>,
}

impl Instruction {
    pub fn new(opcode: Opcode, result_type: Id, result_id: Id, operands: &[Operand]) -> Self {
        Self {
            opcode,
            result_type,
            result_id,
            operands: SmallVec::from_slice(operands),
        }
    }

    #[inline]
    pub fn opcode(&self) -> &Opcode {
        &self.opcode
    }

    #[inline]
    pub fn opcode_mut(&mut self) -> &mut Opcode {
        &mut self.opcode
    }

    #[inline]
    pub fn result_id(&self) -> Id {
        self.result_id
    }

    #[inline]
    pub fn set_result_id(&mut self, id: Id) {
        self.result_id = id;
    }

    #[inline]
    pub fn result_type(&self) -> Id {
        self.result_type
    }

    #[inline]
    pub fn set_result_type(&mut self, ty: Id) {
        self.result_type = ty;
    }

    #[inline]
    pub fn has_result(&self) -> bool {
        self.result_id.is_some()
    }

    #[inline]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    #[inline]
    pub fn in_operand(&self, index: usize) -> Operand {
        self.operands[index]
    }

    #[inline]
    pub fn set_in_operand(&mut self, index: usize, operand: Operand) {
        self.operands[index] = operand;
    }

    pub fn push_operand(&mut self, operand: Operand) {
        self.operands.push(operand);
    }

    /// Visit every id named by an in-operand of this instruction, including ids
    /// embedded structurally in the opcode (branch targets, merge/continue targets).
    ///
    /// Literal operand words are skipped entirely: only ids are ever rewritten during
    /// cloning.
    pub fn for_each_in_id(&self, mut f: impl FnMut(Id)) {
        match &self.opcode {
            Opcode::Branch { target } => f(*target),
            Opcode::BranchConditional { condition, true_target, false_target } => {
                f(*condition);
                f(*true_target);
                f(*false_target);
            }
            Opcode::LoopMerge { merge, continue_target, .. } => {
                f(*merge);
                f(*continue_target);
            }
            Opcode::SelectionMerge { merge } => f(*merge),
            _ => {}
        }
        if self.result_type.is_some() {
            f(self.result_type);
        }
        for operand in &self.operands {
            if let Operand::Id(id) = operand {
                f(*id);
            }
        }
    }

    /// Mutable counterpart to [Self::for_each_in_id], used by the id rewriter when
    /// remapping a cloned block's operands.
    pub fn for_each_in_id_mut(&mut self, mut f: impl FnMut(&mut Id)) {
        match &mut self.opcode {
            Opcode::Branch { target } => f(target),
            Opcode::BranchConditional { condition, true_target, false_target } => {
                f(condition);
                f(true_target);
                f(false_target);
            }
            Opcode::LoopMerge { merge, continue_target, .. } => {
                f(merge);
                f(continue_target);
            }
            Opcode::SelectionMerge { merge } => f(merge),
            _ => {}
        }
        if self.result_type.is_some() {
            f(&mut self.result_type);
        }
        for operand in &mut self.operands {
            if let Operand::Id(id) = operand {
                f(id);
            }
        }
    }

    /// True if this instruction is a block terminator.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Branch { .. }
                | Opcode::BranchConditional { .. }
                | Opcode::Return
                | Opcode::ReturnValue
                | Opcode::Kill
                | Opcode::Unreachable
        )
    }

    /// True if this instruction is a structured-control marker (loop-merge or
    /// selection-merge).
    pub fn is_structured_control(&self) -> bool {
        matches!(self.opcode, Opcode::LoopMerge { .. } | Opcode::SelectionMerge { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.opcode, Opcode::Phi)
    }

    pub fn is_label(&self) -> bool {
        matches!(self.opcode, Opcode::Label)
    }

    /// Successor block ids of this instruction, if it is a terminator.
    pub fn successors(&self) -> SmallVec<[Id; 2]> {
        match &self.opcode {
            Opcode::Branch { target } => SmallVec::from_slice(&[*target]),
            Opcode::BranchConditional { true_target, false_target, .. } => {
                SmallVec::from_slice(&[*true_target, *false_target])
            }
            _ => SmallVec::new(),
        }
    }

    /// Build an `OpLabel` instruction with the given result id.
    pub fn label(id: Id) -> Self {
        Self::new(Opcode::Label, Id::NONE, id, &[])
    }

    /// Iterate the `(value, predecessor_label)` incoming pairs of a phi instruction.
    ///
    /// Panics if this instruction is not a phi; callers are expected to have already
    /// checked [Self::is_phi].
    pub fn phi_incoming(&self) -> impl Iterator<Item = (Id, Id)> + '_ {
        assert!(self.is_phi(), "phi_incoming called on a non-phi instruction");
        self.operands.chunks_exact(2).map(|pair| {
            let value = pair[0].as_id().expect("phi value operand must be an id");
            let label = pair[1].as_id().expect("phi predecessor operand must be an id");
            (value, label)
        })
    }

    /// Overwrite the incoming value paired with `predecessor`, keeping the label the
    /// same. Panics if no such incoming pair exists.
    pub fn set_phi_incoming_value(&mut self, predecessor: Id, new_value: Id) {
        assert!(self.is_phi(), "set_phi_incoming_value called on a non-phi instruction");
        for pair in self.operands.chunks_exact_mut(2) {
            if pair[1].as_id() == Some(predecessor) {
                pair[0] = Operand::Id(new_value);
                return;
            }
        }
        panic!("no incoming pair for predecessor {predecessor}");
    }

    /// Overwrite the incoming pair paired with `predecessor`, replacing both the value
    /// and the predecessor label itself.
    pub fn set_phi_incoming_pair(&mut self, old_predecessor: Id, new_value: Id, new_label: Id) {
        assert!(self.is_phi(), "set_phi_incoming_pair called on a non-phi instruction");
        for pair in self.operands.chunks_exact_mut(2) {
            if pair[1].as_id() == Some(old_predecessor) {
                pair[0] = Operand::Id(new_value);
                pair[1] = Operand::Id(new_label);
                return;
            }
        }
        panic!("no incoming pair for predecessor {old_predecessor}");
    }

    /// Fallible counterpart to [Self::phi_incoming]'s lookup: the value paired with
    /// `predecessor`, or [IrError::MissingPhiOperand] rather than a panic.
    ///
    /// Used by `spirv-unroll` wherever a missing phi operand is a *fatal transform
    /// error* rather than a programmer error — e.g. when the engine looks up the
    /// previous iteration's stepped value and the loop turns out to be malformed in a
    /// way the legality checker should have caught.
    pub fn phi_incoming_value(&self, predecessor: Id) -> Result<Id, IrError> {
        if !self.is_phi() {
            return Err(IrError::NotAPhi(self.result_id));
        }
        self.phi_incoming()
            .find(|(_, label)| *label == predecessor)
            .map(|(value, _)| value)
            .ok_or(IrError::MissingPhiOperand { phi: self.result_id, predecessor })
    }

    /// Fallible counterpart to [Self::set_phi_incoming_pair].
    pub fn set_phi_incoming_pair_checked(
        &mut self,
        old_predecessor: Id,
        new_value: Id,
        new_label: Id,
    ) -> Result<(), IrError> {
        if !self.is_phi() {
            return Err(IrError::NotAPhi(self.result_id));
        }
        for pair in self.operands.chunks_exact_mut(2) {
            if pair[1].as_id() == Some(old_predecessor) {
                pair[0] = Operand::Id(new_value);
                pair[1] = Operand::Id(new_label);
                return Ok(());
            }
        }
        Err(IrError::MissingPhiOperand { phi: self.result_id, predecessor: old_predecessor })
    }
}
