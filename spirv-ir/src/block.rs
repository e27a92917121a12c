use crate::{
    ids::Id,
    instruction::{Instruction, Opcode},
};

/// An ordered, non-empty list of instructions beginning with a label instruction whose
/// result id is the block's id.
///
/// A block may contain at most one structured-control instruction (`OpLoopMerge` or
/// `OpSelectionMerge`) immediately before its terminator, and terminates with exactly
/// one of: unconditional branch, conditional branch, return, return-value, kill, or
/// unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Construct a block from its label and the rest of its instructions, in order.
    ///
    /// # Panics
    ///
    /// Panics if `rest` does not end in a terminator, or contains an embedded label.
    pub fn new(label_id: Id, rest: Vec<Instruction>) -> Self {
        assert!(
            rest.last().is_some_and(Instruction::is_terminator),
            "basic block must end in a terminator"
        );
        assert!(
            !rest.iter().any(Instruction::is_label),
            "basic block body must not contain an embedded label"
        );
        let mut instructions = Vec::with_capacity(rest.len() + 1);
        instructions.push(Instruction::label(label_id));
        instructions.extend(rest);
        Self { instructions }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.instructions[0].result_id()
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[inline]
    pub fn instructions_mut(&mut self) -> &mut [Instruction] {
        &mut self.instructions
    }

    /// The instructions after the label, up to but not including the terminator.
    pub fn body(&self) -> &[Instruction] {
        &self.instructions[1..self.instructions.len() - 1]
    }

    #[inline]
    pub fn terminator(&self) -> &Instruction {
        self.instructions.last().expect("block is never empty")
    }

    #[inline]
    pub fn terminator_mut(&mut self) -> &mut Instruction {
        self.instructions.last_mut().expect("block is never empty")
    }

    pub fn set_terminator(&mut self, terminator: Instruction) {
        assert!(terminator.is_terminator(), "set_terminator requires a terminator instruction");
        *self.instructions.last_mut().expect("block is never empty") = terminator;
    }

    /// The structured-control instruction (loop-merge or selection-merge) immediately
    /// preceding the terminator, if present.
    pub fn structured_control(&self) -> Option<&Instruction> {
        let len = self.instructions.len();
        if len < 2 {
            return None;
        }
        self.instructions[len - 2].is_structured_control().then(|| &self.instructions[len - 2])
    }

    pub fn structured_control_mut(&mut self) -> Option<&mut Instruction> {
        let len = self.instructions.len();
        if len < 2 {
            return None;
        }
        let is_control = self.instructions[len - 2].is_structured_control();
        is_control.then(|| &mut self.instructions[len - 2])
    }

    /// Remove this block's loop-merge instruction, if present.
    ///
    /// Used when a header stops being a structured loop header, e.g. when its loop is
    /// fully unrolled.
    pub fn remove_loop_merge(&mut self) {
        if let Some(pos) = self
            .instructions
            .iter()
            .position(|inst| matches!(inst.opcode(), Opcode::LoopMerge { .. }))
        {
            self.instructions.remove(pos);
        }
    }

    /// Iterate the phi instructions at the head of this block (after the label).
    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().skip(1).take_while(|inst| inst.is_phi())
    }

    pub fn phis_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.instructions.iter_mut().skip(1).take_while(|inst| inst.is_phi())
    }

    /// Remove the phi instruction with the given result id, if present.
    pub fn remove_phi(&mut self, id: Id) {
        if let Some(pos) = self.instructions.iter().position(|inst| inst.is_phi() && inst.result_id() == id) {
            self.instructions.remove(pos);
        }
    }

    /// Insert an instruction immediately before the terminator (and before any
    /// structured-control marker, which must remain immediately adjacent to the
    /// terminator).
    pub fn insert_before_terminator(&mut self, inst: Instruction) {
        let insert_at = if self.structured_control().is_some() {
            self.instructions.len() - 2
        } else {
            self.instructions.len() - 1
        };
        self.instructions.insert(insert_at, inst);
    }

    pub fn push_phi(&mut self, phi: Instruction) {
        assert!(phi.is_phi());
        let insert_at = 1 + self.phis().count();
        self.instructions.insert(insert_at, phi);
    }
}
