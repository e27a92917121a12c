use spirv_ir::{Cmp, Function, Id, Instruction, Module, Opcode};

use crate::loop_forest::Loop;

/// The header phi recognized as a loop's induction variable, plus the pieces needed to
/// rewrite it during unrolling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InductionVariable {
    /// The phi instruction's own result id.
    pub phi: Id,
    /// `(initial_value_id, pre_header_id)`.
    pub init: Id,
    /// `(stepped_value_id, latch_id)` — the value produced by the step instruction.
    pub stepped: Id,
    /// The id of the `OpIAdd`/`OpISub` instruction that produces `stepped`.
    pub step_inst: Id,
    /// True if the step instruction is `OpISub` (so the effective step is negative).
    pub step_is_subtract: bool,
}

/// Find the header phi that matches the induction-variable shape: exactly two
/// incoming pairs, one from the pre-header and one from the latch, where the
/// latch-side value is produced by an integer add/subtract of the phi and a
/// compile-time constant.
///
/// Returns `None` if the header has no phi, or if no phi matches the shape — the
/// legality checker treats either as a rejection.
pub fn find_induction_variable(function: &Function, loop_: &Loop) -> Option<InductionVariable> {
    let header = function.block(loop_.header()).ok()?;
    for phi in header.phis() {
        let Some(iv) = induction_shape(function, loop_, phi) else { continue };
        return Some(iv);
    }
    None
}

fn induction_shape(function: &Function, loop_: &Loop, phi: &Instruction) -> Option<InductionVariable> {
    let mut init = None;
    let mut stepped = None;
    for (value, label) in phi.phi_incoming() {
        if label == loop_.preheader() {
            init = Some(value);
        } else if label == loop_.latch() {
            stepped = Some(value);
        }
    }
    let (init, stepped) = (init?, stepped?);

    let latch = function.block(loop_.latch()).ok()?;
    let step_inst = latch.instructions().iter().find(|inst| inst.result_id() == stepped)?;
    let (step_is_subtract, lhs, rhs) = match step_inst.opcode() {
        Opcode::IAdd => (false, step_inst.in_operand(0).as_id()?, step_inst.in_operand(1).as_id()?),
        Opcode::ISub => (true, step_inst.in_operand(0).as_id()?, step_inst.in_operand(1).as_id()?),
        _ => return None,
    };
    if lhs != phi.result_id() && rhs != phi.result_id() {
        return None;
    }

    Some(InductionVariable {
        phi: phi.result_id(),
        init,
        stepped,
        step_inst: step_inst.result_id(),
        step_is_subtract,
    })
}

/// The induction variable's statically known init/step/bound/iteration-count, derived
/// from the phi and the condition block's signed-less-than comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCount {
    pub init: i64,
    pub step: i64,
    pub bound: i64,
    /// The number of times the body executes; always `>= 0`.
    pub iterations: u32,
    /// The type id of the induction variable (and thus of the bound constant), needed
    /// to materialize the residual-unroll bound constant.
    pub type_id: Id,
}

/// The `OpSLessThan` (or similar) comparison instruction whose result feeds the
/// condition block's conditional branch, found by scanning the block for the
/// instruction that defines the branch's condition operand.
pub fn condition_compare<'f>(function: &'f Function, condition_block: Id) -> Option<&'f Instruction> {
    let block = function.block(condition_block).ok()?;
    let Opcode::BranchConditional { condition, .. } = block.terminator().opcode() else { return None };
    block.instructions().iter().find(|inst| inst.result_id() == *condition)
}

/// Compute `(init, step, bound, iterations)` for `induction`, given the loop's
/// condition block.
///
/// Requires the comparison to be `OpSLessThan` against a compile-time integer constant,
/// and the induction phi's initial value to also be a compile-time integer constant
///; returns `None` if either requirement is not met, which the legality
/// checker treats as a rejection.
pub fn find_number_of_iterations(
    module: &Module,
    function: &Function,
    induction: &InductionVariable,
    condition_block: Id,
) -> Option<IterationCount> {
    let compare = condition_compare(function, condition_block)?;
    if !matches!(compare.opcode(), Opcode::Compare(Cmp::SLessThan)) {
        return None;
    }
    let lhs = compare.in_operand(0).as_id()?;
    let rhs = compare.in_operand(1).as_id()?;
    let (induction_operand, bound_operand) =
        if lhs == induction.phi { (lhs, rhs) } else if rhs == induction.phi { (rhs, lhs) } else { return None };
    let _ = induction_operand;

    let (bound, type_id) = int_constant_value(module, function, bound_operand)?;
    let (init, init_type) = int_constant_value(module, function, induction.init)?;

    let step_inst = find_instruction(function, induction.step_inst)?;
    let other_operand = if step_inst.in_operand(0).as_id() == Some(induction.phi) {
        step_inst.in_operand(1)
    } else {
        step_inst.in_operand(0)
    };
    let step_id = other_operand.as_id()?;
    let (mut step, _) = int_constant_value(module, function, step_id)?;
    if induction.step_is_subtract {
        step = -step;
    }
    if step <= 0 {
        return None;
    }
    let _ = init_type;

    let span = bound - init;
    let iterations = if span <= 0 { 0 } else { ((span + step - 1) / step) as u32 };

    Some(IterationCount { init, step, bound, iterations, type_id })
}

fn find_instruction<'f>(function: &'f Function, id: Id) -> Option<&'f Instruction> {
    function.blocks().iter().find_map(|block| block.instructions().iter().find(|inst| inst.result_id() == id))
}

fn int_constant_value(module: &Module, function: &Function, id: Id) -> Option<(i64, Id)> {
    if let Some(inst) = module.constants().iter().find(|inst| inst.result_id() == id) {
        if let Opcode::ConstantInt { value, .. } = inst.opcode() {
            return Some((*value, inst.result_type()));
        }
    }
    for block in function.blocks() {
        if let Some(inst) = block.instructions().iter().find(|inst| inst.result_id() == id) {
            if let Opcode::ConstantInt { value, .. } = inst.opcode() {
                return Some((*value, inst.result_type()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use spirv_ir::{BasicBlock, CfgIndex, DominatorTree, IdAllocator, LoopControl, Operand};

    use super::*;
    use crate::loop_forest::LoopForest;

    /// `for (i = 0; i < 4; i++) { effect(i); }`
    fn counting_loop() -> (Module, Function, LoopId) {
        use spirv_ir::Instruction;

        let entry = Id(1);
        let header = Id(2);
        let body = Id(3);
        let latch = Id(4);
        let merge = Id(5);
        let ty = Id(10);
        let zero = Id(11);
        let one = Id(12);
        let four = Id(13);
        let phi = Id(20);
        let stepped = Id(21);
        let cond = Id(22);

        let blocks = vec![
            BasicBlock::new(entry, vec![Instruction::new(Opcode::Branch { target: header }, Id::NONE, Id::NONE, &[])]),
            BasicBlock::new(
                header,
                vec![
                    Instruction::new(
                        Opcode::Phi,
                        ty,
                        phi,
                        &[Operand::Id(zero), Operand::Id(entry), Operand::Id(stepped), Operand::Id(latch)],
                    ),
                    Instruction::new(
                        Opcode::LoopMerge { merge, continue_target: latch, control: LoopControl::UNROLL },
                        Id::NONE,
                        Id::NONE,
                        &[],
                    ),
                    Instruction::new(Opcode::Branch { target: body }, Id::NONE, Id::NONE, &[]),
                ],
            ),
            BasicBlock::new(
                body,
                vec![
                    Instruction::new(
                        Opcode::Compare(Cmp::SLessThan),
                        Id::NONE,
                        cond,
                        &[Operand::Id(phi), Operand::Id(four)],
                    ),
                    Instruction::new(
                        Opcode::BranchConditional { condition: cond, true_target: latch, false_target: merge },
                        Id::NONE,
                        Id::NONE,
                        &[],
                    ),
                ],
            ),
            BasicBlock::new(
                latch,
                vec![
                    Instruction::new(
                        Opcode::IAdd,
                        ty,
                        stepped,
                        &[Operand::Id(phi), Operand::Id(one)],
                    ),
                    Instruction::new(Opcode::Branch { target: header }, Id::NONE, Id::NONE, &[]),
                ],
            ),
            BasicBlock::new(merge, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])]),
        ];

        let constants = vec![
            Instruction::new(Opcode::ConstantInt { value: 0, signed: false }, ty, zero, &[]),
            Instruction::new(Opcode::ConstantInt { value: 1, signed: false }, ty, one, &[]),
            Instruction::new(Opcode::ConstantInt { value: 4, signed: false }, ty, four, &[]),
        ];
        let module = Module::with_constants(Vec::new(), IdAllocator::new(30), constants);

        let function = Function::new(Id(100), "f", blocks);
        let cfg = CfgIndex::build(&function);
        let dom = DominatorTree::compute(&function, &cfg);
        let forest = LoopForest::build(&function, &cfg, &dom);
        let loop_id = forest.iter().next().unwrap().id();

        (module, function, loop_id)
    }

    use crate::loop_forest::LoopId;

    #[test]
    fn finds_induction_variable_and_iteration_count() {
        let (module, function, _loop_id) = counting_loop();
        let cfg = CfgIndex::build(&function);
        let dom = DominatorTree::compute(&function, &cfg);
        let forest = LoopForest::build(&function, &cfg, &dom);
        let loop_ = forest.iter().next().unwrap();

        let iv = find_induction_variable(&function, loop_).expect("induction variable found");
        assert_eq!(iv.init, Id(11));
        assert_eq!(iv.stepped, Id(21));
        assert!(!iv.step_is_subtract);

        let condition_block = Id(3);
        let iters =
            find_number_of_iterations(&module, &function, &iv, condition_block).expect("iteration count found");
        assert_eq!(iters.init, 0);
        assert_eq!(iters.step, 1);
        assert_eq!(iters.bound, 4);
        assert_eq!(iters.iterations, 4);
    }
}
