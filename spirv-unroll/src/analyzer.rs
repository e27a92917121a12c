use spirv_analysis::{find_induction_variable, find_number_of_iterations, InductionVariable, IterationCount, Loop};
use spirv_ir::{CfgIndex, DominatorTree, Function, Id, Module, Opcode};

use crate::error::UnrollError;

/// Scan predecessors of `loop_`'s merge block for the one inside the loop that ends in
/// a conditional branch.
///
/// May return the header itself (a single-block loop body). Returns `None` if no
/// in-loop predecessor of the merge ends in a conditional branch at all, which the
/// legality checker treats as a rejection (no legal exit edge).
pub fn find_condition_block(function: &Function, cfg: &CfgIndex, loop_: &Loop) -> Option<Id> {
    cfg.preds(loop_.merge()).iter().copied().find(|&pred| {
        loop_.contains_block(pred)
            && function.block(pred).is_ok_and(|b| matches!(b.terminator().opcode(), Opcode::BranchConditional { .. }))
    })
}

/// The cached results of analyzing an accepted loop: its condition
/// block, induction variable, static iteration count, and the dominator-order
/// linearization of its body blocks that cloning iterates over.
#[derive(Debug, Clone)]
pub struct LoopAnalysis {
    pub condition_block: Id,
    pub induction: InductionVariable,
    pub iterations: IterationCount,
    /// The loop's body blocks (header included) in dominator-tree pre-order, starting
    /// at the header and stopping before the merge. Cloning iterates this list
    /// in order so that clones preserve the relative position of header, latch, and
    /// condition block, and so the output id stream is deterministic.
    pub ordered_blocks: Vec<Id>,
}

impl LoopAnalysis {
    /// Run the Loop Analyzer over an already-accepted loop.
    ///
    /// Only [crate::legality::can_perform_unroll] is expected to have rejected loops
    /// this fails on; any failure here on a loop that passed legality is therefore a
    /// fatal, non-panicking [UnrollError] rather than a second legality check.
    pub fn analyze(
        function: &Function,
        module: &Module,
        cfg: &CfgIndex,
        dominators: &DominatorTree,
        loop_: &Loop,
    ) -> Result<Self, UnrollError> {
        let condition_block = loop_
            .condition_block()
            .or_else(|| find_condition_block(function, cfg, loop_))
            .ok_or(UnrollError::NoConditionBlock(loop_.header()))?;

        let induction = find_induction_variable(function, loop_)
            .ok_or(UnrollError::NoInductionVariable(loop_.header()))?;

        let iterations = find_number_of_iterations(module, function, &induction, condition_block)
            .ok_or(UnrollError::NoIterationCount(loop_.header()))?;

        let mut ordered_blocks: Vec<Id> = dominators
            .pre_order_from(loop_.header())
            .into_iter()
            .filter(|&b| loop_.contains_block(b))
            .collect();
        // The merge block is never a body block by construction (`Loop::body` is
        // dominated-by-header-not-by-merge), but guard anyway: stopping at the merge is
        // a correctness requirement, not just an optimization.
        ordered_blocks.retain(|&b| b != loop_.merge());

        Ok(Self { condition_block, induction, iterations, ordered_blocks })
    }
}
