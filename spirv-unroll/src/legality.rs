use spirv_analysis::{find_induction_variable, find_number_of_iterations, LoopForest, LoopId};
use spirv_ir::{Cmp, CfgIndex, DefUseManager, Function, Module, Opcode};

use crate::analyzer::find_condition_block;

/// Decide whether `loop_` matches the canonical shape the unroll transform requires
///. Read-only: never mutates the module.
///
/// This is the sole place that reads "is this loop safe to touch" — if it returns
/// `false`, [crate::LoopUnrollPass] never instantiates an unroll engine for the loop,
/// and the transform core (`analyzer`/`cloner`/`engine`) is guaranteed to never observe
/// the rejected shape.
pub fn can_perform_unroll(
    loop_id: LoopId,
    function: &Function,
    module: &Module,
    forest: &LoopForest,
    cfg: &CfgIndex,
    def_use: &DefUseManager,
) -> bool {
    let Some(loop_) = forest.get(loop_id) else {
        log::debug!("rejecting unknown loop {loop_id:?}");
        return false;
    };

    let Ok(header) = function.block(loop_.header()) else {
        log::debug!("rejecting loop {:?}: header block not found", loop_.header());
        return false;
    };
    if header.structured_control().is_none() {
        log::debug!("rejecting loop {}: header carries no OpLoopMerge", loop_.header());
        return false;
    }

    let Some(induction) = find_induction_variable(function, loop_) else {
        log::debug!("rejecting loop {}: no induction variable found", loop_.header());
        return false;
    };

    for phi in header.phis() {
        if phi.result_id() == induction.phi {
            continue;
        }
        if def_use.num_users(phi.result_id()) > 0 {
            log::debug!(
                "rejecting loop {}: header has a live phi other than the induction variable",
                loop_.header()
            );
            return false;
        }
    }

    let Some(condition_block) = find_condition_block(function, cfg, loop_) else {
        log::debug!("rejecting loop {}: no in-loop conditional exit to the merge block", loop_.header());
        return false;
    };
    match spirv_analysis::condition_compare(function, condition_block) {
        Some(compare) if matches!(compare.opcode(), Opcode::Compare(Cmp::SLessThan)) => {}
        _ => {
            log::debug!("rejecting loop {}: condition block does not compare with signed-less-than", loop_.header());
            return false;
        }
    }

    if find_number_of_iterations(module, function, &induction, condition_block).is_none() {
        log::debug!(
            "rejecting loop {}: trip count is not statically computable (non-constant init/bound or non-positive step)",
            loop_.header()
        );
        return false;
    }

    let Ok(latch) = function.block(loop_.latch()) else {
        log::debug!("rejecting loop {:?}: latch block not found", loop_.latch());
        return false;
    };
    match latch.terminator().opcode() {
        Opcode::Branch { target } if *target == loop_.header() => {}
        _ => {
            log::debug!("rejecting loop {}: latch does not end in an unconditional branch to the header", loop_.header());
            return false;
        }
    }

    let merge_preds_in_loop = cfg.preds(loop_.merge()).iter().filter(|&&p| loop_.contains_block(p)).count();
    if merge_preds_in_loop != 1 {
        log::debug!(
            "rejecting loop {}: merge block has {merge_preds_in_loop} in-loop predecessors, expected 1 (early exit)",
            loop_.header()
        );
        return false;
    }

    if cfg.preds(loop_.latch()).len() != 1 {
        log::debug!(
            "rejecting loop {}: latch has {} predecessors, expected 1 (early continue)",
            loop_.header(),
            cfg.preds(loop_.latch()).len()
        );
        return false;
    }

    for block_id in loop_.body_blocks() {
        let Ok(block) = function.block(block_id) else { continue };
        if matches!(block.terminator().opcode(), Opcode::Return | Opcode::ReturnValue | Opcode::Kill) {
            log::debug!("rejecting loop {}: body block {block_id} terminates in return/kill", loop_.header());
            return false;
        }
    }

    for block_id in loop_.body_blocks() {
        let Ok(block) = function.block(block_id) else { continue };
        for inst in block.instructions() {
            if !inst.has_result() {
                continue;
            }
            for user in def_use.users(inst.result_id()) {
                if !loop_.contains_block(user.block) {
                    log::debug!(
                        "rejecting loop {}: value {} defined in the loop is used outside it",
                        loop_.header(),
                        inst.result_id()
                    );
                    return false;
                }
            }
        }
    }

    if !forest.all_inner_loops_removed(loop_id) {
        log::debug!("rejecting loop {}: contains an inner loop not yet unrolled", loop_.header());
        return false;
    }

    true
}
