use rustc_hash::FxHashMap;
use spirv_analysis::{InductionVariable, IterationCount, Loop, LoopForest, LoopId};
use spirv_ir::{AnalysisCache, BasicBlock, DefUseManager, Function, Id, InstructionBuilder, Module, Opcode, Operand};

use crate::{
    analyzer::LoopAnalysis,
    cloner::{remap_operands, BlockCloner, IterationState},
    error::UnrollError,
    finalize::CfgFinalizer,
};

/// What one call to [copy_body] produced: the roles its clones play, needed by the next
/// iteration and by the caller that closes the chain.
#[derive(Debug, Clone, Copy)]
struct CopyResult {
    new_phi: Id,
    new_latch: Id,
    /// The remapped id of the induction's stepped value for this copy — what the
    /// *next* copy (or the closing step) must feed into the original phi's latch-side
    /// incoming pair.
    stepped: Id,
}

/// Clone one full pass over `analysis.ordered_blocks`, rewire the chain, and advance
/// `state`.
fn copy_body(
    function: &Function,
    loop_: &Loop,
    analysis: &LoopAnalysis,
    allocator: &mut spirv_ir::IdAllocator,
    eliminate_conditions: bool,
    state: &mut IterationState,
    pending_blocks: &mut Vec<BasicBlock>,
    block_pos: &mut FxHashMap<Id, usize>,
    dead_phis: &mut Vec<Id>,
) -> Result<CopyResult, UnrollError> {
    for &block_id in &analysis.ordered_blocks {
        BlockCloner::clone_block(function, loop_, analysis, block_id, allocator, false, state, pending_blocks, block_pos)?;
    }

    let prev_stepped = find_instruction(function, pending_blocks, state.prev_phi)
        .ok_or(UnrollError::BlockNotCloned(state.prev_phi))?
        .phi_incoming_value(state.prev_latch)?;
    state.new_inst.insert(analysis.induction.phi, prev_stepped);

    let new_block_ids: Vec<Id> = state.new_blocks.values().copied().collect();
    remap_operands(pending_blocks, block_pos, new_block_ids.iter().copied(), &state.new_inst);

    let new_header = state.new_header.ok_or(UnrollError::BlockNotCloned(loop_.header()))?;
    let new_latch = state.new_latch.ok_or(UnrollError::BlockNotCloned(loop_.latch()))?;
    let new_phi = state.new_phi.ok_or(UnrollError::BlockNotCloned(analysis.induction.phi))?;
    let new_condition = state.new_condition.ok_or(UnrollError::BlockNotCloned(analysis.condition_block))?;
    let stepped = *state
        .new_inst
        .get(&analysis.induction.stepped)
        .ok_or(UnrollError::BlockNotCloned(analysis.induction.stepped))?;

    set_branch_target(function, pending_blocks, block_pos, state.prev_latch, new_header)?;
    set_branch_target(function, pending_blocks, block_pos, new_latch, loop_.header())?;

    if eliminate_conditions {
        fold_condition_in_pending(pending_blocks, block_pos, new_condition, loop_.merge())?;
    }

    dead_phis.push(new_phi);
    crate::cloner::finish_iteration(state)?;

    Ok(CopyResult { new_phi, new_latch, stepped })
}

fn find_instruction<'f>(function: &'f Function, pending_blocks: &'f [BasicBlock], id: Id) -> Option<&'f spirv_ir::Instruction> {
    function
        .blocks()
        .iter()
        .chain(pending_blocks.iter())
        .find_map(|block| block.instructions().iter().find(|inst| inst.result_id() == id))
}

fn set_branch_target(
    function: &mut Function,
    pending_blocks: &mut [BasicBlock],
    block_pos: &FxHashMap<Id, usize>,
    block_id: Id,
    target: Id,
) -> Result<(), UnrollError> {
    if let Some(&idx) = block_pos.get(&block_id) {
        pending_blocks[idx].set_terminator(InstructionBuilder::branch(target));
    } else {
        InstructionBuilder::set_branch(function, block_id, target)?;
    }
    Ok(())
}

/// Fold a staged condition block's conditional branch into an unconditional branch to
/// whichever target is not `merge`.
fn fold_condition_in_pending(
    pending_blocks: &mut [BasicBlock],
    block_pos: &FxHashMap<Id, usize>,
    condition_block: Id,
    merge: Id,
) -> Result<(), UnrollError> {
    let idx = *block_pos.get(&condition_block).ok_or(UnrollError::BlockNotCloned(condition_block))?;
    let block = &mut pending_blocks[idx];
    let Opcode::BranchConditional { true_target, false_target, .. } = *block.terminator().opcode() else {
        return Err(UnrollError::BlockNotCloned(condition_block));
    };
    let continue_target = if true_target != merge { true_target } else { false_target };
    block.set_terminator(InstructionBuilder::branch(continue_target));
    Ok(())
}

/// Same fold, applied to a block still resident in `function` (used for the very first,
/// never-cloned iteration of a full unroll).
fn fold_condition_in_function(function: &mut Function, condition_block: Id, merge: Id) -> Result<(), UnrollError> {
    let opcode = function.block(condition_block)?.terminator().opcode().clone();
    let Opcode::BranchConditional { true_target, false_target, .. } = opcode else {
        return Ok(());
    };
    let continue_target = if true_target != merge { true_target } else { false_target };
    InstructionBuilder::set_branch(function, condition_block, continue_target)?;
    Ok(())
}

/// The staged result of [unroll]: new blocks not yet spliced into the function, phis to
/// drop once spliced, and the final copy's latch/stepped-value ids (or the original
/// loop's own, if `factor == 1` and no copies were made).
struct UnrollOutput {
    pending_blocks: Vec<BasicBlock>,
    dead_phis: Vec<Id>,
    new_block_ids: Vec<Id>,
    final_latch: Id,
    final_stepped: Id,
}

/// Unroll `loop_` by `factor`: `factor - 1` copies of the
/// body, then the original induction phi's latch-side incoming pair is rewritten to
/// close the chain around the final copy.
fn unroll(function: &mut Function, module: &mut Module, loop_: &Loop, analysis: &LoopAnalysis, factor: u32) -> Result<UnrollOutput, UnrollError> {
    let mut state = IterationState::initial(analysis.induction.phi, loop_.latch(), analysis.condition_block);
    let mut pending_blocks = Vec::new();
    let mut block_pos = FxHashMap::default();
    let mut dead_phis = Vec::new();
    let mut last: Option<CopyResult> = None;

    for _ in 1..factor {
        let copy = copy_body(
            function,
            loop_,
            analysis,
            module.allocator_mut(),
            true,
            &mut state,
            &mut pending_blocks,
            &mut block_pos,
            &mut dead_phis,
        )?;
        last = Some(copy);
    }

    let new_block_ids: Vec<Id> = block_pos.keys().copied().collect();

    match last {
        Some(r) => {
            let header = function.block_mut(loop_.header())?;
            for phi in header.phis_mut() {
                if phi.result_id() == analysis.induction.phi {
                    phi.set_phi_incoming_pair_checked(loop_.latch(), r.stepped, r.new_latch)?;
                    break;
                }
            }
            // The real back-edge now runs from the final clone's latch, not the
            // original one: the surviving loop-merge's continue target must follow it,
            // or the structured-control construct names a block that is no longer the
            // continue block.
            if let Some(control) = header.structured_control_mut() {
                if let Opcode::LoopMerge { continue_target, .. } = control.opcode_mut() {
                    *continue_target = r.new_latch;
                }
            }
            Ok(UnrollOutput { pending_blocks, dead_phis, new_block_ids, final_latch: r.new_latch, final_stepped: r.stepped })
        }
        None => Ok(UnrollOutput {
            pending_blocks,
            dead_phis,
            new_block_ids,
            final_latch: loop_.latch(),
            final_stepped: analysis.induction.stepped,
        }),
    }
}

/// Retire a fully-unrolled loop.
fn close_unrolled_loop(
    function: &mut Function,
    pending_blocks: &mut [BasicBlock],
    block_pos: &FxHashMap<Id, usize>,
    loop_: &Loop,
    analysis: &LoopAnalysis,
    final_latch: Id,
) -> Result<(), UnrollError> {
    function.block_mut(loop_.header())?.remove_loop_merge();
    set_branch_target(function, pending_blocks, block_pos, final_latch, loop_.merge())?;
    DefUseManager::replace_all_uses_with(function, analysis.induction.phi, analysis.induction.init);
    function.block_mut(loop_.header())?.remove_phi(analysis.induction.phi);
    Ok(())
}

/// Fully unroll `loop_id`: `N := iterations` copies, closed into a straight-line chain
/// with no back-edge. Returns `Ok(false)` without mutating anything
/// if the loop's statically known iteration count is zero.
pub fn fully_unroll(
    function: &mut Function,
    module: &mut Module,
    forest: &mut LoopForest,
    cache: &mut AnalysisCache,
    loop_id: LoopId,
) -> Result<bool, UnrollError> {
    let loop_ = forest.try_get(loop_id)?.clone();
    let cfg = cache.cfg(function).clone();
    let dominators = cache.dominators(function).clone();
    let analysis = LoopAnalysis::analyze(function, module, &cfg, &dominators, &loop_)?;

    if analysis.iterations.iterations == 0 {
        log::debug!("loop {} has a statically zero trip count, skipping full unroll", loop_.header());
        return Ok(false);
    }

    let output = unroll(function, module, &loop_, &analysis, analysis.iterations.iterations)?;
    let UnrollOutput { mut pending_blocks, dead_phis, new_block_ids, final_latch, .. } = output;
    let block_pos: FxHashMap<Id, usize> = pending_blocks.iter().enumerate().map(|(i, b)| (b.id(), i)).collect();

    fold_condition_in_function(function, analysis.condition_block, loop_.merge())?;
    close_unrolled_loop(function, &mut pending_blocks, &block_pos, &loop_, &analysis, final_latch)?;

    CfgFinalizer::add_blocks_to_function(function, loop_.merge(), &dead_phis, pending_blocks);
    CfgFinalizer::add_blocks_to_loop(forest, loop_id, &new_block_ids);
    forest.mark_for_removal(loop_id);
    forest.sweep_removed_loops();
    CfgFinalizer::invalidate_analyses(cache);

    Ok(true)
}

/// Partially unroll `loop_id` by `factor`. `factor == 1` is a no-op;
/// `factor >= iterations` is promoted to a full unroll; otherwise dispatches to the
/// clean or residual path based on divisibility.
pub fn partially_unroll(
    function: &mut Function,
    module: &mut Module,
    forest: &mut LoopForest,
    cache: &mut AnalysisCache,
    loop_id: LoopId,
    factor: u32,
) -> Result<bool, UnrollError> {
    if factor == 1 {
        return Ok(false);
    }

    let loop_ = forest.try_get(loop_id)?.clone();
    let cfg = cache.cfg(function).clone();
    let dominators = cache.dominators(function).clone();
    let analysis = LoopAnalysis::analyze(function, module, &cfg, &dominators, &loop_)?;

    if factor >= analysis.iterations.iterations {
        return fully_unroll(function, module, forest, cache, loop_id);
    }

    if analysis.iterations.iterations % factor == 0 {
        partially_unroll_clean(function, module, forest, cache, loop_id, &loop_, &analysis, factor)
    } else {
        partially_unroll_residual(function, module, forest, cache, loop_id, &loop_, &analysis, factor)
    }
}

fn partially_unroll_clean(
    function: &mut Function,
    module: &mut Module,
    forest: &mut LoopForest,
    cache: &mut AnalysisCache,
    loop_id: LoopId,
    loop_: &Loop,
    analysis: &LoopAnalysis,
    factor: u32,
) -> Result<bool, UnrollError> {
    let output = unroll(function, module, loop_, analysis, factor)?;

    CfgFinalizer::add_blocks_to_function(function, loop_.merge(), &output.dead_phis, output.pending_blocks);
    CfgFinalizer::add_blocks_to_loop(forest, loop_id, &output.new_block_ids);
    CfgFinalizer::invalidate_analyses(cache);

    Ok(true)
}

/// A verbatim structural duplicate of a loop's blocks (including its merge), with fresh
/// ids.
struct DuplicateLoop {
    pending_blocks: Vec<BasicBlock>,
    new_header: Id,
    new_latch: Id,
    new_condition: Id,
    new_merge: Id,
    new_phi: Id,
    /// Header..latch, in clone order — the duplicate's own body blocks (excludes its
    /// cloned merge, which is not a body block).
    new_block_ids: Vec<Id>,
    new_inst: FxHashMap<Id, Id>,
}

fn duplicate_loop(function: &Function, module: &mut Module, loop_: &Loop, analysis: &LoopAnalysis) -> Result<DuplicateLoop, UnrollError> {
    let mut state = IterationState::initial(analysis.induction.phi, loop_.latch(), analysis.condition_block);
    let mut pending_blocks = Vec::new();
    let mut block_pos = FxHashMap::default();

    for &block_id in &analysis.ordered_blocks {
        BlockCloner::clone_block(function, loop_, analysis, block_id, module.allocator_mut(), true, &mut state, &mut pending_blocks, &mut block_pos)?;
    }
    BlockCloner::clone_block(function, loop_, analysis, loop_.merge(), module.allocator_mut(), true, &mut state, &mut pending_blocks, &mut block_pos)?;

    let new_block_ids: Vec<Id> = analysis.ordered_blocks.iter().map(|b| state.new_inst[b]).collect();
    let all_block_ids: Vec<Id> = state.new_blocks.values().copied().collect();
    remap_operands(&mut pending_blocks, &block_pos, all_block_ids, &state.new_inst);

    let new_header = state.new_header.ok_or(UnrollError::BlockNotCloned(loop_.header()))?;
    let new_latch = state.new_latch.ok_or(UnrollError::BlockNotCloned(loop_.latch()))?;
    let new_condition = state.new_condition.ok_or(UnrollError::BlockNotCloned(analysis.condition_block))?;
    let new_phi = state.new_phi.ok_or(UnrollError::BlockNotCloned(analysis.induction.phi))?;
    let new_merge = *state.new_inst.get(&loop_.merge()).ok_or(UnrollError::BlockNotCloned(loop_.merge()))?;

    Ok(DuplicateLoop { pending_blocks, new_header, new_latch, new_condition, new_merge, new_phi, new_block_ids, new_inst: state.new_inst })
}

#[allow(clippy::too_many_arguments)]
fn partially_unroll_residual(
    function: &mut Function,
    module: &mut Module,
    forest: &mut LoopForest,
    cache: &mut AnalysisCache,
    loop_id: LoopId,
    loop_: &Loop,
    analysis: &LoopAnalysis,
    factor: u32,
) -> Result<bool, UnrollError> {
    let remainder = analysis.iterations.iterations % factor;

    let dup = duplicate_loop(function, module, loop_, analysis)?;
    let r_id = module.allocator_mut().take_next_id();

    // Steps 6/7 operate on the original function/duplicate blocks before splicing, so
    // they can use the simple function-vs-pending split rather than tracking a single
    // combined block index.
    DefUseManager::replace_all_uses_with(function, loop_.merge(), r_id);

    let remainder_value = analysis.iterations.init + (remainder as i64) * analysis.iterations.step;
    let remainder_const = InstructionBuilder::int_constant(module, analysis.iterations.type_id, remainder_value);
    rewrite_condition_bound(function, analysis.condition_block, analysis.induction.phi, remainder_const)?;

    let mut dup_pending = dup.pending_blocks;
    {
        let header_idx = dup_pending
            .iter()
            .position(|b| b.id() == dup.new_header)
            .ok_or(UnrollError::BlockNotCloned(dup.new_header))?;
        for phi in dup_pending[header_idx].phis_mut() {
            if phi.result_id() == dup.new_phi {
                phi.set_phi_incoming_pair_checked(loop_.preheader(), remainder_const, r_id)?;
                break;
            }
        }
    }

    let r_block = BasicBlock::new(r_id, vec![InstructionBuilder::branch(dup.new_header)]);
    let mut spliced = vec![r_block];
    spliced.append(&mut dup_pending);
    function.splice_blocks_after(loop_.merge(), spliced);

    let dup_loop_record = {
        let mut record = LoopForest::new_loop_record(dup.new_header, r_id, dup.new_latch, dup.new_merge, loop_.control(), dup.new_block_ids.iter().copied());
        record.set_condition_block(dup.new_condition);
        record
    };
    let new_loop_id = forest.add_loop(dup_loop_record, loop_.parent());
    CfgFinalizer::add_blocks_to_loop(forest, new_loop_id, &dup.new_block_ids);

    let dup_loop = forest.try_get(new_loop_id)?.clone();
    let dup_induction = InductionVariable {
        phi: dup.new_phi,
        init: remainder_const,
        stepped: dup.new_inst[&analysis.induction.stepped],
        step_inst: dup.new_inst[&analysis.induction.step_inst],
        step_is_subtract: analysis.induction.step_is_subtract,
    };
    let dup_analysis = LoopAnalysis {
        condition_block: dup.new_condition,
        induction: dup_induction,
        iterations: IterationCount {
            init: remainder_value,
            step: analysis.iterations.step,
            bound: analysis.iterations.bound,
            iterations: analysis.iterations.iterations - remainder,
            type_id: analysis.iterations.type_id,
        },
        ordered_blocks: dup.new_block_ids.clone(),
    };

    let output = unroll(function, module, &dup_loop, &dup_analysis, factor)?;
    CfgFinalizer::add_blocks_to_function(function, dup_loop.merge(), &output.dead_phis, output.pending_blocks);
    CfgFinalizer::add_blocks_to_loop(forest, new_loop_id, &output.new_block_ids);
    CfgFinalizer::invalidate_analyses(cache);

    let _ = loop_id;
    Ok(true)
}

fn rewrite_condition_bound(function: &mut Function, condition_block: Id, induction_phi: Id, new_bound: Id) -> Result<(), UnrollError> {
    let block = function.block_mut(condition_block)?;
    for inst in block.instructions_mut() {
        if !matches!(inst.opcode(), Opcode::Compare(_)) {
            continue;
        }
        if inst.in_operand(0).as_id() == Some(induction_phi) {
            inst.set_in_operand(1, Operand::Id(new_bound));
            return Ok(());
        }
        if inst.in_operand(1).as_id() == Some(induction_phi) {
            inst.set_in_operand(0, Operand::Id(new_bound));
            return Ok(());
        }
    }
    Ok(())
}
