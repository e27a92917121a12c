//! The pass entry point: the only code in this crate that
//! decides *which* loops to unroll and in what order, as opposed to *how*.
//!
//! [LoopUnrollPass] is deliberately thin — it owns no state of its own beyond what a
//! single `run` call needs locally, and every interesting decision (legality, analysis,
//! cloning, rewiring, splicing) is delegated to the sibling modules. It exists to give
//! the pass entry points a home as associated functions on one type, matching how a
//! future pass-manager shell would look them up.

use rustc_hash::FxHashMap;
use spirv_analysis::{LoopForest, LoopId};
use spirv_ir::{AnalysisCache, CfgIndex, DefUseManager, DominatorTree, Function, Id, Module};

use crate::{engine, error::UnrollError, legality};

/// Structured loop unrolling, the whole pass.
///
/// Carries no configuration: there is no profitability heuristic or CLI surface here,
/// so the only parameter the pass ever takes is the per-call `factor` already threaded
/// through [Self::partially_unroll].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopUnrollPass;

impl LoopUnrollPass {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `loop_id` matches the canonical shape the transform
    /// requires, without mutating anything.
    pub fn can_perform_unroll(
        loop_id: LoopId,
        function: &Function,
        module: &Module,
        forest: &LoopForest,
        cfg: &CfgIndex,
        def_use: &DefUseManager,
    ) -> bool {
        legality::can_perform_unroll(loop_id, function, module, forest, cfg, def_use)
    }

    /// Fully unroll the loop. `Ok(false)` (no mutation) if the loop's statically known
    /// trip count is zero.
    pub fn fully_unroll(
        function: &mut Function,
        module: &mut Module,
        forest: &mut LoopForest,
        cache: &mut AnalysisCache,
        loop_id: LoopId,
    ) -> Result<bool, UnrollError> {
        engine::fully_unroll(function, module, forest, cache, loop_id)
    }

    /// `factor == 1` is a no-op (`Ok(false)`); `factor >= iterations` is
    /// promoted to [Self::fully_unroll]; otherwise dispatches to the clean or
    /// residual partial-unroll strategy based on divisibility.
    pub fn partially_unroll(
        function: &mut Function,
        module: &mut Module,
        forest: &mut LoopForest,
        cache: &mut AnalysisCache,
        loop_id: LoopId,
        factor: u32,
    ) -> Result<bool, UnrollError> {
        engine::partially_unroll(function, module, forest, cache, loop_id, factor)
    }

    /// Post-modification cleanup: sweep every loop marked for removal out
    /// of `forest`. [Self::fully_unroll] already sweeps internally after marking its
    /// own loop, so this is only needed by a caller driving the engine directly
    /// (outside [Self::run]) across several transforms before inspecting `forest`.
    pub fn finalize(forest: &mut LoopForest) {
        forest.sweep_removed_loops();
    }

    /// Run the pass over every function in `module`: for each function, for each loop
    /// whose loop-control carries the "Unroll" hint and which is legal, fully unroll
    /// it. Loops are processed innermost-first, since an outer loop is only a legal
    /// candidate once every loop nested inside it has already been unrolled.
    ///
    /// Returns `true` if any loop in the module was transformed ("changed"), `false`
    /// otherwise ("unchanged"). Panics if the engine ever reports an [UnrollError]:
    /// that indicates a structural invariant violation unreachable on any loop
    /// [Self::can_perform_unroll] accepted, so it is treated as fatal rather than
    /// skipped.
    pub fn run(&self, module: &mut Module) -> bool {
        let function_ids: Vec<Id> = module.functions().iter().map(|f| f.id).collect();
        let mut changed = false;
        for function_id in function_ids {
            let did_change = module.with_function_mut(function_id, run_on_function).unwrap_or(false);
            changed |= did_change;
        }
        changed
    }
}

/// Rebuild the loop forest for one function, visit every loop innermost-first, and
/// fully unroll each legal candidate that wants it.
fn run_on_function(function: &mut Function, module: &mut Module) -> bool {
    let cfg = CfgIndex::build(function);
    let dominators = DominatorTree::compute(function, &cfg);
    let mut forest = LoopForest::build(function, &cfg, &dominators);
    log::trace!("function {}: discovered {} structured loop(s)", function.id, forest.iter().count());

    let mut depth: FxHashMap<LoopId, u32> = FxHashMap::default();
    for loop_ in forest.iter() {
        depth.insert(loop_.id(), loop_depth(&forest, loop_.id()));
    }
    let mut candidates: Vec<LoopId> = forest.iter().map(|l| l.id()).collect();
    candidates.sort_by_key(|id| core::cmp::Reverse(depth[id]));

    let mut cache = AnalysisCache::new();
    let mut changed = false;

    for loop_id in candidates {
        let Some(loop_) = forest.get(loop_id) else { continue };
        if loop_.is_removed() || !loop_.wants_unroll() {
            continue;
        }

        let cfg_snapshot = cache.cfg(function).clone();
        let def_use_snapshot = cache.def_use(function).clone();
        if !LoopUnrollPass::can_perform_unroll(loop_id, function, module, &forest, &cfg_snapshot, &def_use_snapshot) {
            log::debug!("loop {loop_id:?} rejected by the legality checker, skipping");
            continue;
        }

        log::debug!("unrolling loop {loop_id:?} (full unroll, pass entry point)");
        match LoopUnrollPass::fully_unroll(function, module, &mut forest, &mut cache, loop_id) {
            Ok(did_change) => changed |= did_change,
            Err(err) => {
                panic!("spirv-unroll: fatal invariant violation unrolling loop {loop_id:?}: {err}");
            }
        }
    }

    LoopUnrollPass::finalize(&mut forest);
    changed
}

fn loop_depth(forest: &LoopForest, id: LoopId) -> u32 {
    let mut depth = 0;
    let mut current = forest.get(id).and_then(|l| l.parent());
    while let Some(parent_id) = current {
        depth += 1;
        current = forest.get(parent_id).and_then(|l| l.parent());
    }
    depth
}
