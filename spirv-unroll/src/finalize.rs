use spirv_analysis::{LoopForest, LoopId};
use spirv_ir::{AnalysisCache, BasicBlock, Function, Id, PreservedAnalyses};

/// Splices newly cloned blocks into a function's block list and keeps the loop
/// descriptor and cached analyses consistent afterward.
///
/// Every unroll operation ends here: cloning and rewiring only ever touch
/// a staging `Vec<BasicBlock>` and the original blocks already resident in the function;
/// this is the single place new blocks actually become part of the function.
pub struct CfgFinalizer;

impl CfgFinalizer {
    /// Drop every phi recorded as dead, then splice `pending_blocks` into `function`
    /// immediately before `insert_point`.
    ///
    /// `dead_phis` are always phis staged in `pending_blocks` itself — an instruction already
    /// resident in the function before this call is never on this list; the engine
    /// deletes those directly where it owns the mutation (e.g. `close_unrolled_loop`).
    pub fn add_blocks_to_function(
        function: &mut Function,
        insert_point: Id,
        dead_phis: &[Id],
        mut pending_blocks: Vec<BasicBlock>,
    ) {
        for &id in dead_phis {
            for block in &mut pending_blocks {
                block.remove_phi(id);
            }
        }
        function.splice_blocks_before(insert_point, pending_blocks);
    }

    /// Record the new blocks as part of `loop_id`'s body (and every ancestor's).
    pub fn add_blocks_to_loop(forest: &mut LoopForest, loop_id: LoopId, blocks: &[Id]) {
        forest.add_blocks_to_loop(loop_id, blocks);
    }

    /// Drop every cached CFG/dominator/def-use analysis for the function being
    /// transformed; the loop descriptor is updated explicitly by the engine instead, so
    /// it is preserved here even though [AnalysisCache] itself does not store it.
    pub fn invalidate_analyses(cache: &mut AnalysisCache) {
        cache.invalidate_except(PreservedAnalyses::LOOP_DESCRIPTOR);
    }
}
