use rustc_hash::{FxHashMap, FxHashSet};
use spirv_ir::{CfgIndex, DominatorTree, Function, Id, LoopControl, Opcode};

use crate::error::AnalysisError;

/// Index of a [Loop] within its [LoopForest].
///
/// Stable across `mark_for_removal`/`sweep_removed_loops`: a swept loop's id simply
/// stops resolving via [LoopForest::get] rather than being reused by a later insertion,
/// which is what lets the unroll engine hold a `LoopId` across the pass without
/// worrying about it aliasing an unrelated loop created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub(crate) u32);

/// A single structured loop, as discovered from an `OpLoopMerge` marker.
///
/// `condition_block` starts unset (`None`) — the
/// forest only has enough information to find header/latch/merge/pre-header from the
/// `OpLoopMerge` operands and CFG shape; finding the condition block requires walking
/// predecessors of `merge` for a conditional branch, which is the Loop Analyzer's job
/// (`spirv-unroll::analyzer`), not discovery's.
#[derive(Debug, Clone)]
pub struct Loop {
    id: LoopId,
    header: Id,
    preheader: Id,
    latch: Id,
    merge: Id,
    condition_block: Option<Id>,
    control: LoopControl,
    parent: Option<LoopId>,
    children: Vec<LoopId>,
    /// Blocks dominated by `header` and not dominated by `merge`,
    /// including the header and latch themselves.
    body: FxHashSet<Id>,
    removed: bool,
}

impl Loop {
    #[inline]
    pub fn id(&self) -> LoopId {
        self.id
    }

    #[inline]
    pub fn header(&self) -> Id {
        self.header
    }

    #[inline]
    pub fn preheader(&self) -> Id {
        self.preheader
    }

    #[inline]
    pub fn latch(&self) -> Id {
        self.latch
    }

    #[inline]
    pub fn merge(&self) -> Id {
        self.merge
    }

    #[inline]
    pub fn condition_block(&self) -> Option<Id> {
        self.condition_block
    }

    /// Filled in by the Loop Analyzer once; subsequent calls during residual
    /// unrolling reassign this to the duplicate loop's own condition block rather than recomputing it from a mid-transform CFG.
    pub fn set_condition_block(&mut self, block: Id) {
        self.condition_block = Some(block);
    }

    #[inline]
    pub fn control(&self) -> LoopControl {
        self.control
    }

    #[inline]
    pub fn wants_unroll(&self) -> bool {
        self.control.contains(LoopControl::UNROLL)
    }

    #[inline]
    pub fn parent(&self) -> Option<LoopId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[LoopId] {
        &self.children
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// True if `block` is one of this loop's body blocks (header and latch included).
    pub fn contains_block(&self, block: Id) -> bool {
        self.body.contains(&block)
    }

    pub fn body_blocks(&self) -> impl Iterator<Item = Id> + '_ {
        self.body.iter().copied()
    }
}

/// The set of all structured loops in a single [Function], with their nesting
/// relationships.
///
/// Corresponds to the "Loop Descriptor" external interface. Loops are stored in a
/// flat `Vec<Option<Loop>>` indexed by [LoopId]; `mark_for_removal` + `sweep_removed_loops`
/// implement a two-phase delete, which keeps every
/// `LoopId` issued during a pass valid (resolving to `None` once swept) rather than
/// reusing a freed slot for an unrelated loop.
#[derive(Debug, Default)]
pub struct LoopForest {
    loops: Vec<Option<Loop>>,
    top_level: Vec<LoopId>,
    /// Maps a block to the innermost loop that contains it, used to check "all inner
    /// loops have already been marked for removal" before allowing an outer loop
    /// to be unrolled.
    block_loop: FxHashMap<Id, LoopId>,
}

impl LoopForest {
    /// Discover every structured loop in `function` from its `OpLoopMerge` markers.
    ///
    /// A header whose apparent pre-header cannot be determined uniquely (i.e. the
    /// header has a predecessor count other than exactly `{preheader, latch}`) is
    /// skipped rather than registered maimed: the legality checker never sees it, so it
    /// is implicitly rejected without a dedicated error path.
    pub fn build(function: &Function, cfg: &CfgIndex, dominators: &DominatorTree) -> Self {
        let mut forest = Self::default();
        let mut discovered = Vec::new();

        for block in function.blocks() {
            let Some(control_inst) = block.structured_control() else { continue };
            let Opcode::LoopMerge { merge, continue_target, control } = control_inst.opcode() else {
                continue;
            };
            let header = block.id();
            let latch = *continue_target;
            let merge = *merge;

            let preds = cfg.preds(header);
            let preheader = preds.iter().copied().find(|&p| p != latch);
            let Some(preheader) = preheader else {
                log::debug!("loop header {header} has no distinguishable pre-header, skipping");
                continue;
            };
            if preds.len() != 2 {
                log::debug!("loop header {header} has {} predecessors, expected 2, skipping", preds.len());
                continue;
            }

            let body: FxHashSet<Id> = function
                .blocks()
                .iter()
                .map(|b| b.id())
                .filter(|&b| {
                    dominators.is_reachable(b)
                        && dominators.dominates(header, b)
                        && !dominators.dominates(merge, b)
                })
                .collect();

            discovered.push((header, preheader, latch, merge, *control, body));
        }

        // Register outer-before-inner so parent/children linking below can rely on
        // every candidate parent already being present; order among siblings does not
        // matter since nesting is determined purely by body-set containment.
        discovered.sort_by_key(|(_, _, _, _, _, body)| core::cmp::Reverse(body.len()));

        for (header, preheader, latch, merge, control, body) in discovered {
            let id = LoopId(forest.loops.len() as u32);
            let parent = forest.loops.iter().flatten().rev().find_map(|candidate| {
                (candidate.header != header && candidate.body.contains(&header)).then_some(candidate.id)
            });

            forest.loops.push(Some(Loop {
                id,
                header,
                preheader,
                latch,
                merge,
                condition_block: None,
                control,
                parent,
                children: Vec::new(),
                body: body.clone(),
                removed: false,
            }));

            if let Some(parent_id) = parent {
                if let Some(Some(parent_loop)) = forest.loops.get_mut(parent_id.0 as usize) {
                    parent_loop.children.push(id);
                }
            } else {
                forest.top_level.push(id);
            }

            for block in body {
                // A block may be claimed by more than one enclosing loop as discovery
                // proceeds outer-to-inner; the later (inner) assignment always wins
                // because `discovered` is sorted largest-body-first and we overwrite.
                forest.block_loop.insert(block, id);
            }
        }

        forest
    }

    pub fn get(&self, id: LoopId) -> Option<&Loop> {
        self.loops.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: LoopId) -> Option<&mut Loop> {
        self.loops.get_mut(id.0 as usize).and_then(|slot| slot.as_mut())
    }

    pub fn try_get(&self, id: LoopId) -> Result<&Loop, AnalysisError> {
        self.get(id).ok_or(AnalysisError::UnknownLoop(id))
    }

    pub fn try_get_mut(&mut self, id: LoopId) -> Result<&mut Loop, AnalysisError> {
        self.get_mut(id).ok_or(AnalysisError::UnknownLoop(id))
    }

    /// All loops currently registered (including those already marked for removal but
    /// not yet swept), in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Loop> {
        self.loops.iter().flatten()
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Loop> + '_ {
        self.top_level.iter().filter_map(move |id| self.get(*id))
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost_loop_containing(&self, block: Id) -> Option<&Loop> {
        self.block_loop.get(&block).and_then(|id| self.get(*id))
    }

    /// True if every loop nested inside `loop_id` has already been marked for removal
    ///.
    pub fn all_inner_loops_removed(&self, loop_id: LoopId) -> bool {
        let Some(l) = self.get(loop_id) else { return true };
        l.children.iter().all(|&child| {
            self.get(child).is_some_and(|c| c.is_removed()) && self.all_inner_loops_removed(child)
        })
    }

    /// Register a new loop as a sibling under
    /// `parent`.
    pub fn add_loop(&mut self, mut new_loop: Loop, parent: Option<LoopId>) -> LoopId {
        let id = LoopId(self.loops.len() as u32);
        new_loop.id = id;
        new_loop.parent = parent;
        for block in new_loop.body_blocks().collect::<Vec<_>>() {
            self.block_loop.insert(block, id);
        }
        self.loops.push(Some(new_loop));

        match parent {
            Some(parent_id) => {
                if let Some(parent_loop) = self.get_mut(parent_id) {
                    parent_loop.children.push(id);
                }
            }
            None => self.top_level.push(id),
        }
        id
    }

    /// Build a fresh [Loop] record for `duplicate_loop` to register via
    /// [Self::add_loop]. Exposed as a constructor since [Loop]'s fields are private to
    /// this module.
    pub fn new_loop_record(
        header: Id,
        preheader: Id,
        latch: Id,
        merge: Id,
        control: LoopControl,
        body: impl IntoIterator<Item = Id>,
    ) -> Loop {
        Loop {
            id: LoopId(u32::MAX),
            header,
            preheader,
            latch,
            merge,
            condition_block: None,
            control,
            parent: None,
            children: Vec::new(),
            body: body.into_iter().collect(),
            removed: false,
        }
    }

    /// Attach newly created blocks (cloned by the unroll transform) to `loop_id`'s body
    /// and to every enclosing ancestor loop's body.
    ///
    /// Called on the loop that was just unrolled, whether or not it ends up removed
    /// immediately afterward (full unroll): an ancestor's body set still needs the new
    /// blocks even when the loop that produced them does not survive the pass.
    pub fn add_blocks_to_loop(&mut self, loop_id: LoopId, blocks: &[Id]) {
        let mut current = Some(loop_id);
        while let Some(id) = current {
            let Some(l) = self.get_mut(id) else { break };
            l.body.extend(blocks.iter().copied());
            current = l.parent;
        }
        for &block in blocks {
            self.block_loop.insert(block, loop_id);
        }
    }

    pub fn mark_for_removal(&mut self, id: LoopId) {
        if let Some(l) = self.get_mut(id) {
            l.removed = true;
        }
    }

    /// Phase two of the two-phase delete: drop every loop marked for removal.
    ///
    /// Corresponds to the "Loop Descriptor"'s `post_modification_cleanup` /
    /// `sweep_removed_loops` external interface.
    pub fn sweep_removed_loops(&mut self) {
        for slot in &mut self.loops {
            if slot.as_ref().is_some_and(Loop::is_removed) {
                *slot = None;
            }
        }
        self.top_level.retain(|id| self.loops[id.0 as usize].is_some());
        for slot in self.loops.iter_mut().flatten() {
            slot.children.retain(|id| self.loops.get(id.0 as usize).is_some_and(Option::is_some));
        }
        self.block_loop.retain(|_, id| self.loops[id.0 as usize].is_some());
    }
}

#[cfg(test)]
mod tests {
    use spirv_ir::{BasicBlock, Instruction};

    use super::*;

    fn br(target: Id) -> Instruction {
        Instruction::new(Opcode::Branch { target }, Id::NONE, Id::NONE, &[])
    }

    fn cond_br(cond: Id, t: Id, f: Id) -> Instruction {
        Instruction::new(
            Opcode::BranchConditional { condition: cond, true_target: t, false_target: f },
            Id::NONE,
            Id::NONE,
            &[],
        )
    }

    /// entry -> header <-> (body) -> cond -> merge; cond also branches back to header.
    fn single_loop() -> (Function, Id, Id, Id, Id, Id) {
        let entry = Id(1);
        let header = Id(2);
        let body = Id(3);
        let latch = Id(4);
        let merge = Id(5);
        let cond = Id(6);

        let blocks = vec![
            BasicBlock::new(entry, vec![br(header)]),
            BasicBlock::new(
                header,
                vec![
                    Instruction::new(
                        Opcode::LoopMerge { merge, continue_target: latch, control: LoopControl::UNROLL },
                        Id::NONE,
                        Id::NONE,
                        &[],
                    ),
                    br(body),
                ],
            ),
            BasicBlock::new(body, vec![cond_br(cond, latch, merge)]),
            BasicBlock::new(latch, vec![br(header)]),
            BasicBlock::new(merge, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])]),
        ];
        (Function::new(Id(100), "f", blocks), entry, header, body, latch, merge)
    }

    #[test]
    fn discovers_a_single_loop_with_correct_blocks() {
        let (func, _entry, header, body, latch, merge) = single_loop();
        let cfg = CfgIndex::build(&func);
        let dom = DominatorTree::compute(&func, &cfg);
        let forest = LoopForest::build(&func, &cfg, &dom);

        let loops: Vec<_> = forest.iter().collect();
        assert_eq!(loops.len(), 1);
        let l = loops[0];
        assert_eq!(l.header(), header);
        assert_eq!(l.latch(), latch);
        assert_eq!(l.merge(), merge);
        assert!(l.wants_unroll());
        assert!(l.contains_block(header));
        assert!(l.contains_block(body));
        assert!(l.contains_block(latch));
        assert!(!l.contains_block(merge));
    }

    #[test]
    fn mark_and_sweep_removes_the_loop() {
        let (func, _entry, _header, _body, _latch, _merge) = single_loop();
        let cfg = CfgIndex::build(&func);
        let dom = DominatorTree::compute(&func, &cfg);
        let mut forest = LoopForest::build(&func, &cfg, &dom);

        let id = forest.iter().next().unwrap().id();
        forest.mark_for_removal(id);
        assert!(forest.get(id).unwrap().is_removed());
        forest.sweep_removed_loops();
        assert!(forest.get(id).is_none());
        assert_eq!(forest.iter().count(), 0);
    }
}
