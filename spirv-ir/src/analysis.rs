//! Lazily-computed, invalidate-on-edit analyses for a single [crate::function::Function].
//!
//! Mirrors the `PreservedAnalyses` convention: a structural edit
//! names which analyses it still knows to be valid, and everything else is dropped and
//! recomputed the next time it's asked for.

use crate::{cfg::CfgIndex, def_use::DefUseManager, dominance::DominatorTree, function::Function};

bitflags::bitflags! {
    /// A bitmask of analyses a mutation is known to have preserved.
    ///
    /// Passed to [AnalysisCache::invalidate_except] after a structural edit; every
    /// analysis *not* named in the mask is dropped and recomputed on next access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PreservedAnalyses: u32 {
        const NONE = 0;
        const CFG = 1 << 0;
        const DOMINATOR_TREE = 1 << 1;
        const DEF_USE = 1 << 2;
        /// The loop descriptor lives in `spirv-analysis`, outside this cache, but the
        /// bit is reserved here so callers can pass a single mask across both: the
        /// unroll engine mutates the loop descriptor explicitly and always preserves
        /// it, while every other analysis is invalidated.
        const LOOP_DESCRIPTOR = 1 << 3;
    }
}

/// Holds the CFG index, dominator tree, and def-use manager for one function, computing
/// each on first access and discarding them again on [Self::invalidate_except].
#[derive(Debug, Default)]
pub struct AnalysisCache {
    cfg: Option<CfgIndex>,
    dominators: Option<DominatorTree>,
    def_use: Option<DefUseManager>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cfg(&mut self, function: &Function) -> &CfgIndex {
        self.cfg.get_or_insert_with(|| CfgIndex::build(function))
    }

    pub fn dominators(&mut self, function: &Function) -> &DominatorTree {
        if self.dominators.is_none() {
            let cfg = CfgIndex::build(function);
            let tree = DominatorTree::compute(function, &cfg);
            self.cfg = Some(cfg);
            self.dominators = Some(tree);
        }
        self.dominators.as_ref().expect("just inserted")
    }

    pub fn def_use(&mut self, function: &Function) -> &DefUseManager {
        self.def_use.get_or_insert_with(|| DefUseManager::build(function))
    }

    /// Drop every cached analysis not named in `preserved`.
    ///
    /// Called by the CFG Finalizer after every structural edit; the loop
    /// descriptor bit is meaningless here (it lives in `spirv-analysis`) but is
    /// accepted so callers can thread one mask through both caches without splitting
    /// it apart at the call site.
    pub fn invalidate_except(&mut self, preserved: PreservedAnalyses) {
        if !preserved.contains(PreservedAnalyses::CFG) {
            self.cfg = None;
        }
        if !preserved.contains(PreservedAnalyses::DOMINATOR_TREE) {
            self.dominators = None;
        }
        if !preserved.contains(PreservedAnalyses::DEF_USE) {
            self.def_use = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BasicBlock,
        ids::Id,
        instruction::{Instruction, Opcode},
    };

    fn trivial_function() -> Function {
        let entry = Id(1);
        let blocks = vec![BasicBlock::new(entry, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])])];
        Function::new(Id(100), "f", blocks)
    }

    #[test]
    fn invalidate_except_drops_unnamed_analyses() {
        let function = trivial_function();
        let mut cache = AnalysisCache::new();
        cache.dominators(&function);
        cache.def_use(&function);
        assert!(cache.cfg.is_some());
        assert!(cache.dominators.is_some());
        assert!(cache.def_use.is_some());

        cache.invalidate_except(PreservedAnalyses::DEF_USE);
        assert!(cache.cfg.is_none());
        assert!(cache.dominators.is_none());
        assert!(cache.def_use.is_some());
    }
}
