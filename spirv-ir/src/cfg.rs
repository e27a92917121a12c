use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{function::Function, ids::Id};

/// An index of predecessor/successor edges for a single [Function]'s control-flow
/// graph.
///
/// This corresponds to the "CFG Index" external interface: `preds`/`succs`. It is
/// rebuilt (not incrementally updated) whenever the CFG changes, which the transform
/// does explicitly via [crate::analysis::AnalysisCache::invalidate_except].
#[derive(Debug, Clone, Default)]
pub struct CfgIndex {
    succs: FxHashMap<Id, SmallVec<[Id; 2]>>,
    preds: FxHashMap<Id, SmallVec<[Id; 2]>>,
}

impl CfgIndex {
    pub fn build(function: &Function) -> Self {
        let mut succs: FxHashMap<Id, SmallVec<[Id; 2]>> = FxHashMap::default();
        let mut preds: FxHashMap<Id, SmallVec<[Id; 2]>> = FxHashMap::default();

        for block in function.blocks() {
            preds.entry(block.id()).or_default();
        }

        for block in function.blocks() {
            let block_id = block.id();
            let targets = block.terminator().successors();
            for target in targets.iter().copied() {
                preds.entry(target).or_default().push(block_id);
            }
            succs.insert(block_id, targets);
        }

        Self { succs, preds }
    }

    pub fn succs(&self, block: Id) -> &[Id] {
        self.succs.get(&block).map(SmallVec::as_slice).unwrap_or(&[])
    }

    pub fn preds(&self, block: Id) -> &[Id] {
        self.preds.get(&block).map(SmallVec::as_slice).unwrap_or(&[])
    }
}
