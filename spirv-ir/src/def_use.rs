use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{function::Function, ids::Id};

/// The location of an instruction within a function: which block, and at what index
/// within that block's instruction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Loc {
    pub block: Id,
    pub index: usize,
}

/// Tracks, for every id defined in a function, where it is defined and every location
/// that uses it.
///
/// This corresponds to the "Def-Use Manager" external interface. Like [crate::cfg::CfgIndex]
/// and [crate::dominance::DominatorTree], it is a snapshot: built once from a [Function] and
/// rebuilt (never incrementally patched) whenever the transform invalidates it via
/// [crate::analysis::AnalysisCache].
#[derive(Debug, Clone, Default)]
pub struct DefUseManager {
    defs: FxHashMap<Id, Loc>,
    users: FxHashMap<Id, SmallVec<[Loc; 4]>>,
}

impl DefUseManager {
    pub fn build(function: &Function) -> Self {
        let mut defs = FxHashMap::default();
        let mut users: FxHashMap<Id, SmallVec<[Loc; 4]>> = FxHashMap::default();

        for block in function.blocks() {
            for (index, inst) in block.instructions().iter().enumerate() {
                let loc = Loc { block: block.id(), index };
                if inst.has_result() {
                    defs.insert(inst.result_id(), loc);
                }
                inst.for_each_in_id(|id| {
                    if id.is_some() {
                        users.entry(id).or_default().push(loc);
                    }
                });
            }
        }

        Self { defs, users }
    }

    /// The location `id` was defined at, or `None` if `id` is not defined in this
    /// function (e.g. it is a module-scope constant or a different function's value).
    pub fn get_def(&self, id: Id) -> Option<Loc> {
        self.defs.get(&id).copied()
    }

    /// Every location that uses `id`, in no particular order.
    pub fn users(&self, id: Id) -> impl Iterator<Item = Loc> + '_ {
        self.users.get(&id).into_iter().flatten().copied()
    }

    /// The number of distinct locations that use `id`.
    pub fn num_users(&self, id: Id) -> usize {
        self.users.get(&id).map_or(0, |locs| locs.len())
    }

    /// Rewrite every in-operand across `function` that names `old_id` to name `new_id`
    /// instead.
    ///
    /// This mutates `function` directly; the caller is responsible for rebuilding (or
    /// invalidating) this [DefUseManager] afterwards, since the index recorded here is a
    /// snapshot and does not track the edit.
    pub fn replace_all_uses_with(function: &mut Function, old_id: Id, new_id: Id) {
        if old_id == new_id {
            return;
        }
        for block in function.blocks_mut() {
            for inst in block.instructions_mut() {
                inst.for_each_in_id_mut(|id| {
                    if *id == old_id {
                        *id = new_id;
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BasicBlock,
        instruction::{Instruction, Opcode},
    };

    fn func_with_one_use() -> (Function, Id, Id) {
        let entry = Id(1);
        let const_id = Id(2);
        let store = Id(3);

        let blocks = vec![BasicBlock::new(
            entry,
            vec![
                Instruction::new(Opcode::ConstantInt { value: 1, signed: false }, Id::NONE, const_id, &[]),
                Instruction::new(
                    Opcode::Effect,
                    Id::NONE,
                    store,
                    &[crate::instruction::Operand::Id(const_id)],
                ),
                Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[]),
            ],
        )];
        (Function::new(Id(100), "f", blocks), entry, const_id)
    }

    #[test]
    fn tracks_definitions_and_users() {
        let (func, entry, const_id) = func_with_one_use();
        let def_use = DefUseManager::build(&func);

        assert_eq!(def_use.get_def(const_id), Some(Loc { block: entry, index: 1 }));
        assert_eq!(def_use.num_users(const_id), 1);
        assert_eq!(def_use.users(const_id).next(), Some(Loc { block: entry, index: 2 }));
    }

    #[test]
    fn replace_all_uses_with_rewrites_every_operand() {
        let (mut func, _entry, const_id) = func_with_one_use();
        let replacement = Id(99);

        DefUseManager::replace_all_uses_with(&mut func, const_id, replacement);

        let rewritten = DefUseManager::build(&func);
        assert_eq!(rewritten.num_users(const_id), 0);
        assert_eq!(rewritten.num_users(replacement), 1);
    }
}
