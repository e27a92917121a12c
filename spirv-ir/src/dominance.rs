use rustc_hash::FxHashMap;

use crate::{cfg::CfgIndex, function::Function, ids::Id};

/// A dominator tree computed with the iterative, engineered algorithm of
///
/// > Keith D. Cooper, Timothy J. Harvey, and Ken Kennedy. 2001. *A Simple, Fast
/// > Dominance Algorithm.* Rice University, CS Technical Report 06-33870.
///
/// This runs in practice in close to linear time on the small, structured CFGs the
/// unroller operates over, and is considerably simpler to implement correctly than the
/// Lengauer-Tarjan family of algorithms.
#[derive(Debug, Clone, Default)]
pub struct DominatorTree {
    /// Reverse postorder numbering; `rpo[i]` is the block at position `i`.
    rpo: Vec<Id>,
    /// Maps a block id to its position in `rpo`.
    rpo_number: FxHashMap<Id, usize>,
    /// Maps a block id to the block id of its immediate dominator.
    idom: FxHashMap<Id, Id>,
}

impl DominatorTree {
    pub fn compute(function: &Function, cfg: &CfgIndex) -> Self {
        let entry = function.entry_block();
        let rpo = reverse_postorder(entry, cfg);
        let mut rpo_number = FxHashMap::default();
        for (i, id) in rpo.iter().enumerate() {
            rpo_number.insert(*id, i);
        }

        let mut idom: FxHashMap<Id, Id> = FxHashMap::default();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            // Skip the entry node (index 0): it has no dominator to recompute.
            for &node in rpo.iter().skip(1) {
                let mut new_idom = None;
                for &pred in cfg.preds(node) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_number, current, pred),
                    });
                }
                let Some(new_idom) = new_idom else { continue };
                if idom.get(&node) != Some(&new_idom) {
                    idom.insert(node, new_idom);
                    changed = true;
                }
            }
        }

        Self { rpo, rpo_number, idom }
    }

    /// Returns true if `reachable` was visited during the reverse-postorder walk from
    /// the entry block (i.e. it participates in the dominator tree at all).
    pub fn is_reachable(&self, block: Id) -> bool {
        self.rpo_number.contains_key(&block)
    }

    /// The immediate dominator of `block`, or `None` if `block` is unreachable or is
    /// the entry block.
    pub fn immediate_dominator(&self, block: Id) -> Option<Id> {
        let idom = *self.idom.get(&block)?;
        (idom != block).then_some(idom)
    }

    /// Returns true if `a` dominates `b` (a block always dominates itself).
    pub fn dominates(&self, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        let (Some(&mut_a), Some(&_)) = (self.rpo_number.get(&a), self.rpo_number.get(&b)) else {
            return false;
        };
        let _ = mut_a;
        let mut current = b;
        while let Some(&idom) = self.idom.get(&current) {
            if idom == current {
                // reached the root without finding `a`
                return false;
            }
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Pre-order traversal of the dominator tree rooted at `root`.
    ///
    /// This is the ordering the Loop Analyzer uses to linearize a loop's body
    /// blocks: it visits a block only after its immediate dominator, which guarantees
    /// that the header is visited first and that clones preserve relative block order.
    pub fn pre_order_from(&self, root: Id) -> Vec<Id> {
        let mut children: FxHashMap<Id, Vec<Id>> = FxHashMap::default();
        for &node in &self.rpo {
            if let Some(idom) = self.immediate_dominator(node) {
                children.entry(idom).or_default().push(node);
            }
        }
        // Children are discovered in RPO order already, which keeps traversal stable
        // and deterministic between runs on equivalent input.

        let mut order = Vec::new();
        let mut stack = vec![root];
        let mut visited = rustc_hash::FxHashSet::default();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            order.push(node);
            if let Some(kids) = children.get(&node) {
                for &kid in kids.iter().rev() {
                    stack.push(kid);
                }
            }
        }
        order
    }
}

fn intersect(
    idom: &FxHashMap<Id, Id>,
    rpo_number: &FxHashMap<Id, usize>,
    mut a: Id,
    mut b: Id,
) -> Id {
    while a != b {
        while rpo_number[&a] > rpo_number[&b] {
            a = idom[&a];
        }
        while rpo_number[&b] > rpo_number[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder(entry: Id, cfg: &CfgIndex) -> Vec<Id> {
    let mut visited = rustc_hash::FxHashSet::default();
    let mut postorder = Vec::new();
    // Explicit stack of (node, next-child-index-to-visit) to avoid recursion depth
    // limits on deeply nested CFGs.
    let mut stack: Vec<(Id, usize)> = vec![(entry, 0)];
    visited.insert(entry);

    while let Some((node, child_idx)) = stack.last_mut() {
        let succs = cfg.succs(*node);
        if *child_idx < succs.len() {
            let next = succs[*child_idx];
            *child_idx += 1;
            if visited.insert(next) {
                stack.push((next, 0));
            }
        } else {
            postorder.push(*node);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BasicBlock,
        function::Function,
        ids::Id,
        instruction::{Instruction, Opcode},
    };

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

    /// Build a diamond CFG: entry -> (left, right) -> merge.
    fn diamond() -> (Function, Id, Id, Id, Id) {
        let entry = Id(1);
        let left = Id(2);
        let right = Id(3);
        let merge = Id(4);
        let cond = Id(5);

        let blocks = vec![
            BasicBlock::new(entry, vec![cond_br(cond, left, right)]),
            BasicBlock::new(left, vec![br(merge)]),
            BasicBlock::new(right, vec![br(merge)]),
            BasicBlock::new(merge, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])]),
        ];
        let func = Function::new(Id(100), "diamond", blocks);
        (func, entry, left, right, merge)
    }

    #[test]
    fn computes_immediate_dominators_for_a_diamond() {
        let (func, entry, left, right, merge) = diamond();
        let cfg = CfgIndex::build(&func);
        let dom = DominatorTree::compute(&func, &cfg);

        assert_eq!(dom.immediate_dominator(left), Some(entry));
        assert_eq!(dom.immediate_dominator(right), Some(entry));
        assert_eq!(dom.immediate_dominator(merge), Some(entry));
        assert_eq!(dom.immediate_dominator(entry), None);

        assert!(dom.dominates(entry, merge));
        assert!(!dom.dominates(left, merge));
        assert!(!dom.dominates(right, merge));
        assert!(dom.dominates(entry, left));
    }

    #[test]
    fn pre_order_visits_parents_before_children() {
        let (func, entry, left, right, merge) = diamond();
        let cfg = CfgIndex::build(&func);
        let dom = DominatorTree::compute(&func, &cfg);

        let order = dom.pre_order_from(entry);
        let pos = |id: Id| order.iter().position(|&b| b == id).unwrap();
        assert_eq!(pos(entry), 0);
        assert!(pos(entry) < pos(left));
        assert!(pos(entry) < pos(right));
        assert!(pos(entry) < pos(merge));
    }
}
