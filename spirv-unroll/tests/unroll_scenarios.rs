//! End-to-end unroll scenarios: full unroll, clean partial unroll, residual partial
//! unroll, and the `factor >= iterations` promotion to full unroll.
//!
//! Each test builds a canonical `for (i = init; i < bound; i += step) { effect(i) }`
//! loop by hand (the same shape `spirv-unroll`'s own unit-test fixtures use), runs the
//! transform through the public API, and checks the resulting structural shape rather
//! than re-deriving semantics with an interpreter.

use spirv_analysis::LoopForest;
use spirv_ir::{
    AnalysisCache, BasicBlock, CfgIndex, Cmp, DominatorTree, Function, Id, IdAllocator, Instruction, LoopControl,
    Module, Opcode, Operand,
};
use spirv_unroll::LoopUnrollPass;

const ENTRY: Id = Id(1);
const HEADER: Id = Id(2);
const BODY: Id = Id(3);
const LATCH: Id = Id(4);
const MERGE: Id = Id(5);
const TY: Id = Id(10);
const INIT_CONST: Id = Id(11);
const STEP_CONST: Id = Id(12);
const BOUND_CONST: Id = Id(13);
const PHI: Id = Id(20);
const STEPPED: Id = Id(21);
const COND: Id = Id(22);

fn br(target: Id) -> Instruction {
    Instruction::new(Opcode::Branch { target }, Id::NONE, Id::NONE, &[])
}

/// `for (i = init; i < bound; i += step) { effect(i); }`, with `effect` a single
/// opaque, result-less instruction reading the induction variable.
fn build_counting_loop(init: i64, step: i64, bound: i64) -> (Module, Function) {
    let blocks = vec![
        BasicBlock::new(ENTRY, vec![br(HEADER)]),
        BasicBlock::new(
            HEADER,
            vec![
                Instruction::new(
                    Opcode::Phi,
                    TY,
                    PHI,
                    &[Operand::Id(INIT_CONST), Operand::Id(ENTRY), Operand::Id(STEPPED), Operand::Id(LATCH)],
                ),
                Instruction::new(
                    Opcode::LoopMerge { merge: MERGE, continue_target: LATCH, control: LoopControl::UNROLL },
                    Id::NONE,
                    Id::NONE,
                    &[],
                ),
                br(BODY),
            ],
        ),
        BasicBlock::new(
            BODY,
            vec![
                Instruction::new(Opcode::Effect, Id::NONE, Id::NONE, &[Operand::Id(PHI)]),
                Instruction::new(Opcode::Compare(Cmp::SLessThan), Id::NONE, COND, &[Operand::Id(PHI), Operand::Id(BOUND_CONST)]),
                Instruction::new(
                    Opcode::BranchConditional { condition: COND, true_target: LATCH, false_target: MERGE },
                    Id::NONE,
                    Id::NONE,
                    &[],
                ),
            ],
        ),
        BasicBlock::new(
            LATCH,
            vec![Instruction::new(Opcode::IAdd, TY, STEPPED, &[Operand::Id(PHI), Operand::Id(STEP_CONST)]), br(HEADER)],
        ),
        BasicBlock::new(MERGE, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])]),
    ];

    let constants = vec![
        Instruction::new(Opcode::ConstantInt { value: init, signed: init < 0 }, TY, INIT_CONST, &[]),
        Instruction::new(Opcode::ConstantInt { value: step, signed: step < 0 }, TY, STEP_CONST, &[]),
        Instruction::new(Opcode::ConstantInt { value: bound, signed: bound < 0 }, TY, BOUND_CONST, &[]),
    ];
    let module = Module::with_constants(Vec::new(), IdAllocator::new(30), constants);
    let function = Function::new(Id(100), "main", blocks);
    (module, function)
}

/// Every block reachable from `entry` by walking terminator successors, in visitation
/// order.
fn reachable_blocks(function: &Function) -> Vec<Id> {
    let cfg = CfgIndex::build(function);
    let mut seen = vec![function.entry_block()];
    let mut i = 0;
    while i < seen.len() {
        let current = seen[i];
        i += 1;
        for &succ in cfg.succs(current) {
            if !seen.contains(&succ) {
                seen.push(succ);
            }
        }
    }
    seen
}

fn count_effects(function: &Function) -> usize {
    reachable_blocks(function)
        .iter()
        .map(|&id| function.block(id).unwrap())
        .flat_map(|block| block.instructions())
        .filter(|inst| matches!(inst.opcode(), Opcode::Effect))
        .count()
}

fn assert_no_duplicate_result_ids(function: &Function) {
    let mut seen = std::collections::HashSet::new();
    for block in function.blocks() {
        for inst in block.instructions() {
            if inst.has_result() {
                assert!(seen.insert(inst.result_id()), "duplicate result id {}", inst.result_id());
            }
        }
    }
}

fn assert_no_back_edge_to(function: &Function, header: Id) {
    for block in function.blocks() {
        assert!(
            !block.terminator().successors().contains(&header),
            "block {} still branches back to header {}",
            block.id(),
            header
        );
    }
}

#[test]
fn s1_full_unroll_divisible() {
    let (mut module, mut function) = build_counting_loop(0, 1, 4);
    let cfg = CfgIndex::build(&function);
    let dominators = DominatorTree::compute(&function, &cfg);
    let mut forest = LoopForest::build(&function, &cfg, &dominators);
    let loop_id = forest.iter().next().unwrap().id();
    let mut cache = AnalysisCache::new();

    let changed = LoopUnrollPass::fully_unroll(&mut function, &mut module, &mut forest, &mut cache, loop_id).unwrap();
    assert!(changed);

    // No loop-merge survives: the header is no longer a structured loop header.
    assert!(function.block(HEADER).unwrap().structured_control().is_none());
    // No back-edge: nothing reachable branches to the header.
    assert_no_back_edge_to(&function, HEADER);
    // The induction phi is gone.
    assert_eq!(function.block(HEADER).unwrap().phis().count(), 0);
    // Four straight-line copies of the body.
    assert_eq!(count_effects(&function), 4);
    assert_no_duplicate_result_ids(&function);

    // The first copy's use of the induction variable was replaced by the initial value.
    let first_effect = function
        .block(BODY)
        .unwrap()
        .instructions()
        .iter()
        .find(|inst| matches!(inst.opcode(), Opcode::Effect))
        .unwrap();
    assert_eq!(first_effect.operands()[0].as_id(), Some(INIT_CONST));

    assert!(forest.get(loop_id).is_none(), "fully unrolled loop is swept from the forest");
}

#[test]
fn s2_clean_partial_unroll() {
    let (mut module, mut function) = build_counting_loop(0, 1, 4);
    let cfg = CfgIndex::build(&function);
    let dominators = DominatorTree::compute(&function, &cfg);
    let mut forest = LoopForest::build(&function, &cfg, &dominators);
    let loop_id = forest.iter().next().unwrap().id();
    let mut cache = AnalysisCache::new();

    let changed =
        LoopUnrollPass::partially_unroll(&mut function, &mut module, &mut forest, &mut cache, loop_id, 2).unwrap();
    assert!(changed);

    // The loop still exists and is still structured.
    assert!(function.block(HEADER).unwrap().structured_control().is_some());
    // Two body copies now live under one loop-merge.
    assert_eq!(count_effects(&function), 2);
    // The condition block's comparison is untouched (still against the original bound).
    let compare = function
        .block(BODY)
        .unwrap()
        .instructions()
        .iter()
        .find(|inst| matches!(inst.opcode(), Opcode::Compare(_)))
        .unwrap();
    assert_eq!(compare.in_operand(1).as_id(), Some(BOUND_CONST));
    // The phi's latch-side incoming pair no longer refers to the original latch.
    let phi = function.block(HEADER).unwrap().phis().next().unwrap();
    let (_, latch_label) = phi.phi_incoming().find(|(_, label)| *label != ENTRY).unwrap();
    assert_ne!(latch_label, LATCH);
    // The surviving loop-merge's continue target follows the real back-edge to the
    // final clone's latch, not the stale original one.
    let loop_merge = function.block(HEADER).unwrap().structured_control().unwrap().opcode().clone();
    let Opcode::LoopMerge { continue_target, .. } = loop_merge else { panic!("expected a loop-merge") };
    assert_eq!(continue_target, latch_label);
    assert_ne!(continue_target, LATCH);
    assert_no_duplicate_result_ids(&function);
    assert!(forest.get(loop_id).is_some(), "a clean partial unroll never removes the loop");
}

#[test]
fn s3_residual_partial_unroll() {
    let (mut module, mut function) = build_counting_loop(0, 1, 10);
    let cfg = CfgIndex::build(&function);
    let dominators = DominatorTree::compute(&function, &cfg);
    let mut forest = LoopForest::build(&function, &cfg, &dominators);
    let loop_id = forest.iter().next().unwrap().id();
    let mut cache = AnalysisCache::new();

    let changed =
        LoopUnrollPass::partially_unroll(&mut function, &mut module, &mut forest, &mut cache, loop_id, 3).unwrap();
    assert!(changed);

    // Two loops now exist: the original (now residual) loop, and a new sibling.
    let remaining: Vec<_> = forest.iter().filter(|l| !l.is_removed()).collect();
    assert_eq!(remaining.len(), 2);
    assert!(forest.get(loop_id).is_some(), "the residual loop keeps the original loop id");

    // The original loop's upper bound was rewritten to init + (10 % 3) * step == 1.
    let compare = function
        .block(BODY)
        .unwrap()
        .instructions()
        .iter()
        .find(|inst| matches!(inst.opcode(), Opcode::Compare(_)))
        .unwrap();
    let new_bound_id = compare.in_operand(1).as_id().unwrap();
    let new_bound = module.constants().iter().find(|c| c.result_id() == new_bound_id).unwrap();
    assert_eq!(*new_bound.opcode(), Opcode::ConstantInt { value: 1, signed: false });

    // The new sibling loop is a factor-3 unrolled loop: three body copies live in its
    // (fresh) blocks, reachable from the original merge block onward.
    let new_loop = remaining.iter().find(|l| l.id() != loop_id).unwrap();
    assert_eq!(new_loop.parent(), forest.get(loop_id).unwrap().parent());
    let mut effect_count = 0;
    for &block_id in new_loop.body_blocks().collect::<Vec<_>>().iter() {
        effect_count += function
            .block(block_id)
            .unwrap()
            .instructions()
            .iter()
            .filter(|inst| matches!(inst.opcode(), Opcode::Effect))
            .count();
    }
    assert_eq!(effect_count, 3);
    assert_no_duplicate_result_ids(&function);
}

#[test]
fn s6_large_factor_promotes_to_full_unroll() {
    let (mut module_full, mut function_full) = build_counting_loop(0, 1, 4);
    let cfg = CfgIndex::build(&function_full);
    let dominators = DominatorTree::compute(&function_full, &cfg);
    let mut forest_full = LoopForest::build(&function_full, &cfg, &dominators);
    let loop_full = forest_full.iter().next().unwrap().id();
    let mut cache_full = AnalysisCache::new();
    LoopUnrollPass::fully_unroll(&mut function_full, &mut module_full, &mut forest_full, &mut cache_full, loop_full)
        .unwrap();

    let (mut module_partial, mut function_partial) = build_counting_loop(0, 1, 4);
    let cfg = CfgIndex::build(&function_partial);
    let dominators = DominatorTree::compute(&function_partial, &cfg);
    let mut forest_partial = LoopForest::build(&function_partial, &cfg, &dominators);
    let loop_partial = forest_partial.iter().next().unwrap().id();
    let mut cache_partial = AnalysisCache::new();
    let changed = LoopUnrollPass::partially_unroll(
        &mut function_partial,
        &mut module_partial,
        &mut forest_partial,
        &mut cache_partial,
        loop_partial,
        99,
    )
    .unwrap();
    assert!(changed);

    // Same shape modulo id allocation: no loop-merge, no back-edge, four body copies.
    assert!(function_partial.block(HEADER).unwrap().structured_control().is_none());
    assert_no_back_edge_to(&function_partial, HEADER);
    assert_eq!(count_effects(&function_partial), count_effects(&function_full));
    assert_eq!(function_partial.blocks().len(), function_full.blocks().len());
}
