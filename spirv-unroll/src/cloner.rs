use rustc_hash::FxHashMap;
use spirv_analysis::Loop;
use spirv_ir::{BasicBlock, Function, Id, IdAllocator, Instruction};

use crate::{analyzer::LoopAnalysis, error::UnrollError};

/// The engine's per-iteration cross-iteration state: which block/phi played
/// each canonical role in the *previous* copy, and the id maps accumulated while
/// cloning the *current* one.
///
/// `new_inst` doubles as the block-label remap table: a label is just the result id of
/// a block's leading `OpLabel`, so recording `old_label → new_label` here as well as in
/// `new_blocks` lets one remap pass rewrite branch targets,
/// phi predecessor labels, and ordinary dataflow operands uniformly.
#[derive(Debug, Clone)]
pub struct IterationState {
    pub prev_phi: Id,
    pub prev_latch: Id,
    pub prev_condition: Id,
    pub new_phi: Option<Id>,
    pub new_latch: Option<Id>,
    pub new_condition: Option<Id>,
    pub new_header: Option<Id>,
    pub new_blocks: FxHashMap<Id, Id>,
    pub new_inst: FxHashMap<Id, Id>,
}

impl IterationState {
    pub fn initial(prev_phi: Id, prev_latch: Id, prev_condition: Id) -> Self {
        Self {
            prev_phi,
            prev_latch,
            prev_condition,
            new_phi: None,
            new_latch: None,
            new_condition: None,
            new_header: None,
            new_blocks: FxHashMap::default(),
            new_inst: FxHashMap::default(),
        }
    }

    fn begin_iteration(&mut self) {
        self.new_phi = None;
        self.new_latch = None;
        self.new_condition = None;
        self.new_header = None;
        self.new_blocks.clear();
        self.new_inst.clear();
    }

    /// Advance `prev_* <- new_*` at the end of a copy.
    fn advance(&mut self) -> Result<(), UnrollError> {
        self.prev_phi = self.new_phi.ok_or(UnrollError::BlockNotCloned(self.prev_phi))?;
        self.prev_latch = self.new_latch.ok_or(UnrollError::BlockNotCloned(self.prev_latch))?;
        self.prev_condition = self.new_condition.ok_or(UnrollError::BlockNotCloned(self.prev_condition))?;
        Ok(())
    }
}

/// Deep-copies one basic block of a loop body with disciplined id remapping.
pub struct BlockCloner;

impl BlockCloner {
    /// Clone `source_block_id` into `pending_blocks`, recording its new label and every
    /// new instruction id in `state`. Does not remap operands yet — that happens once,
    /// after every block of the current iteration has been cloned.
    #[allow(clippy::too_many_arguments)]
    pub fn clone_block(
        function: &Function,
        loop_: &Loop,
        analysis: &LoopAnalysis,
        source_block_id: Id,
        allocator: &mut IdAllocator,
        preserve_structured_control: bool,
        state: &mut IterationState,
        pending_blocks: &mut Vec<BasicBlock>,
        block_pos: &mut FxHashMap<Id, usize>,
    ) -> Result<(), UnrollError> {
        let source = function.block(source_block_id)?;
        let mut clone_insts: Vec<Instruction> = source.instructions().to_vec();

        let old_label = source.id();
        let new_label = allocator.take_next_id();
        clone_insts[0].set_result_id(new_label);
        state.new_inst.insert(old_label, new_label);
        state.new_blocks.insert(old_label, new_label);

        for inst in clone_insts.iter_mut().skip(1) {
            if !inst.has_result() {
                continue;
            }
            let old_id = inst.result_id();
            let new_id = allocator.take_next_id();
            inst.set_result_id(new_id);
            state.new_inst.insert(old_id, new_id);
            if old_id == analysis.induction.phi {
                state.new_phi = Some(new_id);
            }
        }

        if source_block_id == loop_.latch() {
            state.new_latch = Some(new_label);
        }
        if source_block_id == loop_.header() {
            state.new_header = Some(new_label);
            if !preserve_structured_control {
                if let Some(pos) = clone_insts.iter().position(Instruction::is_structured_control) {
                    clone_insts.remove(pos);
                }
            }
        }
        if source_block_id == analysis.condition_block {
            state.new_condition = Some(new_label);
        }

        let body = clone_insts.split_off(1);
        let block = BasicBlock::new(new_label, body);
        block_pos.insert(new_label, pending_blocks.len());
        pending_blocks.push(block);
        Ok(())
    }
}

/// Rewrite every in-operand of every instruction in `new_block_ids` that names an old
/// id present in `new_inst` (operand remapping). Ids not present in the map
/// (module-scope constants, types, the loop's own header when intentionally preserving
/// a back-edge) are left untouched.
pub fn remap_operands(
    pending_blocks: &mut [BasicBlock],
    block_pos: &FxHashMap<Id, usize>,
    new_block_ids: impl IntoIterator<Item = Id>,
    new_inst: &FxHashMap<Id, Id>,
) {
    for id in new_block_ids {
        let idx = block_pos[&id];
        for inst in pending_blocks[idx].instructions_mut() {
            inst.for_each_in_id_mut(|operand_id| {
                if let Some(&new_id) = new_inst.get(operand_id) {
                    *operand_id = new_id;
                }
            });
        }
    }
}

pub(crate) fn finish_iteration(state: &mut IterationState) -> Result<(), UnrollError> {
    let result = state.advance();
    state.begin_iteration();
    result
}

pub(crate) fn start_iteration(state: &mut IterationState) {
    state.begin_iteration();
}
