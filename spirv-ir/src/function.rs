use crate::{
    block::BasicBlock,
    error::IrError,
    ids::Id,
    instruction::{Instruction, Opcode},
};

/// An ordered list of basic blocks; the first block is the entry.
#[derive(Debug, Clone)]
pub struct Function {
    pub id: Id,
    pub name: String,
    blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(id: Id, name: impl Into<String>, blocks: Vec<BasicBlock>) -> Self {
        assert!(!blocks.is_empty(), "function must have an entry block");
        Self { id, name: name.into(), blocks }
    }

    #[inline]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    #[inline]
    pub fn blocks_mut(&mut self) -> &mut Vec<BasicBlock> {
        &mut self.blocks
    }

    #[inline]
    pub fn entry_block(&self) -> Id {
        self.blocks[0].id()
    }

    pub fn block_index(&self, id: Id) -> Option<usize> {
        self.blocks.iter().position(|b| b.id() == id)
    }

    pub fn block(&self, id: Id) -> Result<&BasicBlock, IrError> {
        self.block_index(id).map(|idx| &self.blocks[idx]).ok_or(IrError::UnknownBlock(id))
    }

    pub fn block_mut(&mut self, id: Id) -> Result<&mut BasicBlock, IrError> {
        let idx = self.block_index(id).ok_or(IrError::UnknownBlock(id))?;
        Ok(&mut self.blocks[idx])
    }

    /// Splice `new_blocks` into this function's block list immediately before the block
    /// identified by `insert_point`.
    ///
    /// # Panics
    ///
    /// Panics if `insert_point` does not name a block in this function: that
    /// is a fatal internal-invariant bug, never reachable on legal input, not a
    /// recoverable user error.
    pub fn splice_blocks_before(&mut self, insert_point: Id, new_blocks: Vec<BasicBlock>) {
        let idx = self
            .block_index(insert_point)
            .unwrap_or_else(|| panic!("insertion point {insert_point} not found in function"));
        self.blocks.splice(idx..idx, new_blocks);
    }

    /// Splice `new_blocks` into this function's block list immediately after the block
    /// identified by `after`.
    pub fn splice_blocks_after(&mut self, after: Id, new_blocks: Vec<BasicBlock>) {
        let idx = self
            .block_index(after)
            .unwrap_or_else(|| panic!("insertion point {after} not found in function"));
        self.blocks.splice(idx + 1..idx + 1, new_blocks);
    }
}

/// An ordered list of functions, plus the module-wide id allocator and constant pool.
#[derive(Debug, Clone)]
pub struct Module {
    functions: Vec<Function>,
    allocator: crate::ids::IdAllocator,
    /// Module-scope (`OpConstant`) instructions, keyed by `(type, value)` to avoid
    /// materializing duplicate constants.
    constants: Vec<Instruction>,
    int_constants: rustc_hash::FxHashMap<(Id, i64), Id>,
}

impl Module {
    pub fn new(functions: Vec<Function>, allocator: crate::ids::IdAllocator) -> Self {
        Self {
            functions,
            allocator,
            constants: Vec::new(),
            int_constants: Default::default(),
        }
    }

    /// Construct a module with a pre-populated constant pool, registering each
    /// `OpConstant`-shaped instruction in the int-constant dedup table so later calls
    /// to [Self::get_or_make_int_constant] reuse them instead of materializing
    /// duplicates. Used by test fixtures that need constants at specific, pre-chosen
    /// ids.
    pub fn with_constants(
        functions: Vec<Function>,
        allocator: crate::ids::IdAllocator,
        constants: Vec<Instruction>,
    ) -> Self {
        let mut int_constants = rustc_hash::FxHashMap::default();
        for inst in &constants {
            if let Opcode::ConstantInt { value, .. } = inst.opcode() {
                int_constants.insert((inst.result_type(), *value), inst.result_id());
            }
        }
        Self { functions, allocator, constants, int_constants }
    }

    #[inline]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    #[inline]
    pub fn functions_mut(&mut self) -> &mut Vec<Function> {
        &mut self.functions
    }

    #[inline]
    pub fn allocator_mut(&mut self) -> &mut crate::ids::IdAllocator {
        &mut self.allocator
    }

    #[inline]
    pub fn constants(&self) -> &[Instruction] {
        &self.constants
    }

    pub fn function_mut(&mut self, id: Id) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.id == id)
    }

    /// Run `f` with disjoint mutable access to the function named by `id` and to the
    /// rest of the module (its id allocator and constant pool).
    ///
    /// A transform that needs both `&mut Function` and `&mut Module` at once (e.g. to
    /// clone blocks while also minting fresh ids or materializing constants) can't get
    /// both from a single `&mut Module` through ordinary field access across a crate
    /// boundary. This temporarily removes the function from `self.functions`, hands it
    /// to `f` alongside `self` (which no longer aliases it), and reinserts it at the
    /// same position afterward — a two-phase move rather than any unsafe aliasing.
    ///
    /// Returns `None` if no function with `id` exists; `f` is not called in that case.
    pub fn with_function_mut<R>(&mut self, id: Id, f: impl FnOnce(&mut Function, &mut Module) -> R) -> Option<R> {
        let idx = self.functions.iter().position(|func| func.id == id)?;
        let mut function = self.functions.remove(idx);
        let result = f(&mut function, self);
        self.functions.insert(idx, function);
        Some(result)
    }

    /// Return the id of an existing integer constant of `(type, value)`, or materialize
    /// a fresh one (signed if `value` is negative, unsigned otherwise).
    ///
    /// Used by the residual-unroll path to produce the `remainder` bound constant
    /// without creating duplicate constants when the value recurs.
    pub fn get_or_make_int_constant(&mut self, type_id: Id, value: i64) -> Id {
        if let Some(id) = self.int_constants.get(&(type_id, value)) {
            return *id;
        }
        let id = self.allocator.take_next_id();
        let signed = value < 0;
        self.constants.push(Instruction::new(
            Opcode::ConstantInt { value, signed },
            type_id,
            id,
            &[],
        ));
        self.int_constants.insert((type_id, value), id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BasicBlock;

    fn trivial_function(id: Id) -> Function {
        let entry = Id(1);
        let blocks = vec![BasicBlock::new(entry, vec![Instruction::new(Opcode::Return, Id::NONE, Id::NONE, &[])])];
        Function::new(id, format!("f{id}"), blocks)
    }

    #[test]
    fn with_function_mut_grants_disjoint_access_and_preserves_order() {
        let mut module = Module::new(vec![trivial_function(Id(1)), trivial_function(Id(2)), trivial_function(Id(3))], IdAllocator::new(10));

        let minted = module
            .with_function_mut(Id(2), |function, module| {
                assert_eq!(function.id, Id(2));
                module.allocator_mut().take_next_id()
            })
            .unwrap();

        assert_eq!(minted, Id(10));
        let ids: Vec<Id> = module.functions().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![Id(1), Id(2), Id(3)]);
    }

    #[test]
    fn with_function_mut_returns_none_for_unknown_function() {
        let mut module = Module::new(vec![trivial_function(Id(1))], IdAllocator::new(10));
        assert!(module.with_function_mut(Id(99), |_, _| ()).is_none());
    }
}
