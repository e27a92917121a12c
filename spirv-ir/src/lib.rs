//! The data model shared by every crate in this workspace: instructions, basic blocks,
//! functions, modules, id allocation, def-use tracking, CFG indexing, dominance, and a
//! small instruction builder.
//!
//! This crate owns nothing SPIR-V-binary-specific — no parser, no disassembler, no
//! wire format. It models exactly the subset of the IR that the loop unroller (and any
//! analysis it depends on) needs: typed instructions in SSA form, grouped into basic
//! blocks and functions.

pub mod analysis;
pub mod block;
pub mod builder;
pub mod cfg;
pub mod def_use;
pub mod dominance;
pub mod error;
pub mod function;
pub mod ids;
pub mod instruction;

pub use analysis::{AnalysisCache, PreservedAnalyses};
pub use block::BasicBlock;
pub use builder::InstructionBuilder;
pub use cfg::CfgIndex;
pub use def_use::DefUseManager;
pub use dominance::DominatorTree;
pub use error::IrError;
pub use function::{Function, Module};
pub use ids::{Id, IdAllocator};
pub use instruction::{Cmp, Instruction, LoopControl, Opcode, Operand};
