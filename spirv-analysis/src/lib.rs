//! Structured loop discovery and induction-variable analysis, built on top of
//! `spirv-ir`'s CFG and dominance analyses.
//!
//! This crate owns the "Loop Descriptor" and "Loop Utilities" external interfaces of
//! the loop unroller: it knows how to find every structured loop in a function from its
//! `OpLoopMerge` markers, nest them correctly, and extract a loop's induction
//! variable and static iteration count. It does not know how to transform anything —
//! that's `spirv-unroll`.

pub mod error;
pub mod induction;
pub mod loop_forest;

pub use error::AnalysisError;
pub use induction::{condition_compare, find_induction_variable, find_number_of_iterations, InductionVariable, IterationCount};
pub use loop_forest::{Loop, LoopForest, LoopId};
