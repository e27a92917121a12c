//! The structured-loop unroll transform itself, built on `spirv-ir`'s data model and
//! `spirv-analysis`'s loop descriptor.
//!
//! This crate owns only the transform: legality checking, loop analysis,
//! block cloning, the unroll engine's three strategies — full, clean partial,
//! residual partial —, and CFG splicing. It does not parse SPIR-V, does
//! not decide *whether* unrolling is profitable, and does not schedule itself among
//! other passes; [pass::LoopUnrollPass] is the thin driver a future pass-manager shell
//! would call.

pub mod analyzer;
pub mod cloner;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod legality;
pub mod pass;

pub use analyzer::LoopAnalysis;
pub use cloner::{BlockCloner, IterationState};
pub use engine::{fully_unroll, partially_unroll};
pub use error::UnrollError;
pub use finalize::CfgFinalizer;
pub use legality::can_perform_unroll;
pub use pass::LoopUnrollPass;
