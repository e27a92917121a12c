use spirv_analysis::LoopId;
use spirv_ir::Id;

/// Fatal, internal-invariant errors raised by the unroll transform.
///
/// These are never reachable on a loop [crate::legality::can_perform_unroll]
/// accepted. They indicate a bug in the transform itself or in an upstream analysis,
/// and are surfaced as `Err` rather than a panic so a calling pass manager or test
/// harness can decide how to react — but any mutation already performed before the
/// error is considered to have left the module poisoned; the caller must not continue
/// transforming it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnrollError {
    #[error("ir error while unrolling: {0}")]
    Ir(#[from] spirv_ir::IrError),
    #[error("analysis error while unrolling: {0}")]
    Analysis(#[from] spirv_analysis::AnalysisError),
    #[error("could not determine the condition block for loop header {0}")]
    NoConditionBlock(Id),
    #[error("no induction variable found in loop header {0}")]
    NoInductionVariable(Id),
    #[error("could not statically determine the iteration count of loop header {0}")]
    NoIterationCount(Id),
    #[error("loop {0:?} has an unexpanded inner loop; unroll innermost-first")]
    InnerLoopNotUnrolled(LoopId),
    #[error("block {0} was not found among the loop's ordered body blocks during cloning")]
    BlockNotCloned(Id),
}
