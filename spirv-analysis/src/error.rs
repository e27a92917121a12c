use spirv_ir::Id;

/// Fatal errors surfaced by loop discovery and induction-variable analysis.
///
/// These are internal-invariant errors, not legality rejections — a loop that doesn't
/// look like a structured loop at all simply isn't registered in the [crate::LoopForest]
/// in the first place. What lands here is a loop the forest *did* register but that
/// some later caller (the unroll engine) asked for information about that turned out
/// not to exist, which should never happen on a loop the forest itself produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("no such loop: {0:?}")]
    UnknownLoop(crate::LoopId),
    #[error("block {0} is not the header of any loop in this forest")]
    NotALoopHeader(Id),
}
