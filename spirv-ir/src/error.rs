use crate::ids::Id;

/// Fatal, internal-invariant errors surfaced by the data model.
///
/// None of these are reachable from legal input that has passed through the
/// appropriate legality checks upstream (e.g. `spirv-unroll`'s legality checker); they
/// exist so a caller can fail loudly with context instead of panicking the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IrError {
    #[error("block {0} does not exist in this function")]
    UnknownBlock(Id),
    #[error("no definition found for id {0}")]
    UnknownDef(Id),
    #[error("instruction {0} is not a phi")]
    NotAPhi(Id),
    #[error("phi {phi} has no incoming pair from predecessor {predecessor}")]
    MissingPhiOperand { phi: Id, predecessor: Id },
}
