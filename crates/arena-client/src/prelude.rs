//! Common imports for driving a comparison round.
pub use crate::{
    ArenaClientConfig, ArenaError, ComparisonResults, GenerationController, GenerationMode,
    GenerationRequest, ModelIdentity, ModelSlot, SessionSnapshot, SessionState, StreamHandle,
    SubmissionState, SubmitOutcome,
};
