use crate::model::{ComparisonResults, ModelAssignment, ModelIdentity, ModelSlot};
use crate::request::GenerationRequest;

/// Body of `POST /api/submit-preference`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub preferred_model: ModelIdentity,
    pub code_prefix: String,
    pub base_completion: String,
    pub finetuned_completion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
}

/// Why a preference could not be built.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PreferenceRefusal {
    #[error("no model selected")]
    NoSelection,
    #[error("model assignment unknown")]
    AssignmentUnknown,
    #[error("no completions to compare")]
    NoResults,
    #[error("no request for this round")]
    NoRequest,
}

impl Preference {
    /// Builds the payload from a UI selection and the round's state.
    pub fn build(
        selection: Option<ModelSlot>,
        assignment: Option<ModelAssignment>,
        results: Option<&ComparisonResults>,
        request: Option<&GenerationRequest>,
    ) -> Result<Self, PreferenceRefusal> {
        let slot = selection.ok_or(PreferenceRefusal::NoSelection)?;
        let assignment = assignment.ok_or(PreferenceRefusal::AssignmentUnknown)?;
        let results = results.ok_or(PreferenceRefusal::NoResults)?;
        let request = request.ok_or(PreferenceRefusal::NoRequest)?;
        Ok(Self {
            preferred_model: assignment.identity_of(slot),
            code_prefix: request.code_prefix().to_string(),
            base_completion: results.base_response.clone(),
            finetuned_completion: results.finetuned_response.clone(),
            experiment_id: request.experiment_id.clone(),
        })
    }
}

/// Progress of the preference submission for the current round.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SubmissionState {
    #[default]
    Idle,
    Submitting,
    Success,
}

/// Result of a submit call that did not fail on the network.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    Submitted,
    /// Nothing was sent.
    Refused(PreferenceRefusal),
}
