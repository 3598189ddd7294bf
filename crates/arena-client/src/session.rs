use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::accumulator::{ModelBuffers, SlotText};
use crate::errors::ArenaError;
use crate::model::{ComparisonResults, ModelAssignment, ModelSlot};
use crate::request::GenerationRequest;
use crate::stream::StreamEvent;

/// Lifecycle of one comparison round.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Idle,
    /// Non-streaming request in flight.
    Requesting,
    /// Streaming request in flight. `active` is advisory, for display only.
    Streaming { active: Option<ModelSlot> },
    Complete,
    Cancelled,
    Error,
}

impl SessionState {
    /// True while a request is in flight.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Requesting | Self::Streaming { .. })
    }

    /// True once the round can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Error)
    }
}

/// Per-slot stream progress.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SlotProgress {
    #[default]
    Pending,
    Streaming,
    Done,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamProgress {
    pub model_a: SlotProgress,
    pub model_b: SlotProgress,
}

impl StreamProgress {
    pub fn get(&self, slot: ModelSlot) -> SlotProgress {
        match slot {
            ModelSlot::A => self.model_a,
            ModelSlot::B => self.model_b,
        }
    }

    fn set(&mut self, slot: ModelSlot, progress: SlotProgress) {
        match slot {
            ModelSlot::A => self.model_a = progress,
            ModelSlot::B => self.model_b = progress,
        }
    }
}

/// Owned view of a session handed to the rendering layer.
///
/// The texts share storage with the live buffers, so taking one is cheap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: uuid::Uuid,
    pub state: SessionState,
    pub assignment: Option<ModelAssignment>,
    pub model_a: SlotText,
    pub model_b: SlotText,
    pub results: Option<ComparisonResults>,
    pub progress: StreamProgress,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn text(&self, slot: ModelSlot) -> &SlotText {
        match slot {
            ModelSlot::A => &self.model_a,
            ModelSlot::B => &self.model_b,
        }
    }
}

/// State machine for one comparison round.
///
/// All mutation goes through this type. Once the session is `Cancelled`
/// (or otherwise terminal) every mutating call is a no-op, so callbacks that
/// fire late cannot touch the buffers.
#[derive(Debug)]
pub struct GenerationSession {
    id: uuid::Uuid,
    request: Option<GenerationRequest>,
    state: SessionState,
    buffers: ModelBuffers,
    assignment: Option<ModelAssignment>,
    results: Option<ComparisonResults>,
    progress: StreamProgress,
    last_error: Option<String>,
    cancel: CancellationToken,
    idempotency_key: uuid::Uuid,
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationSession {
    /// Creates an idle session with its own cancellation token.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            request: None,
            state: SessionState::Idle,
            buffers: ModelBuffers::new(),
            assignment: None,
            results: None,
            progress: StreamProgress::default(),
            last_error: None,
            cancel: CancellationToken::new(),
            idempotency_key: uuid::Uuid::new_v4(),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> Option<&GenerationRequest> {
        self.request.as_ref()
    }

    pub fn assignment(&self) -> Option<ModelAssignment> {
        self.assignment
    }

    pub fn buffers(&self) -> &ModelBuffers {
        &self.buffers
    }

    /// Frozen results; `None` until the round completes with a known assignment.
    pub fn results(&self) -> Option<&ComparisonResults> {
        self.results.as_ref()
    }

    pub fn progress(&self) -> StreamProgress {
        self.progress
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Token that aborts this session's transport.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Key reused by every preference submission attempt for this round.
    pub fn idempotency_key(&self) -> uuid::Uuid {
        self.idempotency_key
    }

    /// Frozen results if present, else the live buffers read through a known assignment.
    pub fn derive_results(&self) -> Option<ComparisonResults> {
        self.results
            .clone()
            .or_else(|| self.assignment.map(|a| self.buffers.resolve(a)))
    }

    /// `Idle -> Requesting`.
    pub fn begin_request(&mut self, request: GenerationRequest) -> Result<(), ArenaError> {
        self.ensure_idle()?;
        self.request = Some(request);
        self.state = SessionState::Requesting;
        Ok(())
    }

    /// `Idle -> Streaming`, starting from empty buffers and an unknown assignment.
    pub fn begin_streaming(&mut self, request: GenerationRequest) -> Result<(), ArenaError> {
        self.ensure_idle()?;
        self.buffers.reset();
        self.assignment = None;
        self.results = None;
        self.progress = StreamProgress::default();
        self.last_error = None;
        self.request = Some(request);
        self.state = SessionState::Streaming { active: None };
        Ok(())
    }

    /// Applies one decoded event. Returns whether the session changed.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        let SessionState::Streaming { active } = self.state else {
            debug!(session_id = %self.id, state = ?self.state, "dropping event for inactive session");
            return false;
        };
        match event {
            StreamEvent::Header { model_a_is_base } => match self.assignment {
                None => {
                    self.assignment = Some(ModelAssignment::new(model_a_is_base));
                    true
                }
                Some(existing) => {
                    if existing.model_a_is_base != model_a_is_base {
                        warn!(session_id = %self.id, "ignoring conflicting header; assignment is fixed for the round");
                    }
                    false
                }
            },
            StreamEvent::ModelStart { model } => {
                self.progress.set(model, SlotProgress::Streaming);
                self.state = SessionState::Streaming {
                    active: Some(model),
                };
                true
            }
            StreamEvent::Token { model, text, .. } => {
                if text.is_empty() {
                    return false;
                }
                self.buffers.append(model, &text);
                true
            }
            StreamEvent::ModelEnd { model } => {
                self.progress.set(model, SlotProgress::Done);
                let next = match active {
                    Some(current) if current != model => Some(current),
                    _ if self.progress.get(model.other()) != SlotProgress::Done => {
                        Some(model.other())
                    }
                    _ => None,
                };
                self.state = SessionState::Streaming { active: next };
                true
            }
            StreamEvent::Complete => {
                self.finalize();
                true
            }
            StreamEvent::Unknown => false,
        }
    }

    /// Transport closed; finalizes if no `complete` event was seen.
    pub fn finish_stream(&mut self) -> bool {
        if !matches!(self.state, SessionState::Streaming { .. }) {
            return false;
        }
        debug!(session_id = %self.id, "stream ended without complete event");
        self.finalize();
        true
    }

    /// `Requesting -> Complete` with a single-shot response.
    pub fn complete_with(
        &mut self,
        assignment: ModelAssignment,
        model_a: &str,
        model_b: &str,
    ) -> bool {
        if self.state != SessionState::Requesting {
            return false;
        }
        self.buffers.reset();
        self.buffers.append(ModelSlot::A, model_a);
        self.buffers.append(ModelSlot::B, model_b);
        self.assignment = Some(assignment);
        self.results = Some(self.buffers.resolve(assignment));
        self.state = SessionState::Complete;
        true
    }

    /// Live -> `Error`; buffers stay visible.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.last_error = Some(message.into());
        self.progress = StreamProgress::default();
        self.state = SessionState::Error;
        true
    }

    /// Live -> `Cancelled`, aborting the transport.
    ///
    /// The token is cancelled even when the session is not live so teardown
    /// always releases the transport.
    pub fn cancel(&mut self) -> bool {
        self.cancel.cancel();
        if !self.state.is_live() {
            return false;
        }
        self.progress = StreamProgress::default();
        self.state = SessionState::Cancelled;
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            state: self.state,
            assignment: self.assignment,
            model_a: self.buffers.get(ModelSlot::A).clone(),
            model_b: self.buffers.get(ModelSlot::B).clone(),
            results: self.results.clone(),
            progress: self.progress,
            last_error: self.last_error.clone(),
        }
    }

    fn finalize(&mut self) {
        self.state = SessionState::Complete;
        self.results = self.assignment.map(|a| self.buffers.resolve(a));
        if self.results.is_none() {
            warn!(session_id = %self.id, "round completed without header; results deferred");
        }
    }

    fn ensure_idle(&self) -> Result<(), ArenaError> {
        if self.state != SessionState::Idle {
            return Err(ArenaError::Busy(format!(
                "session {} is {:?}, expected Idle",
                self.id, self.state
            )));
        }
        Ok(())
    }
}
