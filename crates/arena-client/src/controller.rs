//! Owner of the single live comparison round.
//!
//! The controller swaps sessions atomically under one lock, drives the
//! streaming pump on a tokio task and publishes a [`SessionSnapshot`] after
//! every change so a rendering layer can redraw.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ArenaClientConfig;
use crate::demux::StreamDemultiplexer;
use crate::errors::ArenaError;
use crate::experiments::{ExperimentOption, experiment_options};
use crate::model::{ComparisonResults, ModelAssignment, ModelSlot};
use crate::preference::{Preference, SubmissionState, SubmitOutcome};
use crate::request::GenerationRequest;
use crate::session::{GenerationSession, SessionSnapshot, SessionState};
use crate::stream::StreamEvent;
use crate::transport::{ArenaTransport, HttpTransport};

struct Shared {
    session: GenerationSession,
    experiment_id: Option<String>,
    submission: SubmissionState,
    reset_timer: Option<CancellationToken>,
}

struct ControllerInner {
    shared: Mutex<Shared>,
    snapshots: watch::Sender<SessionSnapshot>,
    submissions: watch::Sender<SubmissionState>,
}

impl ControllerInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, shared: &Shared) {
        self.snapshots.send_replace(shared.session.snapshot());
    }

    fn set_submission(&self, shared: &mut Shared, state: SubmissionState) {
        shared.submission = state;
        self.submissions.send_replace(state);
    }

    /// Runs `f` only if `session_id` is still the current, live session.
    fn with_live_session<R>(
        &self,
        session_id: uuid::Uuid,
        f: impl FnOnce(&mut GenerationSession) -> R,
    ) -> Option<R> {
        let mut shared = self.lock();
        if shared.session.id() != session_id || !shared.session.state().is_live() {
            return None;
        }
        let out = f(&mut shared.session);
        self.publish(&shared);
        Some(out)
    }

    /// Final state of `session_id`; superseded sessions were cancelled.
    fn state_of(&self, session_id: uuid::Uuid) -> SessionState {
        let shared = self.lock();
        if shared.session.id() == session_id {
            shared.session.state()
        } else {
            SessionState::Cancelled
        }
    }

    fn apply_events(&self, session_id: uuid::Uuid, events: Vec<StreamEvent>) -> Option<SessionState> {
        self.with_live_session(session_id, |session| {
            for event in events {
                session.apply(event);
            }
            session.state()
        })
    }

    fn finish_session(&self, session_id: uuid::Uuid, rest: Vec<StreamEvent>) -> SessionState {
        self.with_live_session(session_id, |session| {
            for event in rest {
                session.apply(event);
            }
            session.finish_stream();
        });
        self.state_of(session_id)
    }

    fn cancel_session(&self, session_id: uuid::Uuid) -> SessionState {
        if self
            .with_live_session(session_id, GenerationSession::cancel)
            .unwrap_or(false)
        {
            info!(session_id = %session_id, "round aborted");
        }
        self.state_of(session_id)
    }

    fn fail_session(&self, session_id: uuid::Uuid, err: &ArenaError) -> SessionState {
        if self
            .with_live_session(session_id, |session| session.fail(err.to_string()))
            .unwrap_or(false)
        {
            error!(session_id = %session_id, error = %err, status = ?err.status_code(), "generation failed");
        }
        self.state_of(session_id)
    }

    fn reset_after_submission(&self, session_id: uuid::Uuid) {
        let mut shared = self.lock();
        self.set_submission(&mut shared, SubmissionState::Idle);
        shared.reset_timer = None;
        if shared.session.id() == session_id {
            debug!(session_id = %session_id, "clearing submitted round");
            shared.session.cancel();
            shared.session = GenerationSession::new();
            self.publish(&shared);
        }
    }
}

/// Handle to a streaming round started by [`GenerationController::start_stream`].
pub struct StreamHandle {
    session_id: uuid::Uuid,
    token: CancellationToken,
    task: JoinHandle<SessionState>,
}

impl StreamHandle {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Aborts the transport; the session moves to `Cancelled`.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the pump to stop and returns the round's final state.
    pub async fn wait(self) -> SessionState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "stream task failed");
                SessionState::Error
            }
        }
    }
}

/// Cancels a single-shot round whose caller stopped polling it.
///
/// A no-op once the round has completed or failed.
struct RequestGuard<'a> {
    inner: &'a ControllerInner,
    session_id: uuid::Uuid,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.inner.cancel_session(self.session_id);
    }
}

/// Dual-model generation controller.
///
/// Holds at most one live session. Starting a round cancels the previous one
/// first; dropping the controller cancels whatever is still running.
pub struct GenerationController {
    transport: Arc<dyn ArenaTransport>,
    inner: Arc<ControllerInner>,
    submission_reset_delay: Duration,
}

impl GenerationController {
    pub fn new(transport: Arc<dyn ArenaTransport>, config: &ArenaClientConfig) -> Self {
        let session = GenerationSession::new();
        let (snapshots, _) = watch::channel(session.snapshot());
        let (submissions, _) = watch::channel(SubmissionState::Idle);
        Self {
            transport,
            inner: Arc::new(ControllerInner {
                shared: Mutex::new(Shared {
                    session,
                    experiment_id: None,
                    submission: SubmissionState::Idle,
                    reset_timer: None,
                }),
                snapshots,
                submissions,
            }),
            submission_reset_delay: config.submission_reset_delay,
        }
    }

    /// Creates a controller talking HTTP to `config.base_url`.
    pub fn from_config(config: ArenaClientConfig) -> Result<Self, ArenaError> {
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::new(Arc::new(transport), &config))
    }

    /// Receiver that sees a new snapshot after every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().session.snapshot()
    }

    pub fn submissions(&self) -> watch::Receiver<SubmissionState> {
        self.inner.submissions.subscribe()
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.inner.lock().submission
    }

    pub fn experiment_id(&self) -> Option<String> {
        self.inner.lock().experiment_id.clone()
    }

    /// Fetches the experiment catalogue.
    pub async fn list_experiments(&self) -> Result<Vec<ExperimentOption>, ArenaError> {
        let ids = self.transport.list_experiments().await?;
        Ok(experiment_options(ids))
    }

    /// Selects the experiment used by requests that do not name one.
    ///
    /// Refused while a round is in flight. An accepted change discards the
    /// current round's buffers and results.
    pub fn set_experiment(&self, experiment_id: Option<String>) -> Result<(), ArenaError> {
        let experiment_id = experiment_id.filter(|id| !id.trim().is_empty());
        let mut shared = self.inner.lock();
        if shared.experiment_id == experiment_id {
            return Ok(());
        }
        if shared.session.state().is_live() {
            return Err(ArenaError::Busy(
                "cannot change experiment while a round is in flight".into(),
            ));
        }
        shared.session.cancel();
        shared.session = GenerationSession::new();
        shared.experiment_id = experiment_id;
        info!(experiment = ?shared.experiment_id, "experiment selected");
        self.inner.publish(&shared);
        Ok(())
    }

    /// Single-shot comparison round (non-streaming fallback).
    pub async fn generate(&self, request: GenerationRequest) -> Result<ComparisonResults, ArenaError> {
        let request = self.prepare(request)?;
        let (session_id, token) = self.start_round(&request, false)?;
        let _guard = RequestGuard {
            inner: &self.inner,
            session_id,
        };
        info!(session_id = %session_id, mode = %request.mode(), experiment = ?request.experiment_id, "requesting comparison");

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.inner.cancel_session(session_id);
                return Err(ArenaError::Cancelled);
            }
            response = self.transport.generate(&request) => response,
        };

        match response {
            Ok(response) => {
                let assignment = ModelAssignment::new(response.model_a_is_base);
                self.inner
                    .with_live_session(session_id, |session| {
                        session.complete_with(assignment, &response.model_a, &response.model_b);
                        session.results().cloned()
                    })
                    .flatten()
                    .ok_or(ArenaError::Cancelled)
            }
            Err(err) => {
                self.inner.fail_session(session_id, &err);
                Err(err)
            }
        }
    }

    /// Starts a streaming comparison round on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_stream(&self, request: GenerationRequest) -> Result<StreamHandle, ArenaError> {
        let request = self.prepare(request)?;
        let (session_id, token) = self.start_round(&request, true)?;
        info!(session_id = %session_id, mode = %request.mode(), experiment = ?request.experiment_id, "streaming comparison");

        let task = tokio::spawn(pump_stream(
            self.inner.clone(),
            self.transport.clone(),
            session_id,
            token.clone(),
            request,
        ));
        Ok(StreamHandle {
            session_id,
            token,
            task,
        })
    }

    /// Cancels the in-flight round. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        let mut shared = self.inner.lock();
        let cancelled = shared.session.cancel();
        if cancelled {
            info!(session_id = %shared.session.id(), "round cancelled by user");
            self.inner.publish(&shared);
        }
        cancelled
    }

    /// Submits the user's choice for the current round.
    ///
    /// Returns `Refused` without any network call when the selection, the
    /// model assignment or the completions are missing. On success the round
    /// is cleared after the configured delay; on failure everything is kept
    /// for a retry, which reuses the round's idempotency key.
    pub async fn submit_preference(
        &self,
        selection: Option<ModelSlot>,
    ) -> Result<SubmitOutcome, ArenaError> {
        let (preference, key, session_id) = {
            let mut shared = self.inner.lock();
            if shared.submission == SubmissionState::Submitting {
                return Err(ArenaError::Busy("a submission is already in flight".into()));
            }
            let session = &shared.session;
            let results = session.derive_results();
            let preference = match Preference::build(
                selection,
                session.assignment(),
                results.as_ref(),
                session.request(),
            ) {
                Ok(preference) => preference,
                Err(refusal) => {
                    warn!(session_id = %session.id(), reason = %refusal, "cannot submit preference");
                    return Ok(SubmitOutcome::Refused(refusal));
                }
            };
            let key = session.idempotency_key();
            let session_id = session.id();
            self.inner
                .set_submission(&mut shared, SubmissionState::Submitting);
            (preference, key, session_id)
        };

        let sent = self.transport.submit_preference(&preference, key).await;

        let mut shared = self.inner.lock();
        match sent {
            Ok(()) => {
                info!(session_id = %session_id, preferred = %preference.preferred_model, "preference recorded");
                if shared.session.id() == session_id {
                    self.inner.set_submission(&mut shared, SubmissionState::Success);
                    self.schedule_reset(&mut shared, session_id);
                } else {
                    debug!(session_id = %session_id, current = %shared.session.id(), "round replaced during submission");
                    self.inner.set_submission(&mut shared, SubmissionState::Idle);
                }
                Ok(SubmitOutcome::Submitted)
            }
            Err(err) => {
                error!(session_id = %session_id, error = %err, "preference submission failed");
                self.inner.set_submission(&mut shared, SubmissionState::Idle);
                Err(err)
            }
        }
    }

    fn prepare(&self, mut request: GenerationRequest) -> Result<GenerationRequest, ArenaError> {
        request.validate()?;
        if request.experiment_id.is_none() {
            request.experiment_id = self.inner.lock().experiment_id.clone();
        }
        Ok(request)
    }

    /// Cancels the previous round and installs a fresh session.
    fn start_round(
        &self,
        request: &GenerationRequest,
        streaming: bool,
    ) -> Result<(uuid::Uuid, CancellationToken), ArenaError> {
        let mut session = GenerationSession::new();
        if streaming {
            session.begin_streaming(request.clone())?;
        } else {
            session.begin_request(request.clone())?;
        }
        let session_id = session.id();
        let token = session.cancellation_token();

        let mut shared = self.inner.lock();
        if shared.session.cancel() {
            info!(session_id = %shared.session.id(), next = %session_id, "superseding in-flight round");
        }
        if let Some(timer) = shared.reset_timer.take() {
            timer.cancel();
        }
        // An in-flight submission keeps its state until it returns.
        if shared.submission == SubmissionState::Success {
            self.inner.set_submission(&mut shared, SubmissionState::Idle);
        }
        shared.session = session;
        self.inner.publish(&shared);
        Ok((session_id, token))
    }

    fn schedule_reset(&self, shared: &mut Shared, session_id: uuid::Uuid) {
        if let Some(previous) = shared.reset_timer.take() {
            previous.cancel();
        }
        let timer = CancellationToken::new();
        shared.reset_timer = Some(timer.clone());
        let inner = self.inner.clone();
        let delay = self.submission_reset_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.reset_after_submission(session_id),
            }
        });
    }
}

impl Drop for GenerationController {
    fn drop(&mut self) {
        let mut shared = self.inner.lock();
        if shared.session.cancel() {
            debug!(session_id = %shared.session.id(), "controller dropped with round in flight");
            self.inner.publish(&shared);
        }
        if let Some(timer) = shared.reset_timer.take() {
            timer.cancel();
        }
    }
}

/// Reads the generation stream until it completes, fails or is cancelled.
async fn pump_stream(
    inner: Arc<ControllerInner>,
    transport: Arc<dyn ArenaTransport>,
    session_id: uuid::Uuid,
    token: CancellationToken,
    request: GenerationRequest,
) -> SessionState {
    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return inner.cancel_session(session_id),
        opened = transport.generate_stream(&request) => opened,
    };
    let mut body = match opened {
        Ok(body) => body,
        Err(err) => return inner.fail_session(session_id, &err),
    };

    let mut demux = StreamDemultiplexer::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return inner.cancel_session(session_id),
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                let events = demux.push_chunk(&chunk);
                debug!(session_id = %session_id, bytes = chunk.len(), events = events.len(), "stream chunk");
                if events.is_empty() {
                    continue;
                }
                match inner.apply_events(session_id, events) {
                    Some(SessionState::Streaming { .. }) => {}
                    Some(state) => {
                        info!(session_id = %session_id, state = ?state, "stream finished");
                        return state;
                    }
                    None => return inner.state_of(session_id),
                }
            }
            Some(Err(err)) => return inner.fail_session(session_id, &err),
            None => {
                let state = inner.finish_session(session_id, demux.finish());
                info!(session_id = %session_id, state = ?state, "stream closed by server");
                return state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelIdentity;
    use crate::preference::PreferenceRefusal;
    use crate::transport::{ByteStream, GenerateResponse};
    use futures::channel::mpsc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeTransport {
        generate_result: Mutex<Option<Result<GenerateResponse, ArenaError>>>,
        streams: Mutex<VecDeque<Result<ByteStream, ArenaError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
        submit_failures: AtomicUsize,
        submitted: Mutex<Vec<(Preference, uuid::Uuid)>>,
        submit_calls: AtomicUsize,
        hold_submits: AtomicBool,
        release_submit: Notify,
    }

    impl FakeTransport {
        fn push_stream(&self, stream: Result<ByteStream, ArenaError>) {
            self.streams.lock().expect("streams").push_back(stream);
        }

        fn push_chunks(&self, chunks: Vec<Result<bytes::Bytes, ArenaError>>) {
            self.push_stream(Ok(Box::pin(futures::stream::iter(chunks))));
        }

        fn push_pending(&self) {
            self.push_stream(Ok(Box::pin(futures::stream::pending())));
        }

        fn push_channel(&self) -> mpsc::UnboundedSender<Result<bytes::Bytes, ArenaError>> {
            let (tx, rx) = mpsc::unbounded();
            self.push_stream(Ok(Box::pin(rx)));
            tx
        }
    }

    #[async_trait::async_trait]
    impl ArenaTransport for FakeTransport {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerateResponse, ArenaError> {
            self.requests.lock().expect("requests").push(request.clone());
            let result = self.generate_result.lock().expect("generate").take();
            match result {
                Some(result) => result,
                None => futures::future::pending().await,
            }
        }

        async fn generate_stream(
            &self,
            request: &GenerationRequest,
        ) -> Result<ByteStream, ArenaError> {
            self.requests.lock().expect("requests").push(request.clone());
            let next = self.streams.lock().expect("streams").pop_front();
            next.unwrap_or_else(|| Ok(Box::pin(futures::stream::pending())))
        }

        async fn submit_preference(
            &self,
            preference: &Preference,
            idempotency_key: uuid::Uuid,
        ) -> Result<(), ArenaError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if self.hold_submits.load(Ordering::SeqCst) {
                self.release_submit.notified().await;
            }
            let failures = self.submit_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.submit_failures.store(failures - 1, Ordering::SeqCst);
                return Err(ArenaError::transport("connection refused", None));
            }
            self.submitted
                .lock()
                .expect("submitted")
                .push((preference.clone(), idempotency_key));
            Ok(())
        }

        async fn list_experiments(&self) -> Result<Vec<String>, ArenaError> {
            Ok(vec!["FIM_base_vs_tuned".into(), "CHAT_v1".into()])
        }
    }

    fn controller_with(fake: Arc<FakeTransport>) -> GenerationController {
        GenerationController::new(fake, &ArenaClientConfig::default())
    }

    fn frame(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    fn chunk(text: &str) -> Result<bytes::Bytes, ArenaError> {
        Ok(bytes::Bytes::from(text.to_string()))
    }

    fn happy_path_body() -> String {
        [
            r#"{"type":"header","modelAIsBase":true}"#,
            r#"{"type":"model_start","model":"A"}"#,
            r#"{"type":"token","model":"A","text":"\n  pass"}"#,
            r#"{"type":"token","model":"B","text":"\n  return 1"}"#,
            r#"{"type":"model_end","model":"A"}"#,
            r#"{"type":"model_end","model":"B"}"#,
            r#"{"type":"complete"}"#,
        ]
        .iter()
        .map(|json| frame(json))
        .collect()
    }

    fn odd_chunks(body: &str, size: usize) -> Vec<Result<bytes::Bytes, ArenaError>> {
        body.as_bytes()
            .chunks(size)
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn completed_round(fake: &Arc<FakeTransport>, controller: &GenerationController) {
        fake.push_chunks(odd_chunks(&happy_path_body(), 7));
        let handle = controller
            .start_stream(GenerationRequest::fim("def f():", ""))
            .expect("start");
        assert_eq!(handle.wait().await, SessionState::Complete);
    }

    #[tokio::test]
    async fn happy_path_fim_stream_produces_results() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake.clone());
        completed_round(&fake, &controller).await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Complete);
        assert_eq!(
            snapshot.results,
            Some(ComparisonResults {
                base_response: "\n  pass".into(),
                finetuned_response: "\n  return 1".into(),
            })
        );
    }

    #[tokio::test]
    async fn cancel_mid_stream_freezes_buffers() {
        let fake = Arc::new(FakeTransport::default());
        let tx = fake.push_channel();
        let controller = controller_with(fake.clone());
        let handle = controller
            .start_stream(GenerationRequest::fim("def f():", ""))
            .expect("start");

        let first = frame(r#"{"type":"header","modelAIsBase":true}"#)
            + &frame(r#"{"type":"token","model":"A","text":"partial"}"#);
        tx.unbounded_send(chunk(&first)).expect("send");
        let mut updates = controller.subscribe();
        updates
            .wait_for(|s| s.model_a == "partial")
            .await
            .expect("partial token");

        assert!(controller.cancel());
        let _ = tx.unbounded_send(chunk(&frame(r#"{"type":"token","model":"A","text":"more"}"#)));

        assert_eq!(handle.wait().await, SessionState::Cancelled);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Cancelled);
        assert_eq!(snapshot.model_a, "partial");
        assert!(!controller.cancel());
    }

    #[tokio::test]
    async fn handle_abort_cancels_the_session() {
        let fake = Arc::new(FakeTransport::default());
        fake.push_pending();
        let controller = controller_with(fake.clone());
        let handle = controller
            .start_stream(GenerationRequest::chat("hello"))
            .expect("start");
        handle.abort();
        assert_eq!(handle.wait().await, SessionState::Cancelled);
        assert_eq!(controller.snapshot().state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn stale_session_events_are_dropped() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake);
        let applied = controller.inner.apply_events(
            uuid::Uuid::new_v4(),
            vec![StreamEvent::Token {
                model: ModelSlot::A,
                text: "ghost".into(),
                is_code_block: false,
            }],
        );
        assert_eq!(applied, None);
        assert_eq!(controller.snapshot().model_a, "");
    }

    #[tokio::test]
    async fn new_round_supersedes_previous_one() {
        let fake = Arc::new(FakeTransport::default());
        fake.push_chunks(odd_chunks(&happy_path_body(), 5));
        let controller = controller_with(fake.clone());

        let first = controller
            .start_stream(GenerationRequest::chat("one"))
            .expect("first");
        let second = controller
            .start_stream(GenerationRequest::fim("def f():", ""))
            .expect("second");
        let second_id = second.session_id();
        assert_ne!(first.session_id(), second_id);

        assert_eq!(first.wait().await, SessionState::Cancelled);
        assert_eq!(second.wait().await, SessionState::Complete);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.session_id, second_id);
        assert_eq!(snapshot.model_a, "\n  pass");

        // The first round was cancelled before its pump opened a stream.
        let requests = fake.requests.lock().expect("requests");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].code_prefix(), "def f():");
    }

    #[tokio::test]
    async fn transport_error_mid_stream_keeps_partial_output() {
        let fake = Arc::new(FakeTransport::default());
        fake.push_chunks(vec![
            chunk(&(frame(r#"{"type":"header","modelAIsBase":false}"#)
                + &frame(r#"{"type":"token","model":"B","text":"half"}"#))),
            Err(ArenaError::transport("connection reset", None)),
        ]);
        let controller = controller_with(fake);
        let handle = controller
            .start_stream(GenerationRequest::chat("hello"))
            .expect("start");
        assert_eq!(handle.wait().await, SessionState::Error);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.model_b, "half");
        assert!(
            snapshot
                .last_error
                .as_deref()
                .is_some_and(|msg| msg.contains("connection reset"))
        );
        assert_eq!(snapshot.results, None);
    }

    #[tokio::test]
    async fn rejected_stream_request_is_an_error() {
        let fake = Arc::new(FakeTransport::default());
        fake.push_stream(Err(ArenaError::transport("forbidden", Some(403))));
        let controller = controller_with(fake);
        let handle = controller
            .start_stream(GenerationRequest::chat("hello"))
            .expect("start");
        assert_eq!(handle.wait().await, SessionState::Error);
    }

    #[tokio::test]
    async fn server_close_without_complete_finalizes() {
        let fake = Arc::new(FakeTransport::default());
        let body = frame(r#"{"type":"header","modelAIsBase":true}"#)
            + r#"data: {"type":"token","model":"A","text":"x"}"#;
        fake.push_chunks(vec![chunk(&body)]);
        let controller = controller_with(fake);
        let handle = controller
            .start_stream(GenerationRequest::chat("hello"))
            .expect("start");
        assert_eq!(handle.wait().await, SessionState::Complete);
        assert_eq!(
            controller.snapshot().results.map(|r| r.base_response),
            Some("x".to_string())
        );
    }

    #[tokio::test]
    async fn non_streaming_round_maps_response() {
        let fake = Arc::new(FakeTransport::default());
        *fake.generate_result.lock().expect("generate") = Some(Ok(GenerateResponse {
            model_a_is_base: false,
            model_a: "from-a".into(),
            model_b: "from-b".into(),
        }));
        let controller = controller_with(fake);
        let results = controller
            .generate(GenerationRequest::chat("hello"))
            .await
            .expect("generate");
        assert_eq!(results.base_response, "from-b");
        assert_eq!(results.finetuned_response, "from-a");
        assert_eq!(controller.snapshot().state, SessionState::Complete);
    }

    #[tokio::test]
    async fn non_streaming_failure_keeps_request_for_retry() {
        let fake = Arc::new(FakeTransport::default());
        *fake.generate_result.lock().expect("generate") =
            Some(Err(ArenaError::transport("bad gateway", Some(502))));
        let controller = controller_with(fake);
        let err = controller
            .generate(GenerationRequest::chat("hello"))
            .await
            .expect_err("should fail");
        assert_eq!(err.status_code(), Some(502));
        assert_eq!(controller.snapshot().state, SessionState::Error);
        let shared = controller.inner.lock();
        assert_eq!(
            shared.session.request().map(|r| r.code_prefix()),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn non_streaming_request_can_be_cancelled() {
        let fake = Arc::new(FakeTransport::default());
        let controller = Arc::new(controller_with(fake));
        let worker = controller.clone();
        let pending =
            tokio::spawn(async move { worker.generate(GenerationRequest::chat("slow")).await });

        controller
            .subscribe()
            .wait_for(|s| s.state == SessionState::Requesting)
            .await
            .expect("requesting");
        assert!(controller.cancel());
        let result = pending.await.expect("join");
        assert!(matches!(result, Err(ArenaError::Cancelled)));
        assert_eq!(controller.snapshot().state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_transport() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake.clone());
        let err = controller
            .start_stream(GenerationRequest::fim("   ", "suffix"))
            .err()
            .expect("validation error");
        assert!(matches!(err, ArenaError::Validation(_)));
        assert!(fake.requests.lock().expect("requests").is_empty());
        assert_eq!(controller.snapshot().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn preference_is_refused_without_selection_or_assignment() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake.clone());

        let outcome = controller
            .submit_preference(Some(ModelSlot::A))
            .await
            .expect("no network error");
        assert_eq!(
            outcome,
            SubmitOutcome::Refused(PreferenceRefusal::AssignmentUnknown)
        );

        completed_round(&fake, &controller).await;
        let outcome = controller.submit_preference(None).await.expect("refused");
        assert_eq!(outcome, SubmitOutcome::Refused(PreferenceRefusal::NoSelection));
        assert_eq!(fake.submit_calls.load(Ordering::SeqCst), 0);
        assert_eq!(controller.submission_state(), SubmissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_submission_resets_round_after_delay() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake.clone());
        controller
            .set_experiment(Some("FIM_base_vs_tuned".into()))
            .expect("experiment");
        completed_round(&fake, &controller).await;

        let outcome = controller
            .submit_preference(Some(ModelSlot::A))
            .await
            .expect("submit");
        assert_eq!(outcome, SubmitOutcome::Submitted);
        assert_eq!(controller.submission_state(), SubmissionState::Success);
        {
            let submitted = fake.submitted.lock().expect("submitted");
            let (preference, _) = &submitted[0];
            assert_eq!(preference.preferred_model, ModelIdentity::Base);
            assert_eq!(preference.code_prefix, "def f():");
            assert_eq!(preference.base_completion, "\n  pass");
            assert_eq!(preference.experiment_id.as_deref(), Some("FIM_base_vs_tuned"));
        }

        controller
            .submissions()
            .wait_for(|s| *s == SubmissionState::Idle)
            .await
            .expect("reset");
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.assignment, None);
        assert_eq!(snapshot.model_a, "");
        assert_eq!(snapshot.results, None);
        assert_eq!(controller.experiment_id().as_deref(), Some("FIM_base_vs_tuned"));
    }

    #[tokio::test]
    async fn failed_submission_keeps_round_and_reuses_key() {
        let fake = Arc::new(FakeTransport::default());
        fake.submit_failures.store(1, Ordering::SeqCst);
        let controller = controller_with(fake.clone());
        completed_round(&fake, &controller).await;
        let before = controller.snapshot();

        let err = controller
            .submit_preference(Some(ModelSlot::B))
            .await
            .expect_err("first attempt fails");
        assert!(matches!(err, ArenaError::Transport { .. }));
        assert_eq!(controller.submission_state(), SubmissionState::Idle);
        assert_eq!(controller.snapshot(), before);

        let outcome = controller
            .submit_preference(Some(ModelSlot::B))
            .await
            .expect("retry");
        assert_eq!(outcome, SubmitOutcome::Submitted);
        assert_eq!(fake.submit_calls.load(Ordering::SeqCst), 2);
        let submitted = fake.submitted.lock().expect("submitted");
        let expected_key = controller.inner.lock().session.idempotency_key();
        assert_eq!(submitted[0].1, expected_key);
        assert_eq!(submitted[0].0.preferred_model, ModelIdentity::Finetuned);
    }

    #[tokio::test]
    async fn preference_can_use_live_buffers_mid_stream() {
        let fake = Arc::new(FakeTransport::default());
        let tx = fake.push_channel();
        let controller = controller_with(fake.clone());
        let handle = controller
            .start_stream(GenerationRequest::chat("explain"))
            .expect("start");
        let body = frame(r#"{"type":"header","modelAIsBase":false}"#)
            + &frame(r#"{"type":"token","model":"A","text":"tuned so far"}"#)
            + &frame(r#"{"type":"token","model":"B","text":"base so far"}"#);
        tx.unbounded_send(chunk(&body)).expect("send");
        controller
            .subscribe()
            .wait_for(|s| s.model_b == "base so far")
            .await
            .expect("tokens");

        let outcome = controller
            .submit_preference(Some(ModelSlot::A))
            .await
            .expect("submit");
        assert_eq!(outcome, SubmitOutcome::Submitted);
        {
            let submitted = fake.submitted.lock().expect("submitted");
            assert_eq!(submitted[0].0.preferred_model, ModelIdentity::Finetuned);
            assert_eq!(submitted[0].0.base_completion, "base so far");
            assert_eq!(submitted[0].0.finetuned_completion, "tuned so far");
        }
        controller.cancel();
        assert_eq!(handle.wait().await, SessionState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_submission_closes_live_stream() {
        let fake = Arc::new(FakeTransport::default());
        let tx = fake.push_channel();
        let controller = controller_with(fake.clone());
        let handle = controller
            .start_stream(GenerationRequest::chat("explain"))
            .expect("start");
        let submitted_id = handle.session_id();
        let body = frame(r#"{"type":"header","modelAIsBase":true}"#)
            + &frame(r#"{"type":"token","model":"A","text":"so far"}"#);
        tx.unbounded_send(chunk(&body)).expect("send");
        controller
            .subscribe()
            .wait_for(|s| s.model_a == "so far")
            .await
            .expect("token");

        let outcome = controller
            .submit_preference(Some(ModelSlot::A))
            .await
            .expect("submit");
        assert_eq!(outcome, SubmitOutcome::Submitted);
        controller
            .submissions()
            .wait_for(|s| *s == SubmissionState::Idle)
            .await
            .expect("reset");

        assert_eq!(handle.wait().await, SessionState::Cancelled);
        assert!(tx.is_closed());
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_ne!(snapshot.session_id, submitted_id);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_single_shot_round_is_cancelled() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake);

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            controller.generate(GenerationRequest::chat("slow")),
        )
        .await;
        assert!(outcome.is_err());

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, SessionState::Cancelled);
        controller
            .set_experiment(Some("CHAT_v1".into()))
            .expect("round no longer in flight");
    }

    #[tokio::test]
    async fn submission_for_replaced_round_leaves_new_round_alone() {
        let fake = Arc::new(FakeTransport::default());
        let controller = Arc::new(controller_with(fake.clone()));
        completed_round(&fake, &controller).await;
        fake.hold_submits.store(true, Ordering::SeqCst);

        let worker = controller.clone();
        let pending =
            tokio::spawn(async move { worker.submit_preference(Some(ModelSlot::A)).await });
        controller
            .submissions()
            .wait_for(|s| *s == SubmissionState::Submitting)
            .await
            .expect("submitting");

        let next = controller
            .start_stream(GenerationRequest::chat("next"))
            .expect("next round");
        assert_eq!(controller.submission_state(), SubmissionState::Submitting);
        assert!(matches!(
            controller.submit_preference(Some(ModelSlot::B)).await,
            Err(ArenaError::Busy(_))
        ));

        fake.release_submit.notify_one();
        let outcome = pending.await.expect("join").expect("submit");
        assert_eq!(outcome, SubmitOutcome::Submitted);
        assert_eq!(controller.submission_state(), SubmissionState::Idle);
        {
            let shared = controller.inner.lock();
            assert!(shared.reset_timer.is_none());
            assert_eq!(shared.session.id(), next.session_id());
            assert!(shared.session.state().is_live());
        }
        controller.cancel();
        assert_eq!(next.wait().await, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn experiment_changes_only_while_not_in_flight() {
        let fake = Arc::new(FakeTransport::default());
        fake.push_pending();
        let controller = controller_with(fake.clone());
        let handle = controller
            .start_stream(GenerationRequest::chat("hello"))
            .expect("start");
        assert!(matches!(
            controller.set_experiment(Some("CHAT_v1".into())),
            Err(ArenaError::Busy(_))
        ));
        controller.cancel();
        handle.wait().await;

        controller
            .set_experiment(Some("CHAT_v1".into()))
            .expect("idle change");
        assert_eq!(controller.snapshot().state, SessionState::Idle);

        *fake.generate_result.lock().expect("generate") = Some(Ok(GenerateResponse {
            model_a_is_base: true,
            model_a: "a".into(),
            model_b: "b".into(),
        }));
        controller
            .generate(GenerationRequest::chat("again"))
            .await
            .expect("generate");
        let requests = fake.requests.lock().expect("requests");
        assert_eq!(
            requests.last().and_then(|r| r.experiment_id.as_deref()),
            Some("CHAT_v1")
        );
    }

    #[tokio::test]
    async fn experiment_change_clears_stale_results() {
        let fake = Arc::new(FakeTransport::default());
        let controller = controller_with(fake.clone());
        completed_round(&fake, &controller).await;
        assert!(controller.snapshot().results.is_some());

        controller
            .set_experiment(Some("FIM_other".into()))
            .expect("change");
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.results, None);
        assert_eq!(snapshot.model_a, "");
    }

    #[tokio::test]
    async fn dropping_controller_cancels_live_stream() {
        let fake = Arc::new(FakeTransport::default());
        fake.push_pending();
        let controller = controller_with(fake);
        let handle = controller
            .start_stream(GenerationRequest::chat("hello"))
            .expect("start");
        drop(controller);
        assert_eq!(handle.wait().await, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn experiment_catalogue_is_mapped_to_options() {
        let controller = controller_with(Arc::new(FakeTransport::default()));
        let options = controller.list_experiments().await.expect("options");
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].mode, crate::model::GenerationMode::Fim);
        assert_eq!(options[1].value, "CHAT_v1");
    }
}
