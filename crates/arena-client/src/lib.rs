//! Client for the dual-model preference arena.
//!
//! A round sends one prompt (chat) or one prefix/suffix pair (FIM) to the
//! backend, which runs a base and a finetuned model under the anonymous
//! labels "A" and "B". Their completions stream back interleaved over one
//! SSE body; the [`GenerationController`] demultiplexes them into per-slot
//! buffers, resolves slots to identities once the round completes and
//! records which completion the user preferred.
//!
//! ```no_run
//! use arena_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ArenaError> {
//! let controller = GenerationController::from_config(ArenaClientConfig::from_env()?)?;
//! let handle = controller.start_stream(GenerationRequest::fim("def add(a, b):", ""))?;
//! if handle.wait().await == SessionState::Complete {
//!     controller.submit_preference(Some(ModelSlot::A)).await?;
//! }
//! # Ok(())
//! # }
//! ```

/// Per-slot append-only text buffers.
pub mod accumulator;
/// Client configuration and `ARENA_*` environment loading.
pub mod config;
/// Round lifecycle owner: streaming pump, cancellation, submission.
pub mod controller;
/// Incremental SSE frame decoder.
pub mod demux;
/// Public error types.
pub mod errors;
/// Experiment catalogue helpers.
pub mod experiments;
/// Slots, identities and the per-round assignment between them.
pub mod model;
/// Process-wide tracing setup.
pub mod observability;
/// Preference payload and submission state.
pub mod preference;
/// Common imports for typical usage.
pub mod prelude;
/// Round inputs and their form encoding.
pub mod request;
/// Per-round state machine.
pub mod session;
/// Typed stream events.
pub mod stream;
/// Backend transport trait and its reqwest implementation.
pub mod transport;

pub use accumulator::{ModelBuffers, SlotText};
pub use config::ArenaClientConfig;
pub use controller::{GenerationController, StreamHandle};
pub use demux::StreamDemultiplexer;
pub use errors::ArenaError;
pub use experiments::{ExperimentOption, experiment_options};
pub use model::{ComparisonResults, GenerationMode, ModelAssignment, ModelIdentity, ModelSlot};
pub use observability::{ObservabilitySettings, init_observability};
pub use preference::{Preference, PreferenceRefusal, SubmissionState, SubmitOutcome};
pub use request::{GenerationInput, GenerationRequest};
pub use session::{GenerationSession, SessionSnapshot, SessionState, SlotProgress, StreamProgress};
pub use stream::StreamEvent;
pub use transport::{ArenaTransport, ByteStream, GenerateResponse, HttpTransport};
