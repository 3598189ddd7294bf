//! HTTP seam between the controller and the arena backend.

use std::pin::Pin;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, COOKIE};
use tracing::debug;

use crate::config::ArenaClientConfig;
use crate::errors::ArenaError;
use crate::preference::Preference;
use crate::request::GenerationRequest;

const GENERATE_PATH: &str = "/api/generate";
const GENERATE_STREAM_PATH: &str = "/api/generate-stream";
const SUBMIT_PREFERENCE_PATH: &str = "/api/submit-preference";
const EXPERIMENTS_PATH: &str = "/api/config/experiments";

/// Header carrying the per-round submission key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Raw body chunks of a streaming response, in arrival order.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, ArenaError>> + Send + 'static>>;

/// `POST /api/generate` response body.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerateResponse {
    #[serde(rename = "modelAIsBase")]
    pub model_a_is_base: bool,
    #[serde(rename = "modelA")]
    pub model_a: String,
    #[serde(rename = "modelB")]
    pub model_b: String,
}

/// Backend operations the controller depends on.
///
/// Dropping the stream returned by `generate_stream` must abort the
/// underlying connection.
#[async_trait::async_trait]
pub trait ArenaTransport: Send + Sync {
    /// Single-shot generation of both completions.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateResponse, ArenaError>;

    /// Opens the SSE generation stream.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ByteStream, ArenaError>;

    /// Records a preference. `idempotency_key` is stable across retries of one round.
    async fn submit_preference(
        &self,
        preference: &Preference,
        idempotency_key: uuid::Uuid,
    ) -> Result<(), ArenaError>;

    /// Lists experiment ids offered by the backend.
    async fn list_experiments(&self) -> Result<Vec<String>, ArenaError>;
}

/// reqwest implementation of [`ArenaTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    config: ArenaClientConfig,
}

impl HttpTransport {
    pub fn new(config: ArenaClientConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        // No client-wide timeout: it would also cut off long generation streams.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ArenaError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ArenaClientConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.config.url(path));
        match &self.config.session_cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    async fn send(
        &self,
        path: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ArenaError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ArenaError::transport(format!("{path} request failed: {e}"), None))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ArenaError::transport(
                format!("{path} failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ArenaTransport for HttpTransport {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerateResponse, ArenaError> {
        debug!(mode = %request.mode(), experiment = ?request.experiment_id, "posting generate");
        let builder = self
            .request(reqwest::Method::POST, GENERATE_PATH)
            .timeout(self.config.timeout)
            .form(&request.form_fields());
        let response = self.send(GENERATE_PATH, builder).await?;
        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ArenaError::protocol(format!("invalid generate response: {e}")))
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<ByteStream, ArenaError> {
        debug!(mode = %request.mode(), experiment = ?request.experiment_id, "opening generation stream");
        let builder = self
            .request(reqwest::Method::POST, GENERATE_STREAM_PATH)
            .header(ACCEPT, "text/event-stream")
            .form(&request.form_fields());
        let response = self.send(GENERATE_STREAM_PATH, builder).await?;
        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| ArenaError::transport(format!("stream read failed: {e}"), None))
        });
        Ok(Box::pin(stream))
    }

    async fn submit_preference(
        &self,
        preference: &Preference,
        idempotency_key: uuid::Uuid,
    ) -> Result<(), ArenaError> {
        let builder = self
            .request(reqwest::Method::POST, SUBMIT_PREFERENCE_PATH)
            .timeout(self.config.timeout)
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key.to_string())
            .json(preference);
        self.send(SUBMIT_PREFERENCE_PATH, builder).await?;
        Ok(())
    }

    async fn list_experiments(&self) -> Result<Vec<String>, ArenaError> {
        let builder = self
            .request(reqwest::Method::GET, EXPERIMENTS_PATH)
            .timeout(self.config.timeout);
        let response = self.send(EXPERIMENTS_PATH, builder).await?;
        let list = response
            .json::<crate::experiments::ExperimentList>()
            .await
            .map_err(|e| ArenaError::protocol(format!("invalid experiments response: {e}")))?;
        Ok(list.experiments)
    }
}
