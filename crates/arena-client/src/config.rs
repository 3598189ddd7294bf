use std::time::Duration;

use crate::errors::ArenaError;

const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Configuration for the arena HTTP client and controller.
#[derive(Clone, Debug)]
pub struct ArenaClientConfig {
    /// Base URL of the arena backend.
    pub base_url: String,
    /// Raw `Cookie` header value carrying the login session, if any.
    pub session_cookie: Option<String>,
    /// Timeout for non-streaming calls. The generation stream has none.
    pub timeout: Duration,
    /// Delay before a successful submission resets the round.
    pub submission_reset_delay: Duration,
}

impl Default for ArenaClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            session_cookie: None,
            timeout: Duration::from_secs(120),
            submission_reset_delay: Duration::from_millis(2000),
        }
    }
}

impl ArenaClientConfig {
    /// Creates a config pointing at `base_url` with default timings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `ARENA_*` environment variables.
    ///
    /// - `ARENA_API_URL` (default `http://localhost:5000`)
    /// - `ARENA_SESSION_COOKIE`
    /// - `ARENA_HTTP_TIMEOUT_SECS`
    /// - `ARENA_SUBMISSION_RESET_MS`
    pub fn from_env() -> Result<Self, ArenaError> {
        let mut config = Self::default();
        if let Some(url) = env_non_empty("ARENA_API_URL") {
            config.base_url = url;
        }
        config.session_cookie = env_non_empty("ARENA_SESSION_COOKIE");
        if let Some(raw) = env_non_empty("ARENA_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ArenaError::Config(format!("invalid ARENA_HTTP_TIMEOUT_SECS: {raw}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = env_non_empty("ARENA_SUBMISSION_RESET_MS") {
            let ms: u64 = raw.parse().map_err(|_| {
                ArenaError::Config(format!("invalid ARENA_SUBMISSION_RESET_MS: {raw}"))
            })?;
            config.submission_reset_delay = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn submission_reset_delay(mut self, delay: Duration) -> Self {
        self.submission_reset_delay = delay;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ArenaError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ArenaError::Config(format!(
                "base_url must be an http(s) URL, got {url:?}"
            )));
        }
        Ok(())
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), path)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
