/// Top-level error type for the arena client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid round inputs.
    #[error("validation error: {0}")]
    Validation(String),
    /// Network failure or non-success HTTP status (including 401/403).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status_code: Option<u16>,
    },
    /// Response body did not match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The operation is not allowed while a round is in flight.
    #[error("busy: {0}")]
    Busy(String),
    /// The round was cancelled or superseded before it finished.
    #[error("cancelled")]
    Cancelled,
}

impl ArenaError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            status_code,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the HTTP status code when the failure carried one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Returns true for intentional aborts, which are not logged as failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
