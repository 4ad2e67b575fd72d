//! API client error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API key contains invalid characters")]
    InvalidApiKey,

    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        /// Seconds to wait, from the `retry-after` header when present.
        retry_after: Option<u64>,
        message: String,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("provider returned an empty response")]
    EmptyResponse,
}

impl ApiError {
    /// Transient transport failures: retried by `chat` before any output has
    /// been emitted, never by `compress`.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Stream(_) => true,
            ApiError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
