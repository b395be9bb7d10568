//! Upstream error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream unauthorized")]
    Unauthorized,

    #[error("Upstream rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Upstream returned error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("Upstream timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid source configuration: {0}")]
    Configuration(String),
}

impl UpstreamError {
    /// Whether a later attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            UpstreamError::RateLimited { .. } | UpstreamError::Timeout(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            UpstreamError::Unauthorized
            | UpstreamError::InvalidResponse(_)
            | UpstreamError::Configuration(_) => false,
        }
    }
}
