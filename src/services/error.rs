// Errors surfaced by service plugins

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("authentication required (no password configured)")]
    AuthRequired,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("service not detected: {0}")]
    NotDetected(String),
}

/// Result type alias for plugin operations
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn malformed(url: impl Into<String>, reason: impl ToString) -> Self {
        ServiceError::Malformed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// True for an HTTP 401 from the target.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ServiceError::Status { status: 401, .. })
    }
}
