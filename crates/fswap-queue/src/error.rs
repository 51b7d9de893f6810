//! Queue API error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid API configuration: {0}")]
    Config(String),

    #[error("Task API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Task API rejected request: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Transient failures are worth another poll cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::Network(_) | QueueError::InvalidResponse(_) | QueueError::Json(_) => true,
            QueueError::Status { status, .. } => *status >= 500 || *status == 429,
            QueueError::Config(_) | QueueError::Rejected(_) => false,
        }
    }
}
