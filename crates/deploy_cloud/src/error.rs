//! Error types for cloud operations.

use std::time::Duration;

use deploy_runner::RunnerError;
use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors raised by cloud calls and the operation poller.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Operation {operation} did not finish within {waited:?}")]
    Timeout { operation: String, waited: Duration },

    #[error("Credentials unavailable: {0}")]
    Credential(String),

    #[error("Cloud API error: {0}")]
    Api(String),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}
