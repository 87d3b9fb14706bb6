//! Error types and classification for the engine.

use deploy_cloud::CloudError;
use deploy_iac::IacError;
use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while resolving and running a deployment.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error(transparent)]
    Iac(#[from] IacError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stack file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Credential,
    Validation,
    Operation,
    OperationFailed,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Process exit code for this class of failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::Configuration | ErrorKind::NotFound => 2,
            ErrorKind::Validation => 3,
            ErrorKind::Credential => 4,
            ErrorKind::Operation | ErrorKind::OperationFailed => 5,
        }
    }
}

fn cloud_kind(error: &CloudError) -> ErrorKind {
    match error {
        CloudError::NotFound(_) => ErrorKind::NotFound,
        CloudError::OperationFailed { .. } => ErrorKind::OperationFailed,
        CloudError::Credential(_) => ErrorKind::Credential,
        CloudError::Timeout { .. } | CloudError::Api(_) | CloudError::Runner(_) => ErrorKind::Operation,
        CloudError::Io(_) | CloudError::Json(_) => ErrorKind::Internal,
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::StackNotFound(_) | CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Configuration(_) | CoreError::Yaml(_) => ErrorKind::Configuration,
            CoreError::Credential(_) => ErrorKind::Credential,
            CoreError::Cloud(e) => cloud_kind(e),
            CoreError::Io(_) => ErrorKind::Internal,
            CoreError::Iac(e) => match e {
                IacError::Configuration(_) | IacError::RecipeNotFound(_) => ErrorKind::Configuration,
                IacError::Validation(_) => ErrorKind::Validation,
                IacError::Operation { .. }
                | IacError::Branch { .. }
                | IacError::Teardown(_)
                | IacError::Runner(_) => ErrorKind::Operation,
                IacError::Cloud(e) => cloud_kind(e),
                IacError::Io(_) | IacError::Json(_) | IacError::Yaml(_) => ErrorKind::Internal,
            },
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}
