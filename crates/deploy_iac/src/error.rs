//! Error types for provisioning.

use deploy_cloud::CloudError;
use deploy_runner::RunnerError;
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type IacResult<T> = Result<T, IacError>;

/// One failed branch of a parallel teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFailure {
    pub branch: String,
    pub message: String,
}

/// Every branch that failed during a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchFailures(pub Vec<BranchFailure>);

impl BranchFailures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn branches(&self) -> Vec<&str> {
        self.0.iter().map(|f| f.branch.as_str()).collect()
    }
}

impl std::fmt::Display for BranchFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} branch(es) failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "\n  - {}: {}", failure.branch, failure.message)?;
        }
        Ok(())
    }
}

/// Errors that can occur while provisioning.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A backend process or API call failed; carries its diagnostic text.
    #[error("{operation} failed: {diagnostics}")]
    Operation { operation: String, diagnostics: String },

    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("Branch {branch} aborted: {message}")]
    Branch { branch: String, message: String },

    #[error("Teardown incomplete: {0}")]
    Teardown(BranchFailures),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl IacError {
    pub fn operation(operation: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        IacError::Operation {
            operation: operation.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Fold an arbitrary failure of `operation` into the uniform
    /// [`IacError::Operation`] channel.
    ///
    /// Errors that already carry a more specific meaning (configuration,
    /// terminal remote failures, teardown aggregates) are kept as they are.
    pub fn into_operation(self, operation: &str) -> Self {
        match self {
            IacError::Configuration(_)
            | IacError::Validation(_)
            | IacError::Operation { .. }
            | IacError::RecipeNotFound(_)
            | IacError::Teardown(_)
            | IacError::Cloud(CloudError::OperationFailed { .. })
            | IacError::Cloud(CloudError::Credential(_)) => self,
            other => IacError::operation(operation, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_failures_display_lists_every_branch() {
        let failures = BranchFailures(vec![
            BranchFailure {
                branch: "service".into(),
                message: "permission denied".into(),
            },
            BranchFailure {
                branch: "package".into(),
                message: "timeout".into(),
            },
        ]);
        let text = IacError::Teardown(failures).to_string();
        assert!(text.contains("2 branch(es) failed"));
        assert!(text.contains("service: permission denied"));
        assert!(text.contains("package: timeout"));
    }

    #[test]
    fn test_into_operation_keeps_specific_errors() {
        let failed = IacError::Cloud(CloudError::OperationFailed {
            operation: "op".into(),
            message: "boom".into(),
        })
        .into_operation("apply");
        assert!(matches!(failed, IacError::Cloud(CloudError::OperationFailed { .. })));

        let wrapped = IacError::Cloud(CloudError::Api("quota".into())).into_operation("apply");
        assert!(matches!(wrapped, IacError::Operation { ref operation, .. } if operation == "apply"));
    }
}
