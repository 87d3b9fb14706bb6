//! Command runner trait and types.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CommandConfig, RunConfig};
use crate::error::RunnerResult;

/// Result of one program execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code (-1 when the process was terminated by a signal)
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Text describing a failure: stderr, falling back to stdout.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// One line of program output.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

impl LogLine {
    pub fn stdout(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            message: message.into(),
        }
    }

    pub fn stderr(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: LogStream::Stderr,
            message: message.into(),
        }
    }
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
///
/// Called synchronously for each complete line, in the order lines were
/// produced on a given stream. Never called after `run` returns.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Executes external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Check whether a program can be launched.
    async fn is_available(&self, program: &str) -> bool;

    /// Run a program to completion.
    ///
    /// A non-zero exit is reported through [`ExecutionResult::exit_code`],
    /// not as an error. Errors are reserved for spawn failures and timeouts.
    async fn run(
        &self,
        command: &CommandConfig,
        run_config: &RunConfig,
        handler: Option<LogHandler>,
    ) -> RunnerResult<ExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stdout: &str, stderr: &str, exit_code: i64) -> ExecutionResult {
        let now = Utc::now();
        ExecutionResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_diagnostics_prefers_stderr() {
        assert_eq!(result("out", " err \n", 1).diagnostics(), "err");
        assert_eq!(result(" out\n", "", 1).diagnostics(), "out");
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(result("a", "b", 0).combined_output(), "a\nb");
        assert_eq!(result("", "b", 0).combined_output(), "b");
        assert!(result("", "", 0).success());
    }
}
