//! Mock command runner for testing.
//!
//! Captures every invocation and replies with scripted responses, so
//! provisioners can be exercised without the real backend binaries.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{CommandConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult, LogHandler, LogLine};

/// Predefined response for one invocation.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Captured invocation for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub command: CommandConfig,
    pub streamed: bool,
}

impl CapturedCall {
    /// The invocation rendered as `program arg arg ...`.
    pub fn line(&self) -> String {
        std::iter::once(self.command.program.as_str())
            .chain(self.command.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Mock command runner.
///
/// Responses registered with [`MockRunner::respond_to`] are matched against
/// the start of the invocation line (`terraform output -json`). Anything
/// unmatched takes the next queued response, or an empty success.
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Arc<RwLock<Vec<(String, MockResponse)>>>,
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    unavailable: Arc<RwLock<HashSet<String>>>,
    simulate_failure: Arc<RwLock<Option<String>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` to invocations starting with `prefix`.
    pub fn respond_to(self, prefix: impl Into<String>, response: MockResponse) -> Self {
        self.rules.write().push((prefix.into(), response));
        self
    }

    /// Queue a response for the next unmatched invocation.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    /// Mark a program as not installed.
    pub fn set_unavailable(self, program: impl Into<String>) -> Self {
        self.unavailable.write().insert(program.into());
        self
    }

    /// Fail every invocation with an execution error.
    pub fn simulate_failure(self, message: impl Into<String>) -> Self {
        *self.simulate_failure.write() = Some(message.into());
        self
    }

    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Invocation lines in call order.
    pub fn call_lines(&self) -> Vec<String> {
        self.captured_calls.read().iter().map(CapturedCall::line).collect()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Check whether any invocation started with `prefix`.
    pub fn was_called(&self, prefix: &str) -> bool {
        self.captured_calls
            .read()
            .iter()
            .any(|c| c.line().starts_with(prefix))
    }

    fn next_response(&self, line: &str) -> MockResponse {
        if let Some((_, response)) = self
            .rules
            .read()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            return response.clone();
        }

        let responses = self.responses.read();
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn is_available(&self, program: &str) -> bool {
        !self.unavailable.read().contains(program)
    }

    async fn run(
        &self,
        command: &CommandConfig,
        run_config: &RunConfig,
        handler: Option<LogHandler>,
    ) -> RunnerResult<ExecutionResult> {
        let call = CapturedCall {
            command: command.clone(),
            streamed: run_config.stream_logs,
        };
        let line = call.line();
        self.captured_calls.write().push(call);

        if self.unavailable.read().contains(&command.program) {
            return Err(RunnerError::ProgramNotAvailable(command.program.clone()));
        }
        if let Some(message) = self.simulate_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(message));
        }

        let response = self.next_response(&line);

        if run_config.stream_logs {
            if let Some(handler) = &handler {
                for out in response.stdout.lines() {
                    handler(LogLine::stdout(out));
                }
                for err in response.stderr.lines() {
                    handler(LogLine::stderr(err));
                }
            }
        }

        let now = Utc::now();
        Ok(ExecutionResult {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at: now,
            finished_at: now + chrono::Duration::milliseconds(response.duration_ms as i64),
            duration_ms: response.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_take_precedence_over_queue() {
        let runner = MockRunner::new()
            .respond_to("terraform output", MockResponse::success("{}"))
            .add_response(MockResponse::failure(1, "boom"));

        let output = runner
            .run(
                &CommandConfig::new("terraform").args(["output", "-json"]),
                &RunConfig::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "{}");

        let init = runner
            .run(
                &CommandConfig::new("terraform").arg("init"),
                &RunConfig::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(init.exit_code, 1);

        assert_eq!(
            runner.call_lines(),
            vec!["terraform output -json", "terraform init"]
        );
    }

    #[tokio::test]
    async fn test_streams_scripted_lines() {
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = seen.clone();
        let handler: LogHandler = Arc::new(move |line: LogLine| sink.write().push(line.message));

        let runner = MockRunner::new().add_response(MockResponse::success("one\ntwo"));
        runner
            .run(
                &CommandConfig::new("pulumi").arg("up"),
                &RunConfig::default().stream(),
                Some(handler),
            )
            .await
            .unwrap();

        assert_eq!(*seen.read(), vec!["one", "two"]);
        assert!(runner.get_calls()[0].streamed);
    }

    #[tokio::test]
    async fn test_unavailable_program() {
        let runner = MockRunner::new().set_unavailable("pulumi");
        assert!(!runner.is_available("pulumi").await);
        assert!(runner.is_available("terraform").await);

        let err = runner
            .run(&CommandConfig::new("pulumi"), &RunConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ProgramNotAvailable(_)));
    }
}
