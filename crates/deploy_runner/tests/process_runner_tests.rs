//! Integration tests for the process runner against a real shell.

#![cfg(unix)]

use std::sync::Arc;

use deploy_runner::{
    CommandConfig, CommandRunner, LogHandler, LogLine, LogStream, ProcessRunner, RunConfig,
    RunnerError,
};
use parking_lot::Mutex;
use tempfile::TempDir;

fn sh(script: &str) -> CommandConfig {
    CommandConfig::new("sh").args(["-c", script])
}

fn collecting_handler() -> (LogHandler, Arc<Mutex<Vec<LogLine>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let handler: LogHandler = Arc::new(move |line: LogLine| sink.lock().push(line));
    (handler, lines)
}

#[tokio::test]
async fn test_captures_stdout_and_stderr() {
    let runner = ProcessRunner::default();
    let result = runner
        .run(&sh("echo hello; echo oops >&2"), &RunConfig::default(), None)
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "oops\n");
    assert_eq!(result.diagnostics(), "oops");
}

#[tokio::test]
async fn test_non_zero_exit_is_not_an_error() {
    let runner = ProcessRunner::default();
    let result = runner
        .run(&sh("echo failing; exit 3"), &RunConfig::default(), None)
        .await
        .unwrap();

    assert_eq!(result.exit_code, 3);
    assert!(!result.success());
    assert_eq!(result.diagnostics(), "failing");
}

#[tokio::test]
async fn test_streams_lines_in_order() {
    let runner = ProcessRunner::default();
    let (handler, lines) = collecting_handler();

    runner
        .run(
            &sh("echo one; sleep 0.05; echo two; printf three"),
            &RunConfig::default().stream(),
            Some(handler),
        )
        .await
        .unwrap();

    let lines = lines.lock();
    let stdout: Vec<&str> = lines
        .iter()
        .filter(|l| l.stream == LogStream::Stdout)
        .map(|l| l.message.as_str())
        .collect();
    assert_eq!(stdout, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_handler_ignored_without_streaming() {
    let runner = ProcessRunner::default();
    let (handler, lines) = collecting_handler();

    let result = runner
        .run(&sh("echo quiet"), &RunConfig::default(), Some(handler))
        .await
        .unwrap();

    assert_eq!(result.stdout, "quiet\n");
    assert!(lines.lock().is_empty());
}

#[tokio::test]
async fn test_working_dir_and_env() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present").unwrap();

    let runner = ProcessRunner::default();
    let command = sh("cat marker.txt; echo \" $DEPLOYBOT_TEST_VALUE\"")
        .working_dir(dir.path())
        .env("DEPLOYBOT_TEST_VALUE", "42");

    let result = runner
        .run(&command, &RunConfig::default(), None)
        .await
        .unwrap();

    assert_eq!(result.stdout.trim(), "present 42");
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let runner = ProcessRunner::default();
    let err = runner
        .run(&sh("sleep 5"), &RunConfig::default().timeout(1), None)
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Timeout { seconds: 1, .. }));
}
