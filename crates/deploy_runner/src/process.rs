//! Subprocess runner built on `tokio::process`.
//!
//! Output is read line by line as the child produces it. A line is only
//! handed to the log handler once its terminator arrives (or the stream
//! closes), so partial lines are never surfaced early.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{CommandConfig, RunConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult, LogHandler, LogLine, LogStream};

/// Options for [`ProcessRunner`].
#[derive(Debug, Clone, Default)]
pub struct ProcessRunnerOptions {
    /// Log commands without executing them
    pub dry_run: bool,
}

impl ProcessRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Runs programs as child processes of the current process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    options: ProcessRunnerOptions,
}

impl ProcessRunner {
    pub fn new(options: ProcessRunnerOptions) -> Self {
        Self { options }
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn build_command(command: &CommandConfig) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Drain a stream, forwarding each complete line to the handler.
async fn read_lines<R>(
    reader: R,
    stream: LogStream,
    handler: Option<LogHandler>,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut output = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches(['\n', '\r']);
        output.push_str(line);
        output.push('\n');

        if let Some(handler) = &handler {
            handler(LogLine {
                timestamp: Utc::now(),
                stream,
                message: line.to_string(),
            });
        }
    }

    Ok(output)
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn is_available(&self, program: &str) -> bool {
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run(
        &self,
        command: &CommandConfig,
        run_config: &RunConfig,
        handler: Option<LogHandler>,
    ) -> RunnerResult<ExecutionResult> {
        let started_at = Utc::now();

        if self.options.dry_run {
            info!("[DRY-RUN] Would run: {}", command.display());
            return Ok(ExecutionResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                started_at,
                finished_at: started_at,
                duration_ms: 0,
            });
        }

        debug!("Executing: {} (cwd: {:?})", command.display(), command.working_dir);
        let start = Instant::now();

        let mut child = Self::build_command(command).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::ProgramNotAvailable(command.program.clone())
            } else {
                RunnerError::SpawnFailed {
                    program: command.program.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::ExecutionFailed("stderr was not captured".into()))?;

        let handler = if run_config.stream_logs { handler } else { None };
        let stdout_task = tokio::spawn(read_lines(stdout, LogStream::Stdout, handler.clone()));
        let stderr_task = tokio::spawn(read_lines(stderr, LogStream::Stderr, handler));

        let status = if run_config.timeout_seconds > 0 {
            let limit = Duration::from_secs(run_config.timeout_seconds);
            match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        "{} exceeded {}s, killing",
                        command.program, run_config.timeout_seconds
                    );
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill {}: {}", command.program, e);
                    }
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(RunnerError::Timeout {
                        program: command.program.clone(),
                        seconds: run_config.timeout_seconds,
                    });
                }
            }
        } else {
            child.wait().await?
        };

        // Both readers finish before returning so no line is delivered late.
        let stdout_output = stdout_task
            .await
            .map_err(|e| RunnerError::ExecutionFailed(format!("stdout reader failed: {}", e)))??;
        let stderr_output = stderr_task
            .await
            .map_err(|e| RunnerError::ExecutionFailed(format!("stderr reader failed: {}", e)))??;

        let exit_code = status.code().map(i64::from).unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "{} exited with {} after {}ms",
            command.program, exit_code, duration_ms
        );

        Ok(ExecutionResult {
            exit_code,
            stdout: stdout_output,
            stderr: stderr_output,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let runner = ProcessRunner::new(ProcessRunnerOptions::new().dry_run());
        let command = CommandConfig::new("definitely-not-a-real-program-xyz");

        let result = runner
            .run(&command, &RunConfig::default(), None)
            .await
            .unwrap();

        assert!(runner.is_dry_run());
        assert!(result.success());
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_not_available() {
        let runner = ProcessRunner::default();
        let command = CommandConfig::new("definitely-not-a-real-program-xyz");

        let err = runner
            .run(&command, &RunConfig::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::ProgramNotAvailable(_)));
        assert!(!runner.is_available("definitely-not-a-real-program-xyz").await);
    }
}
