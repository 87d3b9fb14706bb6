//! # deploy_runner
//!
//! Subprocess execution wrapper for DeployBot.
//!
//! Infrastructure backends (Terraform, Pulumi, the `gcloud` CLI) are driven
//! as external programs. This crate runs them, captures their output and
//! optionally streams it line by line to a handler while they execute.
//!
//! # Features
//!
//! - **Process Runner**: `tokio::process` based execution with timeouts
//! - **Line Streaming**: complete lines are handed to a [`LogHandler`] as they arrive
//! - **Dry-Run Mode**: log commands without executing them
//! - **Mock Runner**: scripted responses for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use deploy_runner::{CommandConfig, CommandRunner, ProcessRunner, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::default();
//!     let command = CommandConfig::new("terraform")
//!         .arg("version")
//!         .working_dir("./stacks/web/terraform/gcp");
//!
//!     let result = runner.run(&command, &RunConfig::default(), None).await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod process;
pub mod runner;

pub use config::{CommandConfig, RunConfig};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use process::{ProcessRunner, ProcessRunnerOptions};
pub use runner::{CommandRunner, ExecutionResult, LogHandler, LogLine, LogStream};
