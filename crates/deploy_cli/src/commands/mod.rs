//! CLI command definitions.
//!
//! Each subcommand drives one lifecycle operation of a stack through the
//! resolver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use deploy_cloud::{PollConfig, Poller, Session};
use deploy_core::{DeployParameters, ProvisionerFactory, Resolver, StackCatalog};
use deploy_iac::{Outputs, ProgressSink};
use deploy_runner::ProcessRunner;

pub mod deploy;
pub mod destroy;
pub mod plan;
pub mod stacks;
pub mod validate;

/// DeployBot - deploy application stacks to the cloud
#[derive(Parser)]
#[command(name = "deploybot")]
#[command(version, about = "DeployBot - deploy application stacks to the cloud")]
#[command(long_about = r#"
DeployBot deploys application stacks onto cloud targets using Terraform,
Pulumi or a native recipe that calls the cloud APIs directly.

COMMANDS:
  deploy    → Create or update a stack's resources
  destroy   → Remove a stack's resources
  plan      → Preview pending changes
  validate  → Check stack configuration, credentials and backend files
  stacks    → List available stacks

EXIT CODES:
  0 - Success
  1 - General error
  2 - Configuration error or missing stack
  3 - Validation failure
  4 - Credential error
  5 - Backend operation failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding stack definitions
    #[arg(long, global = true, env = "DEPLOYBOT_STACKS_DIR", default_value = StackCatalog::DEFAULT_DIR)]
    pub stacks_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a stack
    Deploy(deploy::DeployArgs),

    /// Destroy a deployed stack
    Destroy(destroy::DestroyArgs),

    /// Show what a deploy would change
    Plan(plan::PlanArgs),

    /// Validate a stack without deploying it
    Validate(validate::ValidateArgs),

    /// List available stacks
    Stacks(stacks::StacksArgs),
}

/// State shared by every command of one process run.
pub struct AppContext {
    pub stacks_dir: PathBuf,
    pub session: Arc<Session>,
}

/// Stack selection and overrides.
#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Stack to operate on
    #[arg(short, long)]
    pub stack: String,

    /// Deployment target (gcp, aws, onprem); defaults to the stack's target
    #[arg(short, long)]
    pub target: Option<String>,

    /// Provisioner (terraform, pulumi, native); defaults to the stack's
    #[arg(short, long)]
    pub provisioner: Option<String>,

    /// Cloud project id override
    #[arg(long)]
    pub project_id: Option<String>,

    /// Region override
    #[arg(long)]
    pub region: Option<String>,
}

impl StackArgs {
    pub fn parameters(&self) -> DeployParameters {
        DeployParameters {
            stack: self.stack.clone(),
            target: self.target.clone(),
            provisioner: self.provisioner.clone(),
            project_id: self.project_id.clone(),
            region: self.region.clone(),
        }
    }
}

/// Remote operation polling.
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Seconds between polls of a pending cloud operation
    #[arg(long, default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// Give up on a pending cloud operation after this many seconds
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,
}

impl PollArgs {
    pub fn config(&self) -> PollConfig {
        let config = PollConfig::default().interval(Duration::from_secs(self.poll_interval_secs.max(1)));
        match self.poll_timeout_secs {
            Some(seconds) => config.deadline(Duration::from_secs(seconds)),
            None => config,
        }
    }
}

/// Resolver backed by real subprocesses and the `gcloud` CLI.
pub fn resolver(ctx: &AppContext, poll: &PollArgs) -> Resolver {
    let factory = ProvisionerFactory::new(Arc::new(ProcessRunner::default())).poller(Poller::new(poll.config()));
    Resolver::new(StackCatalog::new(&ctx.stacks_dir), ctx.session.clone(), factory)
}

/// Sink printing each progress line as it arrives.
pub fn console_sink() -> ProgressSink {
    Arc::new(|line: &str| println!("   {}", line))
}

pub fn print_outputs(outputs: &Outputs) {
    if outputs.is_empty() {
        return;
    }
    println!("📋 Outputs:");
    let width = outputs.keys().map(String::len).max().unwrap_or(0);
    for (key, value) in outputs {
        println!("   {:width$} = {}", key, value, width = width);
    }
}

/// Render an elapsed duration as `1m 05s` or `4.2s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}
