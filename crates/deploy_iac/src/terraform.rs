//! Subprocess-driven strategy: the `terraform` CLI.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_runner::{CommandConfig, CommandRunner, ExecutionResult, LogHandler, RunConfig};
use tracing::{debug, info};

use crate::config::ProvisionerConfig;
use crate::error::{IacError, IacResult};
use crate::outputs::{normalize_terraform_outputs, Outputs};
use crate::provisioner::{require_entrypoint, streaming_handler, ProgressSink, Provisioner, ProvisionerKind};

/// Entrypoint that must exist in the working directory.
pub const TERRAFORM_ENTRYPOINT: &str = "main.tf";

/// Variables file written by `init`.
pub const TFVARS_FILE: &str = "terraform.tfvars.json";

/// Drives the Terraform CLI inside a working directory.
pub struct TerraformProvisioner {
    config: ProvisionerConfig,
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout_seconds: u64,
}

impl TerraformProvisioner {
    pub fn new(config: ProvisionerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            program: "terraform".to_string(),
            timeout_seconds: 0,
        }
    }

    /// Use a different executable (`tofu`, an absolute path).
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Kill backend processes that run longer than `seconds`.
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    fn command(&self, args: &[&str]) -> CommandConfig {
        CommandConfig::new(&self.program)
            .args(args.iter().copied())
            .working_dir(&self.config.working_dir)
            .env("TF_IN_AUTOMATION", "1")
    }

    async fn run(
        &self,
        operation: &str,
        args: &[&str],
        handler: Option<LogHandler>,
    ) -> IacResult<ExecutionResult> {
        let command = self.command(args);
        debug!("Running {}", command.display());

        let run_config = RunConfig::default()
            .timeout(self.timeout_seconds)
            .stream_logs(handler.is_some());

        let result = self
            .runner
            .run(&command, &run_config, handler)
            .await
            .map_err(|e| IacError::operation(operation, e.to_string()))?;

        if !result.success() {
            return Err(IacError::operation(operation, result.diagnostics()));
        }
        Ok(result)
    }

    fn write_variables(&self) -> IacResult<()> {
        let resolved = self.config.resolve()?;
        let path = self.config.working_dir.join(TFVARS_FILE);
        let contents = serde_json::to_string_pretty(&resolved.variables)?;
        std::fs::write(&path, contents)
            .map_err(|e| IacError::operation("terraform init", format!("{}: {}", path.display(), e)))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Terraform
    }

    fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    async fn validate(&self) -> IacResult<()> {
        require_entrypoint(&self.config.working_dir, TERRAFORM_ENTRYPOINT)
    }

    async fn init(&self) -> IacResult<()> {
        self.write_variables()?;
        self.run("terraform init", &["init", "-input=false", "-no-color"], None)
            .await?;
        Ok(())
    }

    async fn apply(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<Outputs> {
        self.init().await?;

        info!("Applying terraform in {}", self.config.working_dir.display());
        self.run(
            "terraform apply",
            &["apply", "-auto-approve", "-input=false", "-no-color"],
            streaming_handler(streaming, sink),
        )
        .await?;

        let output = self
            .run("terraform output", &["output", "-json", "-no-color"], None)
            .await?;
        normalize_terraform_outputs(&output.stdout)
            .map_err(|e| e.into_operation("terraform output"))
    }

    async fn destroy(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<()> {
        self.init().await?;

        info!("Destroying terraform resources in {}", self.config.working_dir.display());
        self.run(
            "terraform destroy",
            &["destroy", "-auto-approve", "-input=false", "-no-color"],
            streaming_handler(streaming, sink),
        )
        .await?;
        Ok(())
    }

    async fn plan(&self) -> IacResult<String> {
        self.init().await?;
        let result = self
            .run("terraform plan", &["plan", "-input=false", "-no-color"], None)
            .await?;
        Ok(result.stdout)
    }
}
