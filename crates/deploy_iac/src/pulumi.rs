//! Automation-driven strategy: Pulumi stacks.
//!
//! The provisioner talks to an [`AutomationWorkspace`], a handle bound to
//! a project directory that selects logical stacks, pushes configuration
//! and runs stack operations. [`PulumiCliWorkspace`] implements it over
//! the `pulumi` CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use deploy_runner::{CommandConfig, CommandRunner, ExecutionResult, LogHandler, RunConfig};
use tracing::{debug, info};

use crate::config::ProvisionerConfig;
use crate::error::{IacError, IacResult};
use crate::outputs::{normalize_pulumi_outputs, value_to_string, Outputs};
use crate::provisioner::{require_entrypoint, streaming_handler, ProgressSink, Provisioner, ProvisionerKind};

/// Project file that must exist in the working directory.
pub const PULUMI_PROJECT_FILE: &str = "Pulumi.yaml";

/// Program entry files, one of which must sit next to the project file.
pub const PULUMI_PROGRAM_FILES: [&str; 3] = ["__main__.py", "index.ts", "main.go"];

/// Passphrase for the local secrets provider.
pub const LOCAL_PASSPHRASE: &str = "deploybot-local";

/// Operations on a Pulumi project bound to a directory.
#[async_trait]
pub trait AutomationWorkspace: Send + Sync {
    /// Select a logical stack, creating it when absent.
    async fn select_or_create_stack(&self, stack: &str) -> IacResult<()>;

    async fn set_config(&self, stack: &str, key: &str, value: &str) -> IacResult<()>;

    /// Run an update and return the raw stack outputs.
    async fn up(&self, stack: &str, handler: Option<LogHandler>) -> IacResult<Outputs>;

    async fn preview(&self, stack: &str) -> IacResult<String>;

    async fn destroy(&self, stack: &str, handler: Option<LogHandler>) -> IacResult<()>;

    async fn refresh(&self, stack: &str) -> IacResult<()>;

    /// Remove the logical stack from the workspace.
    async fn remove_stack(&self, stack: &str) -> IacResult<()>;
}

/// [`AutomationWorkspace`] over the `pulumi` CLI.
pub struct PulumiCliWorkspace {
    runner: Arc<dyn CommandRunner>,
    work_dir: PathBuf,
    program: String,
    env: HashMap<String, String>,
}

impl PulumiCliWorkspace {
    pub fn new(runner: Arc<dyn CommandRunner>, work_dir: impl AsRef<Path>) -> Self {
        let mut env = HashMap::new();
        env.insert("PULUMI_CONFIG_PASSPHRASE".to_string(), LOCAL_PASSPHRASE.to_string());
        env.insert("PULUMI_SKIP_UPDATE_CHECK".to_string(), "true".to_string());

        Self {
            runner,
            work_dir: work_dir.as_ref().to_path_buf(),
            program: "pulumi".to_string(),
            env,
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self, args: &[&str]) -> CommandConfig {
        let mut command = CommandConfig::new(&self.program)
            .args(args.iter().copied())
            .working_dir(&self.work_dir);
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        command
    }

    async fn run(
        &self,
        operation: &str,
        args: &[&str],
        handler: Option<LogHandler>,
    ) -> IacResult<ExecutionResult> {
        self.exec(operation, self.command(args), handler).await
    }

    async fn exec(
        &self,
        operation: &str,
        command: CommandConfig,
        handler: Option<LogHandler>,
    ) -> IacResult<ExecutionResult> {
        debug!("Running {}", command.display());

        let run_config = RunConfig::default().stream_logs(handler.is_some());
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
}

#[async_trait]
impl AutomationWorkspace for PulumiCliWorkspace {
    async fn select_or_create_stack(&self, stack: &str) -> IacResult<()> {
        self.run(
            "pulumi stack select",
            &["stack", "select", stack, "--create", "--non-interactive"],
            None,
        )
        .await?;
        Ok(())
    }

    async fn set_config(&self, stack: &str, key: &str, value: &str) -> IacResult<()> {
        // Config values may hold passwords.
        let command = self
            .command(&["config", "set", "--stack", stack, "--non-interactive", "--", key])
            .secret_arg(value);
        self.exec("pulumi config set", command, None).await?;
        Ok(())
    }

    async fn up(&self, stack: &str, handler: Option<LogHandler>) -> IacResult<Outputs> {
        self.run(
            "pulumi up",
            &[
                "up",
                "--yes",
                "--skip-preview",
                "--stack",
                stack,
                "--non-interactive",
                "--color",
                "never",
            ],
            handler,
        )
        .await?;

        let output = self
            .run(
                "pulumi stack output",
                &["stack", "output", "--json", "--stack", stack],
                None,
            )
            .await?;
        normalize_pulumi_outputs(&output.stdout).map_err(|e| e.into_operation("pulumi stack output"))
    }

    async fn preview(&self, stack: &str) -> IacResult<String> {
        let result = self
            .run(
                "pulumi preview",
                &["preview", "--stack", stack, "--non-interactive", "--color", "never"],
                None,
            )
            .await?;
        Ok(result.stdout)
    }

    async fn destroy(&self, stack: &str, handler: Option<LogHandler>) -> IacResult<()> {
        self.run(
            "pulumi destroy",
            &[
                "destroy",
                "--yes",
                "--skip-preview",
                "--stack",
                stack,
                "--non-interactive",
                "--color",
                "never",
            ],
            handler,
        )
        .await?;
        Ok(())
    }

    async fn refresh(&self, stack: &str) -> IacResult<()> {
        self.run(
            "pulumi refresh",
            &["refresh", "--yes", "--stack", stack, "--non-interactive", "--color", "never"],
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_stack(&self, stack: &str) -> IacResult<()> {
        self.run(
            "pulumi stack rm",
            &["stack", "rm", stack, "--yes", "--non-interactive"],
            None,
        )
        .await?;
        Ok(())
    }
}

/// Provisioner bound to one logical Pulumi stack.
pub struct PulumiProvisioner {
    config: ProvisionerConfig,
    workspace: Arc<dyn AutomationWorkspace>,
}

impl PulumiProvisioner {
    pub fn new(config: ProvisionerConfig, workspace: Arc<dyn AutomationWorkspace>) -> Self {
        Self { config, workspace }
    }

    /// Build a provisioner driving the `pulumi` CLI in the configured directory.
    pub fn with_cli(config: ProvisionerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let workspace = PulumiCliWorkspace::new(runner, &config.working_dir);
        Self::new(config, Arc::new(workspace))
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    fn stack(&self) -> &str {
        &self.config.logical_stack
    }

    /// Reconcile stack state with the real resources.
    pub async fn refresh(&self) -> IacResult<()> {
        self.init().await?;
        self.workspace.refresh(self.stack()).await
    }
}

#[async_trait]
impl Provisioner for PulumiProvisioner {
    fn kind(&self) -> ProvisionerKind {
        ProvisionerKind::Pulumi
    }

    fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    async fn validate(&self) -> IacResult<()> {
        let dir = &self.config.working_dir;
        require_entrypoint(dir, PULUMI_PROJECT_FILE)?;

        let stack_file = format!("Pulumi.{}.yaml", self.config.logical_stack);
        let has_program = PULUMI_PROGRAM_FILES
            .iter()
            .map(|f| f.to_string())
            .chain(std::iter::once(stack_file))
            .any(|f| dir.join(f).is_file());
        if !has_program {
            return Err(IacError::Validation(format!(
                "no Pulumi program found in {} (expected one of {}, Pulumi.<stack>.yaml)",
                dir.display(),
                PULUMI_PROGRAM_FILES.join(", ")
            )));
        }
        Ok(())
    }

    async fn init(&self) -> IacResult<()> {
        let resolved = self.config.resolve()?;
        let stack = self.stack();

        self.workspace.select_or_create_stack(stack).await?;
        for (key, value) in &resolved.provider_variables {
            self.workspace
                .set_config(stack, key, &value_to_string(value))
                .await?;
        }
        for (key, value) in &resolved.variables {
            self.workspace
                .set_config(stack, key, &value_to_string(value))
                .await?;
        }
        debug!(
            "Configured stack {} with {} value(s)",
            stack,
            resolved.provider_variables.len() + resolved.variables.len()
        );
        Ok(())
    }

    async fn apply(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<Outputs> {
        self.init().await?;
        info!("Running pulumi up on stack {}", self.stack());
        self.workspace
            .up(self.stack(), streaming_handler(streaming, sink))
            .await
    }

    async fn destroy(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<()> {
        self.init().await?;
        info!("Running pulumi destroy on stack {}", self.stack());
        self.workspace
            .destroy(self.stack(), streaming_handler(streaming, sink))
            .await?;
        self.workspace.remove_stack(self.stack()).await
    }

    async fn plan(&self) -> IacResult<String> {
        self.init().await?;
        self.workspace.preview(self.stack()).await
    }
}
