//! # deploy_iac
//!
//! Provisioning backends and native recipe orchestration for DeployBot.
//!
//! Every backend implements the [`Provisioner`] lifecycle
//! (validate, init, apply, destroy, plan) and reports failures through
//! [`IacError::Operation`] with the backend's own diagnostics.
//!
//! ## Features
//!
//! - Terraform strategy driving the `terraform` CLI
//! - Pulumi strategy driving a logical stack through an [`AutomationWorkspace`]
//! - Native strategy running a registered [`Recipe`] against cloud APIs
//! - Streamed progress: backend lines parsed into lifecycle events as they arrive
//! - [`ParallelOrchestrator`] for fan-out/fan-in provisioning and teardown
//! - Sensitive output redaction
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deploy_iac::{ProgressSink, Provisioner, ProvisionerConfig, TerraformProvisioner};
//! use deploy_runner::ProcessRunner;
//!
//! # async fn run() -> deploy_iac::IacResult<()> {
//! let config = ProvisionerConfig::new("./stacks/web/terraform/gcp")
//!     .variable("project_id", "my-project")
//!     .variable("region", "us-central1");
//! let terraform = TerraformProvisioner::new(config, Arc::new(ProcessRunner::default()));
//!
//! terraform.validate().await?;
//! let sink: ProgressSink = Arc::new(|line: &str| println!("{line}"));
//! let outputs = terraform.apply(true, Some(sink)).await?;
//! for (key, value) in outputs {
//!     println!("{key} = {value}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod native;
pub mod orchestrator;
pub mod outputs;
pub mod provisioner;
pub mod pulumi;
pub mod recipe;
pub mod recipes;
pub mod terraform;

pub use config::{ProvisionerConfig, Variables, DEFAULT_LOGICAL_STACK};
pub use error::{BranchFailure, BranchFailures, IacError, IacResult};
pub use native::{NativeProvisioner, RecipeManifest, RECIPE_MARKER, VARIABLES_FILE};
pub use orchestrator::{Branch, ParallelOrchestrator};
pub use outputs::{normalize_pulumi_outputs, normalize_terraform_outputs, Outputs, REDACTED};
pub use provisioner::{progress_handler, ProgressSink, Provisioner, ProvisionerKind};
pub use pulumi::{AutomationWorkspace, PulumiCliWorkspace, PulumiProvisioner};
pub use recipe::{Recipe, RecipeContext, RecipeRegistry};
pub use terraform::{TerraformProvisioner, TERRAFORM_ENTRYPOINT, TFVARS_FILE};
