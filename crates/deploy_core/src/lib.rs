//! # deploy_core
//!
//! Stack catalog, targets and provisioner resolution for DeployBot.
//!
//! ## Features
//!
//! - Stack catalog loaded from `stacks/<name>/stack.yaml`
//! - Targets validated against the process [`Session`](deploy_cloud::Session)
//! - Provisioner factory wiring Terraform, Pulumi and native recipes
//! - Resolver merging caller overrides over stack defaults
//! - Error classification with process exit codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deploy_cloud::Session;
//! use deploy_core::{DeployParameters, ProvisionerFactory, Resolver, StackCatalog};
//! use deploy_runner::ProcessRunner;
//!
//! # async fn run() -> deploy_core::CoreResult<()> {
//! let session = Arc::new(Session::from_env());
//! let factory = ProvisionerFactory::new(Arc::new(ProcessRunner::default()));
//! let resolver = Resolver::new(StackCatalog::new("stacks"), session.clone(), factory);
//!
//! let params = DeployParameters::new("fastapi_postgres").region("europe-west1");
//! let resolution = resolver.resolve(&params)?;
//! resolution.target.validate_credentials(&session)?;
//! resolution.provisioner.validate().await?;
//! let outputs = resolution.provisioner.apply(false, None).await?;
//! println!("{:?}", outputs);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod factory;
pub mod resolver;
pub mod stack;
pub mod target;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use factory::ProvisionerFactory;
pub use resolver::{DeployParameters, Resolution, Resolver};
pub use stack::{Stack, StackCatalog, StackConfig, StackSummary, STACK_FILE};
pub use target::{Target, TargetKind};
