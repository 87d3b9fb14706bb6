//! # deploy_cloud
//!
//! Cloud plumbing for DeployBot.
//!
//! # Features
//!
//! - **Session**: credential discovery, built once and shared read-only
//! - **Remote Operation Poller**: waits for asynchronous cloud calls to
//!   reach a terminal state, with configurable interval, backoff and deadline
//! - **GCP Contracts**: Service Usage, Cloud SQL, Cloud Build, Storage,
//!   Cloud Run and Artifact Registry as async traits
//! - **gcloud Adapter**: contract implementation driving the `gcloud` CLI
//! - **Fake Cloud**: in-memory implementation for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deploy_cloud::gcp::{GcloudCli, SqlAdmin, SqlInstanceSpec};
//! use deploy_cloud::{PollConfig, Poller};
//! use deploy_runner::ProcessRunner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gcloud = GcloudCli::new(Arc::new(ProcessRunner::default()));
//!     let poller = Poller::new(PollConfig::default());
//!
//!     let spec = SqlInstanceSpec::postgres("app-db", "us-central1");
//!     let operation = gcloud.insert_instance("my-project", &spec).await?;
//!     poller.wait(operation.as_ref()).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod gcp;
pub mod poller;
pub mod session;

pub use archive::{pack_directory, pack_to_temp};
pub use error::{CloudError, CloudResult};
pub use poller::{OperationStatus, PendingOperation, PollConfig, Poller, RemoteOperation, ResolvedOperation};
pub use session::{AwsCredentialSource, AwsCredentials, GcpCredentialSource, GcpCredentials, Session};
