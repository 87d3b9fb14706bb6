//! The provisioner lifecycle contract shared by every backend.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_events::{format_event, parse_line};
use deploy_runner::{LogHandler, LogLine};
use serde::{Deserialize, Serialize};

use crate::error::{IacError, IacResult};
use crate::outputs::Outputs;

/// Receives one formatted progress line at a time, in event order.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Provisioning backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerKind {
    Terraform,
    Pulumi,
    Native,
}

impl ProvisionerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionerKind::Terraform => "terraform",
            ProvisionerKind::Pulumi => "pulumi",
            ProvisionerKind::Native => "native",
        }
    }

    pub fn all() -> [ProvisionerKind; 3] {
        [
            ProvisionerKind::Terraform,
            ProvisionerKind::Pulumi,
            ProvisionerKind::Native,
        ]
    }
}

impl std::fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisionerKind {
    type Err = IacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terraform" => Ok(ProvisionerKind::Terraform),
            "pulumi" => Ok(ProvisionerKind::Pulumi),
            "native" => Ok(ProvisionerKind::Native),
            other => Err(IacError::Configuration(format!(
                "unknown provisioner '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle contract implemented by every provisioning backend.
///
/// All failures of `init`, `apply`, `destroy` and `plan` surface as
/// [`IacError::Operation`] carrying the backend's diagnostic text.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn kind(&self) -> ProvisionerKind;

    /// Directory the backend operates in.
    fn working_dir(&self) -> &Path;

    /// Check the backend entrypoint exists. Never touches external state.
    async fn validate(&self) -> IacResult<()>;

    /// Materialize variables and prepare backend state. Idempotent.
    async fn init(&self) -> IacResult<()>;

    /// Create or update resources and return the normalized outputs.
    async fn apply(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<Outputs>;

    /// Tear resources down and release the backend stack handle.
    async fn destroy(&self, streaming: bool, sink: Option<ProgressSink>) -> IacResult<()>;

    /// Preview pending changes without mutating resources.
    async fn plan(&self) -> IacResult<String>;
}

/// Adapt a progress sink into a runner line handler that parses each
/// line into a lifecycle event and forwards its formatted rendering.
pub fn progress_handler(sink: ProgressSink) -> LogHandler {
    Arc::new(move |line: LogLine| {
        if let Some(event) = parse_line(&line.message) {
            sink(&format_event(&event));
        }
    })
}

/// Streaming is active only when requested and a sink is present.
pub(crate) fn streaming_handler(streaming: bool, sink: Option<ProgressSink>) -> Option<LogHandler> {
    match (streaming, sink) {
        (true, Some(sink)) => Some(progress_handler(sink)),
        _ => None,
    }
}

/// Require `path` to exist inside the working directory.
pub(crate) fn require_entrypoint(working_dir: &Path, file: &str) -> IacResult<()> {
    if !working_dir.is_dir() {
        return Err(IacError::Validation(format!(
            "working directory {} does not exist",
            working_dir.display()
        )));
    }
    if !working_dir.join(file).is_file() {
        return Err(IacError::Validation(format!(
            "{} not found in {}",
            file,
            working_dir.display()
        )));
    }
    Ok(())
}
