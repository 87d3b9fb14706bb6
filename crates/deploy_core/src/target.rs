//! Deployment targets.

use std::collections::BTreeMap;
use std::str::FromStr;

use deploy_cloud::Session;
use deploy_iac::outputs::value_to_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Kinds of deployment destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Gcp,
    Aws,
    OnPrem,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Gcp => "gcp",
            TargetKind::Aws => "aws",
            TargetKind::OnPrem => "onprem",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcp" | "google" => Ok(TargetKind::Gcp),
            "aws" => Ok(TargetKind::Aws),
            "onprem" | "on-prem" | "local" => Ok(TargetKind::OnPrem),
            other => Err(CoreError::Configuration(format!("unknown target '{}'", other))),
        }
    }
}

/// A validated deployment destination.
///
/// Constructed through [`Target::resolve`], which guarantees the identity
/// fields the kind requires are present.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    kind: TargetKind,
    config: BTreeMap<String, Value>,
}

impl Target {
    /// Build a target from merged configuration, deriving missing identity
    /// fields from the session.
    ///
    /// GCP targets need `project_id`; AWS targets need `region`.
    pub fn resolve(kind: TargetKind, mut config: BTreeMap<String, Value>, session: &Session) -> CoreResult<Self> {
        let has = |config: &BTreeMap<String, Value>, key: &str| {
            config
                .get(key)
                .map(|v| !value_to_string(v).trim().is_empty())
                .unwrap_or(false)
        };

        match kind {
            TargetKind::Gcp => {
                if !has(&config, "project_id") {
                    let project = session.gcp_project().ok_or_else(|| {
                        CoreError::Configuration(
                            "no GCP project id: pass --project-id, set GOOGLE_CLOUD_PROJECT or configure one for the stack"
                                .to_string(),
                        )
                    })?;
                    debug!("Using GCP project {} from credentials", project);
                    config.insert("project_id".to_string(), Value::String(project.to_string()));
                }
            }
            TargetKind::Aws => {
                if !has(&config, "region") {
                    let region = session.aws_region().ok_or_else(|| {
                        CoreError::Configuration(
                            "no AWS region: pass --region, set AWS_REGION or configure one for the stack".to_string(),
                        )
                    })?;
                    config.insert("region".to_string(), Value::String(region.to_string()));
                }
            }
            TargetKind::OnPrem => {}
        }

        Ok(Self { kind, config })
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        self.kind.as_str()
    }

    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(value_to_string)
    }

    pub fn region(&self) -> Option<String> {
        self.get("region")
    }

    pub fn project_id(&self) -> Option<String> {
        self.get("project_id")
    }

    /// Confirm credentials for this target are available.
    pub fn validate_credentials(&self, session: &Session) -> CoreResult<()> {
        let result = match self.kind {
            TargetKind::Gcp => session.gcp().map(|_| ()),
            TargetKind::Aws => session.aws().map(|_| ()),
            TargetKind::OnPrem => Ok(()),
        };
        result.map_err(|e| CoreError::Credential(e.to_string()))
    }
}
