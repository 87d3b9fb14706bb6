//! Ambient cloud credentials.
//!
//! A [`Session`] is discovered once per process and shared read-only as an
//! `Arc<Session>` by everything that talks to a cloud provider.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CloudError, CloudResult};

const GCP_PROJECT_VARS: [&str; 3] = ["GOOGLE_CLOUD_PROJECT", "GCP_PROJECT_ID", "CLOUDSDK_CORE_PROJECT"];

/// Where Google credentials were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcpCredentialSource {
    /// `GOOGLE_APPLICATION_CREDENTIALS`
    ServiceAccountFile(PathBuf),
    /// gcloud application-default credentials
    ApplicationDefault(PathBuf),
}

impl GcpCredentialSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::ServiceAccountFile(path) | Self::ApplicationDefault(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpCredentials {
    pub source: GcpCredentialSource,
    /// Default project from the environment or the credential file
    pub project_id: Option<String>,
}

/// Where AWS credentials were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwsCredentialSource {
    Environment,
    Profile(String),
    SharedFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub source: AwsCredentialSource,
    pub region: Option<String>,
}

#[derive(Deserialize)]
struct CredentialFile {
    project_id: Option<String>,
    quota_project_id: Option<String>,
}

/// Process-wide credential context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    gcp: Option<GcpCredentials>,
    aws: Option<AwsCredentials>,
}

impl Session {
    /// A session without any credentials.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Discover credentials from the process environment and the user's
    /// standard credential files.
    pub fn from_env() -> Self {
        Self::from_lookup(
            |key| std::env::var(key).ok().filter(|v| !v.is_empty()),
            dirs::config_dir(),
            dirs::home_dir(),
        )
    }

    /// Discover credentials through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F, config_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let session = Self {
            gcp: discover_gcp(&lookup, config_dir.as_deref()),
            aws: discover_aws(&lookup, home_dir.as_deref()),
        };
        debug!(
            "Session discovered (gcp: {}, aws: {})",
            session.gcp.is_some(),
            session.aws.is_some()
        );
        session
    }

    pub fn with_gcp(mut self, credentials: GcpCredentials) -> Self {
        self.gcp = Some(credentials);
        self
    }

    pub fn with_aws(mut self, credentials: AwsCredentials) -> Self {
        self.aws = Some(credentials);
        self
    }

    /// Google credentials, or a credential error when none were found.
    pub fn gcp(&self) -> CloudResult<&GcpCredentials> {
        self.gcp.as_ref().ok_or_else(|| {
            CloudError::Credential(
                "no Google Cloud credentials found; set GOOGLE_APPLICATION_CREDENTIALS \
                 or run `gcloud auth application-default login`"
                    .to_string(),
            )
        })
    }

    /// AWS credentials, or a credential error when none were found.
    pub fn aws(&self) -> CloudResult<&AwsCredentials> {
        self.aws.as_ref().ok_or_else(|| {
            CloudError::Credential(
                "no AWS credentials found; set AWS_ACCESS_KEY_ID or AWS_PROFILE".to_string(),
            )
        })
    }

    pub fn gcp_project(&self) -> Option<&str> {
        self.gcp.as_ref().and_then(|c| c.project_id.as_deref())
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.aws.as_ref().and_then(|c| c.region.as_deref())
    }
}

fn discover_gcp<F>(lookup: &F, config_dir: Option<&Path>) -> Option<GcpCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    let source = match lookup("GOOGLE_APPLICATION_CREDENTIALS") {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.is_file() {
                warn!(
                    "GOOGLE_APPLICATION_CREDENTIALS points to missing file {:?}",
                    path
                );
                return None;
            }
            GcpCredentialSource::ServiceAccountFile(path)
        }
        None => {
            let path = config_dir?
                .join("gcloud")
                .join("application_default_credentials.json");
            if !path.is_file() {
                return None;
            }
            GcpCredentialSource::ApplicationDefault(path)
        }
    };

    let project_id = GCP_PROJECT_VARS
        .iter()
        .find_map(|key| lookup(*key))
        .or_else(|| project_from_file(source.path()));

    Some(GcpCredentials { source, project_id })
}

fn project_from_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<CredentialFile>(&content) {
        Ok(file) => file.project_id.or(file.quota_project_id),
        Err(e) => {
            warn!("Could not read project from {:?}: {}", path, e);
            None
        }
    }
}

fn discover_aws<F>(lookup: &F, home_dir: Option<&Path>) -> Option<AwsCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    let source = if lookup("AWS_ACCESS_KEY_ID").is_some() {
        AwsCredentialSource::Environment
    } else if let Some(profile) = lookup("AWS_PROFILE") {
        AwsCredentialSource::Profile(profile)
    } else {
        let path = home_dir?.join(".aws").join("credentials");
        if !path.is_file() {
            return None;
        }
        AwsCredentialSource::SharedFile(path)
    };

    let region = lookup("AWS_REGION").or_else(|| lookup("AWS_DEFAULT_REGION"));
    Some(AwsCredentials { source, region })
}
