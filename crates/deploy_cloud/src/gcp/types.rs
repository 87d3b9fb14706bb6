//! Resource models shared by the GCP service contracts.

use serde::{Deserialize, Serialize};

/// Google Cloud APIs a recipe may need enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GcpApi {
    CloudRun,
    CloudSql,
    CloudBuild,
    CloudStorage,
    ContainerRegistry,
    ArtifactRegistry,
}

impl GcpApi {
    /// Service name as known to the Service Usage API.
    pub fn as_str(&self) -> &'static str {
        match self {
            GcpApi::CloudRun => "run.googleapis.com",
            GcpApi::CloudSql => "sqladmin.googleapis.com",
            GcpApi::CloudBuild => "cloudbuild.googleapis.com",
            GcpApi::CloudStorage => "storage.googleapis.com",
            GcpApi::ContainerRegistry => "containerregistry.googleapis.com",
            GcpApi::ArtifactRegistry => "artifactregistry.googleapis.com",
        }
    }
}

impl std::fmt::Display for GcpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired shape of a Cloud SQL instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlInstanceSpec {
    pub name: String,
    pub region: String,
    pub database_version: String,
    pub tier: String,
    pub backups_enabled: bool,
    /// CIDR ranges allowed to connect over the public IP
    pub authorized_networks: Vec<String>,
}

impl SqlInstanceSpec {
    /// Small PostgreSQL 14 instance reachable from anywhere.
    pub fn postgres(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            database_version: "POSTGRES_14".to_string(),
            tier: "db-f1-micro".to_string(),
            backups_enabled: true,
            authorized_networks: vec!["0.0.0.0/0".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlInstance {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    /// `project:region:instance`, used by Cloud Run to reach the database
    pub connection_name: String,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlDatabase {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlUser {
    pub name: String,
}

/// A container build from a source archive in Cloud Storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub source_bucket: String,
    pub source_object: String,
    /// Image to tag and push (`gcr.io/project/app:tag`)
    pub image: String,
}

/// An image pushed by a finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    pub name: String,
    pub digest: String,
}

impl BuiltImage {
    /// Immutable reference `name@digest`.
    pub fn reference(&self) -> String {
        format!("{}@{}", self.name, self.digest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    pub bucket: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    /// Kept out of logs
    #[serde(default)]
    pub secret: bool,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            secret: true,
            ..Self::new(name, value)
        }
    }
}

/// Desired state of a Cloud Run service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<EnvVar>,
    /// Cloud SQL connection names mounted into the container
    pub cloud_sql_instances: Vec<String>,
    /// Mount path of the Cloud SQL socket volume
    pub cloud_sql_mount_path: String,
    /// CPU limit per instance (`1`, `2`)
    pub cpu: Option<String>,
    /// Memory limit per instance (`512Mi`)
    pub memory: Option<String>,
    pub max_instances: Option<u32>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            env: Vec::new(),
            cloud_sql_instances: Vec::new(),
            cloud_sql_mount_path: "/cloudsql".to_string(),
            cpu: None,
            memory: None,
            max_instances: None,
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    pub fn secret_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::secret(name, value));
        self
    }

    pub fn resources(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.cpu = Some(cpu.into());
        self.memory = Some(memory.into());
        self
    }

    pub fn max_instances(mut self, count: u32) -> Self {
        self.max_instances = Some(count);
        self
    }

    pub fn cloud_sql_instance(mut self, connection_name: impl Into<String>) -> Self {
        self.cloud_sql_instances.push(connection_name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunService {
    pub name: String,
    /// Public URL once the service is serving
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    pub role: String,
    pub members: Vec<String>,
}

impl IamBinding {
    pub fn new<I, S>(role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Same role and the same set of members, in any order.
    pub fn matches(&self, other: &IamBinding) -> bool {
        let mut ours: Vec<&str> = self.members.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = other.members.iter().map(String::as_str).collect();
        ours.sort_unstable();
        ours.dedup();
        theirs.sort_unstable();
        theirs.dedup();
        self.role == other.role && ours == theirs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl IamPolicy {
    pub fn has_binding(&self, binding: &IamBinding) -> bool {
        self.bindings.iter().any(|b| b.matches(binding))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPackage {
    pub name: String,
}
