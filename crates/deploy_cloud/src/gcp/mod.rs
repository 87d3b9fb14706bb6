//! Google Cloud service contracts.
//!
//! Each trait covers one Google API used by native recipes. Reads return the
//! resource or [`CloudError::NotFound`]; mutating calls return a
//! [`PendingOperation`] to be resolved through the [`Poller`].

pub mod fake;
pub mod gcloud;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{CloudError, CloudResult};
use crate::poller::{PendingOperation, Poller};

pub use fake::FakeGcp;
pub use gcloud::GcloudCli;
pub use types::*;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceUsage: Send + Sync {
    async fn enable_service(&self, project_id: &str, api: GcpApi) -> CloudResult<PendingOperation<()>>;
}

#[async_trait]
pub trait SqlAdmin: Send + Sync {
    async fn get_instance(&self, project_id: &str, instance: &str) -> CloudResult<SqlInstance>;
    async fn insert_instance(&self, project_id: &str, spec: &SqlInstanceSpec) -> CloudResult<PendingOperation<()>>;
    async fn delete_instance(&self, project_id: &str, instance: &str) -> CloudResult<PendingOperation<()>>;

    async fn get_database(&self, project_id: &str, instance: &str, database: &str) -> CloudResult<SqlDatabase>;
    async fn insert_database(&self, project_id: &str, instance: &str, database: &str) -> CloudResult<PendingOperation<()>>;

    async fn get_user(&self, project_id: &str, instance: &str, user: &str) -> CloudResult<SqlUser>;
    async fn insert_user(
        &self,
        project_id: &str,
        instance: &str,
        user: &str,
        password: &str,
    ) -> CloudResult<PendingOperation<()>>;
}

#[async_trait]
pub trait CloudBuild: Send + Sync {
    /// Start a build; the operation resolves to the pushed image.
    async fn create_build(&self, project_id: &str, spec: &BuildSpec) -> CloudResult<PendingOperation<BuiltImage>>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload_object(&self, bucket: &str, object: &str, source: &Path) -> CloudResult<StorageObject>;
    async fn get_object(&self, bucket: &str, object: &str) -> CloudResult<StorageObject>;
    async fn delete_object(&self, bucket: &str, object: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait CloudRun: Send + Sync {
    async fn get_service(&self, project_id: &str, region: &str, service: &str) -> CloudResult<RunService>;
    async fn create_service(
        &self,
        project_id: &str,
        region: &str,
        spec: &ServiceSpec,
    ) -> CloudResult<PendingOperation<RunService>>;
    async fn update_service(
        &self,
        project_id: &str,
        region: &str,
        spec: &ServiceSpec,
    ) -> CloudResult<PendingOperation<RunService>>;
    async fn delete_service(&self, project_id: &str, region: &str, service: &str) -> CloudResult<PendingOperation<()>>;

    async fn get_iam_policy(&self, project_id: &str, region: &str, service: &str) -> CloudResult<IamPolicy>;
    async fn set_iam_policy(
        &self,
        project_id: &str,
        region: &str,
        service: &str,
        policy: &IamPolicy,
    ) -> CloudResult<()>;
}

#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    async fn get_package(
        &self,
        project_id: &str,
        location: &str,
        repository: &str,
        package: &str,
    ) -> CloudResult<ArtifactPackage>;
    async fn delete_package(
        &self,
        project_id: &str,
        location: &str,
        repository: &str,
        package: &str,
    ) -> CloudResult<PendingOperation<()>>;
}

/// The set of Google services a recipe can use.
#[derive(Clone)]
pub struct GcpServices {
    pub service_usage: Arc<dyn ServiceUsage>,
    pub sql: Arc<dyn SqlAdmin>,
    pub build: Arc<dyn CloudBuild>,
    pub storage: Arc<dyn Storage>,
    pub run: Arc<dyn CloudRun>,
    pub artifacts: Arc<dyn ArtifactRegistry>,
}

impl GcpServices {
    /// Use one backend for every service.
    pub fn uniform<T>(backend: Arc<T>) -> Self
    where
        T: ServiceUsage + SqlAdmin + CloudBuild + Storage + CloudRun + ArtifactRegistry + 'static,
    {
        Self {
            service_usage: backend.clone(),
            sql: backend.clone(),
            build: backend.clone(),
            storage: backend.clone(),
            run: backend.clone(),
            artifacts: backend,
        }
    }
}

impl std::fmt::Debug for GcpServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpServices").finish_non_exhaustive()
    }
}

/// Enable each API in turn, waiting for every operation to finish.
pub async fn enable_apis(
    usage: &dyn ServiceUsage,
    poller: &Poller,
    project_id: &str,
    apis: &[GcpApi],
) -> CloudResult<()> {
    for api in apis {
        info!("Enabling {} in {}", api, project_id);
        let operation = usage.enable_service(project_id, *api).await?;
        poller.wait(operation.as_ref()).await?;
    }
    Ok(())
}

/// Map a `NotFound` lookup to `None`, keeping other errors.
pub fn found<T>(result: CloudResult<T>) -> CloudResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CloudError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
