//! In-memory Google Cloud for tests and offline runs.
//!
//! [`FakeGcp`] implements every service contract against shared in-memory
//! state. Operations stay pending for a configurable number of polls,
//! failures can be injected per call, and every call is recorded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::types::*;
use super::{ArtifactRegistry, CloudBuild, CloudRun, ServiceUsage, SqlAdmin, Storage};
use crate::error::{CloudError, CloudResult};
use crate::poller::{OperationStatus, PendingOperation, RemoteOperation};

struct FakeOperation<T> {
    id: String,
    remaining: AtomicUsize,
    outcome: OperationStatus<T>,
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> RemoteOperation for FakeOperation<T> {
    type Output = T;

    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> CloudResult<OperationStatus<T>> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Ok(OperationStatus::Pending);
        }
        Ok(self.outcome.clone())
    }
}

#[derive(Default)]
struct FakeState {
    enabled_apis: BTreeSet<GcpApi>,
    instances: BTreeMap<String, SqlInstance>,
    databases: BTreeSet<(String, String)>,
    users: BTreeMap<(String, String), String>,
    objects: BTreeSet<(String, String)>,
    services: BTreeMap<String, (ServiceSpec, RunService)>,
    policies: BTreeMap<String, IamPolicy>,
    packages: BTreeSet<(String, String, String)>,
    builds: usize,
}

/// Recording in-memory implementation of the GCP contracts.
#[derive(Clone)]
pub struct FakeGcp {
    state: Arc<Mutex<FakeState>>,
    calls: Arc<Mutex<Vec<String>>>,
    call_failures: Arc<Mutex<HashMap<String, String>>>,
    operation_failures: Arc<Mutex<HashMap<String, String>>>,
    pending_polls: usize,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for FakeGcp {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeGcp {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
            call_failures: Arc::new(Mutex::new(HashMap::new())),
            operation_failures: Arc::new(Mutex::new(HashMap::new())),
            pending_polls: 1,
            latency: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `Pending` polls before an operation resolves.
    pub fn with_pending_polls(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the call named `method` (`sql.insert_instance`) fail outright.
    pub fn fail_call(self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.call_failures.lock().insert(method.into(), message.into());
        self
    }

    /// Make operations started by `method` reach a failed terminal state.
    pub fn fail_operation(self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.operation_failures.lock().insert(method.into(), message.into());
        self
    }

    pub fn with_instance(self, name: &str, connection_name: &str) -> Self {
        self.state.lock().instances.insert(
            name.to_string(),
            SqlInstance {
                name: name.to_string(),
                region: None,
                connection_name: connection_name.to_string(),
                state: Some("RUNNABLE".to_string()),
            },
        );
        self
    }

    pub fn with_database(self, instance: &str, database: &str) -> Self {
        self.state
            .lock()
            .databases
            .insert((instance.to_string(), database.to_string()));
        self
    }

    pub fn with_user(self, instance: &str, user: &str) -> Self {
        self.state
            .lock()
            .users
            .insert((instance.to_string(), user.to_string()), String::new());
        self
    }

    pub fn with_object(self, bucket: &str, object: &str) -> Self {
        self.state
            .lock()
            .objects
            .insert((bucket.to_string(), object.to_string()));
        self
    }

    pub fn with_service(self, name: &str, uri: &str) -> Self {
        let spec = ServiceSpec::new(name, "gcr.io/seeded/image");
        let service = RunService {
            name: name.to_string(),
            uri: Some(uri.to_string()),
        };
        self.state
            .lock()
            .services
            .insert(name.to_string(), (spec, service));
        self
    }

    pub fn with_package(self, location: &str, repository: &str, package: &str) -> Self {
        self.state.lock().packages.insert((
            location.to_string(),
            repository.to_string(),
            package.to_string(),
        ));
        self
    }

    /// Recorded calls, in order, as `method argument`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .cloned()
            .collect()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn enabled_apis(&self) -> Vec<GcpApi> {
        self.state.lock().enabled_apis.iter().copied().collect()
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.state.lock().instances.contains_key(name)
    }

    pub fn has_database(&self, instance: &str, database: &str) -> bool {
        self.state
            .lock()
            .databases
            .contains(&(instance.to_string(), database.to_string()))
    }

    pub fn has_user(&self, instance: &str, user: &str) -> bool {
        self.state
            .lock()
            .users
            .contains_key(&(instance.to_string(), user.to_string()))
    }

    pub fn has_object(&self, bucket: &str, object: &str) -> bool {
        self.state
            .lock()
            .objects
            .contains(&(bucket.to_string(), object.to_string()))
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.state.lock().services.contains_key(name)
    }

    pub fn service_spec(&self, name: &str) -> Option<ServiceSpec> {
        self.state.lock().services.get(name).map(|(spec, _)| spec.clone())
    }

    pub fn policy(&self, service: &str) -> Option<IamPolicy> {
        self.state.lock().policies.get(service).cloned()
    }

    pub fn has_package(&self, location: &str, repository: &str, package: &str) -> bool {
        self.state.lock().packages.contains(&(
            location.to_string(),
            repository.to_string(),
            package.to_string(),
        ))
    }

    /// Record the call, apply latency and injected call failures.
    async fn enter(&self, method: &str, subject: &str) -> CloudResult<InFlight<'_>> {
        self.calls.lock().push(format!("{} {}", method, subject));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight {
            counter: &self.in_flight,
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = self.call_failures.lock().get(method) {
            return Err(CloudError::Api(message.clone()));
        }
        Ok(guard)
    }

    /// Build the operation for `method`, running `apply` unless it is set
    /// to fail.
    fn operation<T, F>(&self, method: &str, subject: &str, apply: F) -> PendingOperation<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&mut FakeState) -> T,
    {
        let failure = self.operation_failures.lock().get(method).cloned();
        let outcome = match failure {
            Some(message) => OperationStatus::Failed(message),
            None => OperationStatus::Succeeded(apply(&mut *self.state.lock())),
        };
        Box::new(FakeOperation {
            id: format!("operations/{}/{}", method, subject),
            remaining: AtomicUsize::new(self.pending_polls),
            outcome,
        })
    }
}

#[async_trait]
impl ServiceUsage for FakeGcp {
    async fn enable_service(&self, _project_id: &str, api: GcpApi) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("usage.enable_service", api.as_str()).await?;
        Ok(self.operation("usage.enable_service", api.as_str(), |s| {
            s.enabled_apis.insert(api);
        }))
    }
}

#[async_trait]
impl SqlAdmin for FakeGcp {
    async fn get_instance(&self, _project_id: &str, instance: &str) -> CloudResult<SqlInstance> {
        let _guard = self.enter("sql.get_instance", instance).await?;
        self.state
            .lock()
            .instances
            .get(instance)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("Cloud SQL instance {}", instance)))
    }

    async fn insert_instance(&self, project_id: &str, spec: &SqlInstanceSpec) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("sql.insert_instance", &spec.name).await?;
        let instance = SqlInstance {
            name: spec.name.clone(),
            region: Some(spec.region.clone()),
            connection_name: format!("{}:{}:{}", project_id, spec.region, spec.name),
            state: Some("RUNNABLE".to_string()),
        };
        Ok(self.operation("sql.insert_instance", &spec.name, move |s| {
            s.instances.insert(instance.name.clone(), instance);
        }))
    }

    async fn delete_instance(&self, _project_id: &str, instance: &str) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("sql.delete_instance", instance).await?;
        let name = instance.to_string();
        Ok(self.operation("sql.delete_instance", instance, move |s| {
            s.instances.remove(&name);
            s.databases.retain(|(i, _)| *i != name);
            s.users.retain(|(i, _), _| *i != name);
        }))
    }

    async fn get_database(&self, _project_id: &str, instance: &str, database: &str) -> CloudResult<SqlDatabase> {
        let _guard = self.enter("sql.get_database", database).await?;
        if self.has_database(instance, database) {
            Ok(SqlDatabase {
                name: database.to_string(),
            })
        } else {
            Err(CloudError::NotFound(format!("Cloud SQL database {}", database)))
        }
    }

    async fn insert_database(&self, _project_id: &str, instance: &str, database: &str) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("sql.insert_database", database).await?;
        let key = (instance.to_string(), database.to_string());
        Ok(self.operation("sql.insert_database", database, move |s| {
            s.databases.insert(key);
        }))
    }

    async fn get_user(&self, _project_id: &str, instance: &str, user: &str) -> CloudResult<SqlUser> {
        let _guard = self.enter("sql.get_user", user).await?;
        if self.has_user(instance, user) {
            Ok(SqlUser {
                name: user.to_string(),
            })
        } else {
            Err(CloudError::NotFound(format!("Cloud SQL user {}", user)))
        }
    }

    async fn insert_user(
        &self,
        _project_id: &str,
        instance: &str,
        user: &str,
        password: &str,
    ) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("sql.insert_user", user).await?;
        let key = (instance.to_string(), user.to_string());
        let password = password.to_string();
        Ok(self.operation("sql.insert_user", user, move |s| {
            s.users.insert(key, password);
        }))
    }
}

#[async_trait]
impl CloudBuild for FakeGcp {
    async fn create_build(&self, _project_id: &str, spec: &BuildSpec) -> CloudResult<PendingOperation<BuiltImage>> {
        let _guard = self.enter("build.create_build", &spec.image).await?;
        if !self.has_object(&spec.source_bucket, &spec.source_object) {
            return Err(CloudError::NotFound(format!(
                "gs://{}/{}",
                spec.source_bucket, spec.source_object
            )));
        }
        let image = spec.image.clone();
        Ok(self.operation("build.create_build", &spec.image, move |s| {
            s.builds += 1;
            BuiltImage {
                name: image,
                digest: format!("sha256:{:064x}", s.builds),
            }
        }))
    }
}

#[async_trait]
impl Storage for FakeGcp {
    async fn upload_object(&self, bucket: &str, object: &str, source: &Path) -> CloudResult<StorageObject> {
        let _guard = self.enter("storage.upload_object", object).await?;
        if !source.is_file() {
            return Err(CloudError::NotFound(source.display().to_string()));
        }
        self.state
            .lock()
            .objects
            .insert((bucket.to_string(), object.to_string()));
        Ok(StorageObject {
            bucket: bucket.to_string(),
            name: object.to_string(),
        })
    }

    async fn get_object(&self, bucket: &str, object: &str) -> CloudResult<StorageObject> {
        let _guard = self.enter("storage.get_object", object).await?;
        if self.has_object(bucket, object) {
            Ok(StorageObject {
                bucket: bucket.to_string(),
                name: object.to_string(),
            })
        } else {
            Err(CloudError::NotFound(format!("gs://{}/{}", bucket, object)))
        }
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> CloudResult<()> {
        let _guard = self.enter("storage.delete_object", object).await?;
        let removed = self
            .state
            .lock()
            .objects
            .remove(&(bucket.to_string(), object.to_string()));
        if removed {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!("gs://{}/{}", bucket, object)))
        }
    }
}

impl FakeGcp {
    fn rollout(&self, method: &str, region: &str, spec: &ServiceSpec) -> PendingOperation<RunService> {
        let spec = spec.clone();
        let name = spec.name.clone();
        let uri = format!("https://{}-fake-{}.a.run.app", spec.name, region);
        self.operation(method, &name, move |s| {
            let service = RunService {
                name: spec.name.clone(),
                uri: Some(uri),
            };
            s.services
                .insert(spec.name.clone(), (spec, service.clone()));
            service
        })
    }
}

#[async_trait]
impl CloudRun for FakeGcp {
    async fn get_service(&self, _project_id: &str, _region: &str, service: &str) -> CloudResult<RunService> {
        let _guard = self.enter("run.get_service", service).await?;
        self.state
            .lock()
            .services
            .get(service)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| CloudError::NotFound(format!("Cloud Run service {}", service)))
    }

    async fn create_service(
        &self,
        _project_id: &str,
        region: &str,
        spec: &ServiceSpec,
    ) -> CloudResult<PendingOperation<RunService>> {
        let _guard = self.enter("run.create_service", &spec.name).await?;
        if self.has_service(&spec.name) {
            return Err(CloudError::Api(format!("service {} already exists", spec.name)));
        }
        Ok(self.rollout("run.create_service", region, spec))
    }

    async fn update_service(
        &self,
        _project_id: &str,
        region: &str,
        spec: &ServiceSpec,
    ) -> CloudResult<PendingOperation<RunService>> {
        let _guard = self.enter("run.update_service", &spec.name).await?;
        if !self.has_service(&spec.name) {
            return Err(CloudError::NotFound(format!("Cloud Run service {}", spec.name)));
        }
        Ok(self.rollout("run.update_service", region, spec))
    }

    async fn delete_service(&self, _project_id: &str, _region: &str, service: &str) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("run.delete_service", service).await?;
        let name = service.to_string();
        Ok(self.operation("run.delete_service", service, move |s| {
            s.services.remove(&name);
            s.policies.remove(&name);
        }))
    }

    async fn get_iam_policy(&self, _project_id: &str, _region: &str, service: &str) -> CloudResult<IamPolicy> {
        let _guard = self.enter("run.get_iam_policy", service).await?;
        if !self.has_service(service) {
            return Err(CloudError::NotFound(format!("Cloud Run service {}", service)));
        }
        Ok(self.policy(service).unwrap_or_default())
    }

    async fn set_iam_policy(
        &self,
        _project_id: &str,
        _region: &str,
        service: &str,
        policy: &IamPolicy,
    ) -> CloudResult<()> {
        let _guard = self.enter("run.set_iam_policy", service).await?;
        self.state
            .lock()
            .policies
            .insert(service.to_string(), policy.clone());
        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for FakeGcp {
    async fn get_package(
        &self,
        _project_id: &str,
        location: &str,
        repository: &str,
        package: &str,
    ) -> CloudResult<ArtifactPackage> {
        let _guard = self.enter("artifacts.get_package", package).await?;
        if self.has_package(location, repository, package) {
            Ok(ArtifactPackage {
                name: package.to_string(),
            })
        } else {
            Err(CloudError::NotFound(format!("package {}", package)))
        }
    }

    async fn delete_package(
        &self,
        _project_id: &str,
        location: &str,
        repository: &str,
        package: &str,
    ) -> CloudResult<PendingOperation<()>> {
        let _guard = self.enter("artifacts.delete_package", package).await?;
        let key = (location.to_string(), repository.to_string(), package.to_string());
        Ok(self.operation("artifacts.delete_package", package, move |s| {
            s.packages.remove(&key);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::{PollConfig, Poller};

    fn poller() -> Poller {
        Poller::new(PollConfig::default().interval(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_instance_lifecycle() {
        let gcp = FakeGcp::new();
        assert!(gcp.get_instance("p", "db").await.unwrap_err().is_not_found());

        let op = gcp
            .insert_instance("p", &SqlInstanceSpec::postgres("db", "us-central1"))
            .await
            .unwrap();
        poller().wait(op.as_ref()).await.unwrap();

        let instance = gcp.get_instance("p", "db").await.unwrap();
        assert_eq!(instance.connection_name, "p:us-central1:db");

        let op = gcp.delete_instance("p", "db").await.unwrap();
        poller().wait(op.as_ref()).await.unwrap();
        assert!(!gcp.has_instance("db"));
    }

    #[tokio::test]
    async fn test_injected_operation_failure_leaves_state_untouched() {
        let gcp = FakeGcp::new().fail_operation("sql.insert_instance", "quota exceeded");

        let op = gcp
            .insert_instance("p", &SqlInstanceSpec::postgres("db", "us-central1"))
            .await
            .unwrap();
        let err = poller().wait(op.as_ref()).await.unwrap_err();

        assert!(matches!(err, CloudError::OperationFailed { .. }));
        assert!(!gcp.has_instance("db"));
    }

    #[tokio::test]
    async fn test_injected_call_failure() {
        let gcp = FakeGcp::new().fail_call("storage.get_object", "permission denied");
        let err = gcp.get_object("b", "o").await.unwrap_err();
        assert!(matches!(err, CloudError::Api(m) if m == "permission denied"));
        assert_eq!(gcp.calls(), vec!["storage.get_object o"]);
    }
}
