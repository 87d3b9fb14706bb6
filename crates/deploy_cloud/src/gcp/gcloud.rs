//! Service contracts implemented on top of the `gcloud` CLI.
//!
//! Every call goes through a [`CommandRunner`], so the adapter can be tested
//! against a [`deploy_runner::MockRunner`]. Commands that accept `--async`
//! return an operation that is polled with the matching `describe` command;
//! the rest block until gcloud itself reports completion.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use deploy_runner::{CommandConfig, CommandRunner, ExecutionResult, RunConfig};
use serde_json::Value;
use tracing::{debug, info};

use super::types::*;
use super::{ArtifactRegistry, CloudBuild, CloudRun, ServiceUsage, SqlAdmin, Storage};
use crate::error::{CloudError, CloudResult};
use crate::poller::{OperationStatus, PendingOperation, RemoteOperation, ResolvedOperation};

type Interpret<T> = Box<dyn Fn(Option<Value>) -> CloudResult<OperationStatus<T>> + Send + Sync>;

/// Polls an asynchronous gcloud operation through its `describe` command.
///
/// The interpreter receives `None` when the described resource is gone.
struct CliOperation<T> {
    id: String,
    runner: Arc<dyn CommandRunner>,
    describe: CommandConfig,
    interpret: Interpret<T>,
}

#[async_trait]
impl<T: Send + 'static> RemoteOperation for CliOperation<T> {
    type Output = T;

    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&self) -> CloudResult<OperationStatus<T>> {
        let result = self
            .runner
            .run(&self.describe, &RunConfig::default(), None)
            .await?;
        if result.success() {
            let value: Value = serde_json::from_str(&result.stdout)?;
            (self.interpret)(Some(value))
        } else if is_not_found(&result) {
            (self.interpret)(None)
        } else {
            Err(CloudError::Api(result.diagnostics()))
        }
    }
}

fn is_not_found(result: &ExecutionResult) -> bool {
    let stderr = result.stderr.to_lowercase();
    ["not found", "not_found", "does not exist", "404"]
        .iter()
        .any(|marker| stderr.contains(marker))
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

/// Status of a Cloud SQL admin operation.
fn sql_operation_status(value: Option<Value>) -> CloudResult<OperationStatus<()>> {
    let Some(value) = value else {
        return Err(CloudError::NotFound("Cloud SQL operation".to_string()));
    };
    if let Some(message) = text(&value, "/error/errors/0/message") {
        return Ok(OperationStatus::Failed(message));
    }
    match value.get("status").and_then(Value::as_str) {
        Some("DONE") => Ok(OperationStatus::Succeeded(())),
        _ => Ok(OperationStatus::Pending),
    }
}

/// Status of a Cloud Build build.
fn build_status(value: Option<Value>) -> CloudResult<OperationStatus<BuiltImage>> {
    let Some(value) = value else {
        return Err(CloudError::NotFound("Cloud Build build".to_string()));
    };
    match value.get("status").and_then(Value::as_str) {
        Some("SUCCESS") => {
            let name = text(&value, "/results/images/0/name");
            let digest = text(&value, "/results/images/0/digest");
            match (name, digest) {
                (Some(name), Some(digest)) => Ok(OperationStatus::Succeeded(BuiltImage { name, digest })),
                _ => Ok(OperationStatus::Failed("build finished without pushing an image".to_string())),
            }
        }
        Some(status @ ("FAILURE" | "INTERNAL_ERROR" | "TIMEOUT" | "CANCELLED" | "EXPIRED")) => {
            let detail = text(&value, "/statusDetail").unwrap_or_else(|| status.to_string());
            Ok(OperationStatus::Failed(detail))
        }
        _ => Ok(OperationStatus::Pending),
    }
}

fn run_service(value: &Value) -> CloudResult<RunService> {
    let name = text(value, "/metadata/name")
        .ok_or_else(|| CloudError::Api("service description has no name".to_string()))?;
    Ok(RunService {
        name,
        uri: text(value, "/status/url"),
    })
}

/// Status of a Cloud Run rollout, read from the service's Ready condition.
fn rollout_status(value: Option<Value>) -> CloudResult<OperationStatus<RunService>> {
    let Some(value) = value else {
        return Ok(OperationStatus::Pending);
    };

    let generation = value.pointer("/metadata/generation").and_then(Value::as_i64);
    let observed = value.pointer("/status/observedGeneration").and_then(Value::as_i64);
    if generation.is_some() && observed < generation {
        return Ok(OperationStatus::Pending);
    }

    let ready = value
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        });

    match ready.and_then(|c| c.get("status")).and_then(Value::as_str) {
        Some("True") => Ok(OperationStatus::Succeeded(run_service(&value)?)),
        Some("False") => {
            let message = ready
                .and_then(|c| text(c, "/message"))
                .unwrap_or_else(|| "service failed to become ready".to_string());
            Ok(OperationStatus::Failed(message))
        }
        _ => Ok(OperationStatus::Pending),
    }
}

/// Deletion is complete once the resource can no longer be described.
fn gone(value: Option<Value>) -> CloudResult<OperationStatus<()>> {
    Ok(match value {
        None => OperationStatus::Succeeded(()),
        Some(_) => OperationStatus::Pending,
    })
}

/// `gcloud` backed implementation of every GCP service contract.
#[derive(Clone)]
pub struct GcloudCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl GcloudCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "gcloud".to_string(),
        }
    }

    /// Use a different gcloud executable.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command<I, S>(&self, args: I) -> CommandConfig
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandConfig::new(&self.program)
            .args(args)
            .env("CLOUDSDK_CORE_DISABLE_PROMPTS", "1")
    }

    /// Run a command that must succeed.
    async fn exec(&self, command: CommandConfig, what: &str) -> CloudResult<ExecutionResult> {
        debug!("gcloud: {}", command.display());
        let result = self
            .runner
            .run(&command, &RunConfig::default(), None)
            .await?;
        if result.success() {
            Ok(result)
        } else if is_not_found(&result) {
            Err(CloudError::NotFound(what.to_string()))
        } else {
            Err(CloudError::Api(format!("{}: {}", what, result.diagnostics())))
        }
    }

    /// Run a command with `--format=json` and parse its output.
    async fn json(&self, command: CommandConfig, what: &str) -> CloudResult<Value> {
        let result = self.exec(command.arg("--format=json"), what).await?;
        Ok(serde_json::from_str(&result.stdout)?)
    }

    fn operation<T, F>(&self, id: impl Into<String>, describe: CommandConfig, interpret: F) -> PendingOperation<T>
    where
        T: Send + 'static,
        F: Fn(Option<Value>) -> CloudResult<OperationStatus<T>> + Send + Sync + 'static,
    {
        Box::new(CliOperation {
            id: id.into(),
            runner: self.runner.clone(),
            describe: describe.arg("--format=json"),
            interpret: Box::new(interpret),
        })
    }

    fn sql_operation(&self, project_id: &str, started: &Value, what: &str) -> CloudResult<PendingOperation<()>> {
        let name = text(started, "/name")
            .ok_or_else(|| CloudError::Api(format!("{}: no operation name returned", what)))?;
        let describe = self.command(["sql", "operations", "describe", name.as_str(), "--project", project_id]);
        Ok(self.operation(name, describe, sql_operation_status))
    }

    fn describe_service(&self, project_id: &str, region: &str, service: &str) -> CommandConfig {
        self.command([
            "run", "services", "describe", service, "--region", region, "--project", project_id,
        ])
    }

    fn create_user_command(&self, project_id: &str, instance: &str, user: &str, password: &str) -> CommandConfig {
        self.command(["sql", "users", "create", user, "--instance", instance, "--password"])
            .secret_arg(password)
            .args(["--project", project_id])
    }

    fn deploy_command(&self, project_id: &str, region: &str, spec: &ServiceSpec, sql_flag: &str) -> CommandConfig {
        let mut command = self.command([
            "run",
            "deploy",
            spec.name.as_str(),
            "--image",
            spec.image.as_str(),
            "--region",
            region,
            "--project",
            project_id,
            "--async",
            "--quiet",
        ]);
        if !spec.env.is_empty() {
            let pairs: Vec<String> = spec
                .env
                .iter()
                .map(|e| format!("{}={}", e.name, e.value))
                .collect();
            command = command.arg("--set-env-vars").arg(format!("^##^{}", pairs.join("##")));
            for var in spec.env.iter().filter(|e| e.secret) {
                command = command.redact(var.value.as_str());
            }
        }
        if !spec.cloud_sql_instances.is_empty() {
            command = command.arg(sql_flag).arg(spec.cloud_sql_instances.join(","));
        }
        if let Some(cpu) = &spec.cpu {
            command = command.arg("--cpu").arg(cpu.as_str());
        }
        if let Some(memory) = &spec.memory {
            command = command.arg("--memory").arg(memory.as_str());
        }
        if let Some(max) = spec.max_instances {
            command = command.arg("--max-instances").arg(max.to_string());
        }
        command
    }

    async fn rollout(
        &self,
        project_id: &str,
        region: &str,
        spec: &ServiceSpec,
        sql_flag: &str,
    ) -> CloudResult<PendingOperation<RunService>> {
        let what = format!("Cloud Run service {}", spec.name);
        self.exec(self.deploy_command(project_id, region, spec, sql_flag), &what)
            .await?;
        Ok(self.operation(
            what,
            self.describe_service(project_id, region, &spec.name),
            rollout_status,
        ))
    }
}

impl std::fmt::Debug for GcloudCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcloudCli")
            .field("program", &self.program)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceUsage for GcloudCli {
    async fn enable_service(&self, project_id: &str, api: GcpApi) -> CloudResult<PendingOperation<()>> {
        let what = format!("enable {}", api);
        self.exec(
            self.command(["services", "enable", api.as_str(), "--project", project_id]),
            &what,
        )
        .await?;
        Ok(ResolvedOperation::succeeded(what, ()).boxed())
    }
}

#[async_trait]
impl SqlAdmin for GcloudCli {
    async fn get_instance(&self, project_id: &str, instance: &str) -> CloudResult<SqlInstance> {
        let value = self
            .json(
                self.command(["sql", "instances", "describe", instance, "--project", project_id]),
                &format!("Cloud SQL instance {}", instance),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn insert_instance(&self, project_id: &str, spec: &SqlInstanceSpec) -> CloudResult<PendingOperation<()>> {
        let what = format!("Cloud SQL instance {}", spec.name);
        info!("Creating {}", what);
        let mut command = self.command([
            "sql",
            "instances",
            "create",
            spec.name.as_str(),
            "--project",
            project_id,
            "--region",
            spec.region.as_str(),
            "--database-version",
            spec.database_version.as_str(),
            "--tier",
            spec.tier.as_str(),
            "--async",
        ]);
        command = command.arg(if spec.backups_enabled { "--backup" } else { "--no-backup" });
        if !spec.authorized_networks.is_empty() {
            command = command
                .arg("--authorized-networks")
                .arg(spec.authorized_networks.join(","));
        }
        let started = self.json(command, &what).await?;
        self.sql_operation(project_id, &started, &what)
    }

    async fn delete_instance(&self, project_id: &str, instance: &str) -> CloudResult<PendingOperation<()>> {
        let what = format!("Cloud SQL instance {}", instance);
        let started = self
            .json(
                self.command([
                    "sql", "instances", "delete", instance, "--project", project_id, "--async", "--quiet",
                ]),
                &what,
            )
            .await?;
        self.sql_operation(project_id, &started, &what)
    }

    async fn get_database(&self, project_id: &str, instance: &str, database: &str) -> CloudResult<SqlDatabase> {
        let value = self
            .json(
                self.command([
                    "sql", "databases", "describe", database, "--instance", instance, "--project", project_id,
                ]),
                &format!("Cloud SQL database {}", database),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn insert_database(&self, project_id: &str, instance: &str, database: &str) -> CloudResult<PendingOperation<()>> {
        let what = format!("Cloud SQL database {}", database);
        let started = self
            .json(
                self.command([
                    "sql", "databases", "create", database, "--instance", instance, "--project", project_id,
                    "--async",
                ]),
                &what,
            )
            .await?;
        self.sql_operation(project_id, &started, &what)
    }

    async fn get_user(&self, project_id: &str, instance: &str, user: &str) -> CloudResult<SqlUser> {
        let what = format!("Cloud SQL user {}", user);
        let value = self
            .json(
                self.command(["sql", "users", "list", "--instance", instance, "--project", project_id]),
                &what,
            )
            .await?;
        let users: Vec<SqlUser> = serde_json::from_value(value)?;
        users
            .into_iter()
            .find(|u| u.name == user)
            .ok_or(CloudError::NotFound(what))
    }

    async fn insert_user(
        &self,
        project_id: &str,
        instance: &str,
        user: &str,
        password: &str,
    ) -> CloudResult<PendingOperation<()>> {
        let what = format!("Cloud SQL user {}", user);
        self.exec(self.create_user_command(project_id, instance, user, password), &what)
            .await?;
        Ok(ResolvedOperation::succeeded(what, ()).boxed())
    }
}

#[async_trait]
impl CloudBuild for GcloudCli {
    async fn create_build(&self, project_id: &str, spec: &BuildSpec) -> CloudResult<PendingOperation<BuiltImage>> {
        let source = format!("gs://{}/{}", spec.source_bucket, spec.source_object);
        let what = format!("build of {}", spec.image);
        let started = self
            .json(
                self.command([
                    "builds",
                    "submit",
                    source.as_str(),
                    "--tag",
                    spec.image.as_str(),
                    "--project",
                    project_id,
                    "--async",
                ]),
                &what,
            )
            .await?;
        let id = text(&started, "/id")
            .ok_or_else(|| CloudError::Api(format!("{}: no build id returned", what)))?;
        info!("Cloud Build started: {}", id);
        let describe = self.command(["builds", "describe", id.as_str(), "--project", project_id]);
        Ok(self.operation(id, describe, build_status))
    }
}

#[async_trait]
impl Storage for GcloudCli {
    async fn upload_object(&self, bucket: &str, object: &str, source: &Path) -> CloudResult<StorageObject> {
        let url = format!("gs://{}/{}", bucket, object);
        self.exec(
            self.command(["storage".to_string(), "cp".to_string(), source.display().to_string(), url.clone()]),
            &url,
        )
        .await?;
        info!("Uploaded {}", url);
        Ok(StorageObject {
            bucket: bucket.to_string(),
            name: object.to_string(),
        })
    }

    async fn get_object(&self, bucket: &str, object: &str) -> CloudResult<StorageObject> {
        let url = format!("gs://{}/{}", bucket, object);
        self.json(self.command(["storage", "objects", "describe", url.as_str()]), &url)
            .await?;
        Ok(StorageObject {
            bucket: bucket.to_string(),
            name: object.to_string(),
        })
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> CloudResult<()> {
        let url = format!("gs://{}/{}", bucket, object);
        self.exec(self.command(["storage", "rm", url.as_str()]), &url).await?;
        Ok(())
    }
}

#[async_trait]
impl CloudRun for GcloudCli {
    async fn get_service(&self, project_id: &str, region: &str, service: &str) -> CloudResult<RunService> {
        let value = self
            .json(
                self.describe_service(project_id, region, service),
                &format!("Cloud Run service {}", service),
            )
            .await?;
        run_service(&value)
    }

    async fn create_service(
        &self,
        project_id: &str,
        region: &str,
        spec: &ServiceSpec,
    ) -> CloudResult<PendingOperation<RunService>> {
        self.rollout(project_id, region, spec, "--add-cloudsql-instances").await
    }

    async fn update_service(
        &self,
        project_id: &str,
        region: &str,
        spec: &ServiceSpec,
    ) -> CloudResult<PendingOperation<RunService>> {
        self.rollout(project_id, region, spec, "--set-cloudsql-instances").await
    }

    async fn delete_service(&self, project_id: &str, region: &str, service: &str) -> CloudResult<PendingOperation<()>> {
        let what = format!("Cloud Run service {}", service);
        self.exec(
            self.command([
                "run", "services", "delete", service, "--region", region, "--project", project_id, "--async",
                "--quiet",
            ]),
            &what,
        )
        .await?;
        Ok(self.operation(what, self.describe_service(project_id, region, service), gone))
    }

    async fn get_iam_policy(&self, project_id: &str, region: &str, service: &str) -> CloudResult<IamPolicy> {
        let value = self
            .json(
                self.command([
                    "run", "services", "get-iam-policy", service, "--region", region, "--project", project_id,
                ]),
                &format!("IAM policy of {}", service),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn set_iam_policy(
        &self,
        project_id: &str,
        region: &str,
        service: &str,
        policy: &IamPolicy,
    ) -> CloudResult<()> {
        let mut file = tempfile::Builder::new()
            .prefix("deploybot-policy-")
            .suffix(".json")
            .tempfile()?;
        file.write_all(serde_json::to_string(policy)?.as_bytes())?;
        file.flush()?;

        let path = file.path().display().to_string();
        self.exec(
            self.command([
                "run", "services", "set-iam-policy", service, path.as_str(), "--region", region, "--project",
                project_id, "--quiet",
            ]),
            &format!("IAM policy of {}", service),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for GcloudCli {
    async fn get_package(
        &self,
        project_id: &str,
        location: &str,
        repository: &str,
        package: &str,
    ) -> CloudResult<ArtifactPackage> {
        self.json(
            self.command([
                "artifacts", "packages", "describe", package, "--repository", repository, "--location", location,
                "--project", project_id,
            ]),
            &format!("package {}", package),
        )
        .await?;
        Ok(ArtifactPackage {
            name: package.to_string(),
        })
    }

    async fn delete_package(
        &self,
        project_id: &str,
        location: &str,
        repository: &str,
        package: &str,
    ) -> CloudResult<PendingOperation<()>> {
        let what = format!("package {}", package);
        self.exec(
            self.command([
                "artifacts", "packages", "delete", package, "--repository", repository, "--location", location,
                "--project", project_id, "--quiet",
            ]),
            &what,
        )
        .await?;
        Ok(ResolvedOperation::succeeded(what, ()).boxed())
    }
}
