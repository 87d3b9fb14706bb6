//! FastAPI application on Cloud Run backed by Cloud SQL for PostgreSQL.
//!
//! Deploy fans out two independent branches:
//!
//! - `database`: instance, then database, then user; yields the
//!   instance connection name
//! - `image`: source archive upload, then Cloud Build; yields the
//!   pushed image reference
//!
//! The Cloud Run service is assembled from both results and opened to
//! unauthenticated callers. Destroy removes the service, the SQL
//! instance, the source archive and the container package concurrently.

use std::path::PathBuf;

use async_trait::async_trait;
use deploy_cloud::gcp::{
    enable_apis, found, BuildSpec, GcpApi, IamBinding, ServiceSpec, SqlInstanceSpec,
};
use deploy_cloud::pack_to_temp;
use deploy_events::{EventKind, LifecycleEvent};
use futures::FutureExt;
use tracing::{info, warn};

use crate::error::{IacError, IacResult};
use crate::orchestrator::{Branch, ParallelOrchestrator};
use crate::outputs::Outputs;
use crate::recipe::{Recipe, RecipeContext};

const REQUIRED_APIS: [GcpApi; 5] = [
    GcpApi::CloudSql,
    GcpApi::CloudRun,
    GcpApi::CloudBuild,
    GcpApi::CloudStorage,
    GcpApi::ContainerRegistry,
];

const INVOKER_ROLE: &str = "roles/run.invoker";
const PUBLIC_MEMBER: &str = "allUsers";

/// Container images built into `gcr.io` land in this Artifact Registry repository.
const PACKAGE_LOCATION: &str = "us";
const PACKAGE_REPOSITORY: &str = "gcr.io";

/// Resolved recipe inputs.
#[derive(Debug, Clone)]
struct Settings {
    project_id: String,
    region: String,
    app_name: String,
    db_instance: String,
    database_name: String,
    db_user: String,
    db_password: String,
    bucket_name: String,
    image_tag: String,
    source_dir: PathBuf,
    cpu: String,
    memory: String,
    max_instances: u32,
}

impl Settings {
    fn from_context(ctx: &RecipeContext) -> IacResult<Self> {
        let source_dir = match ctx.variables.get("source_dir") {
            Some(_) => PathBuf::from(ctx.var("source_dir")?),
            // <stack>/native/<target> -> <stack>/app
            None => ctx.working_dir.join("..").join("..").join("app"),
        };
        let max_instances = ctx
            .var_or("cloud_run_max_instances", "10")
            .parse::<u32>()
            .map_err(|e| IacError::Configuration(format!("cloud_run_max_instances: {}", e)))?;

        Ok(Self {
            project_id: ctx.var("project_id")?,
            region: ctx.var("region")?,
            app_name: ctx.var("app_name")?,
            db_instance: ctx.var("db_instance")?,
            database_name: ctx.var("database_name")?,
            db_user: ctx.var("db_user")?,
            db_password: ctx.var("db_password")?,
            bucket_name: ctx.var("bucket_name")?,
            image_tag: ctx.var_or("image_tag", "latest"),
            source_dir,
            cpu: ctx.var_or("cloud_run_cpu", "1"),
            memory: ctx.var_or("cloud_run_memory", "512Mi"),
            max_instances,
        })
    }

    fn image(&self) -> String {
        format!("gcr.io/{}/{}:{}", self.project_id, self.app_name, self.image_tag)
    }

    fn source_object(&self) -> String {
        format!("{}.tar.gz", self.app_name)
    }
}

/// The `fastapi_postgres` recipe.
#[derive(Debug, Default)]
pub struct FastapiPostgres;

impl FastapiPostgres {
    pub fn new() -> Self {
        Self
    }
}

async fn ensure_database(ctx: RecipeContext, s: Settings) -> IacResult<String> {
    let sql = ctx.gcp.sql.clone();

    let instance = match found(sql.get_instance(&s.project_id, &s.db_instance).await)? {
        Some(existing) => {
            warn!("Cloud SQL instance {} already exists, reusing", s.db_instance);
            existing
        }
        None => {
            ctx.progress(&LifecycleEvent::resource(
                EventKind::ResourceCreating,
                "sql_instance",
                &s.db_instance,
            ));
            let spec = SqlInstanceSpec::postgres(&s.db_instance, &s.region);
            let operation = sql.insert_instance(&s.project_id, &spec).await?;
            ctx.poller.wait(operation.as_ref()).await?;
            ctx.progress(&LifecycleEvent::resource(
                EventKind::ResourceCreated,
                "sql_instance",
                &s.db_instance,
            ));
            sql.get_instance(&s.project_id, &s.db_instance).await?
        }
    };

    if found(sql.get_database(&s.project_id, &s.db_instance, &s.database_name).await)?.is_none() {
        ctx.progress(&LifecycleEvent::resource(
            EventKind::ResourceCreating,
            "sql_database",
            &s.database_name,
        ));
        let operation = sql
            .insert_database(&s.project_id, &s.db_instance, &s.database_name)
            .await?;
        ctx.poller.wait(operation.as_ref()).await?;
        ctx.progress(&LifecycleEvent::resource(
            EventKind::ResourceCreated,
            "sql_database",
            &s.database_name,
        ));
    }

    if found(sql.get_user(&s.project_id, &s.db_instance, &s.db_user).await)?.is_none() {
        ctx.progress(&LifecycleEvent::resource(
            EventKind::ResourceCreating,
            "sql_user",
            &s.db_user,
        ));
        let operation = sql
            .insert_user(&s.project_id, &s.db_instance, &s.db_user, &s.db_password)
            .await?;
        ctx.poller.wait(operation.as_ref()).await?;
        ctx.progress(&LifecycleEvent::resource(
            EventKind::ResourceCreated,
            "sql_user",
            &s.db_user,
        ));
    }

    Ok(instance.connection_name)
}

async fn build_image(ctx: RecipeContext, s: Settings) -> IacResult<String> {
    let object = s.source_object();

    ctx.progress(&LifecycleEvent::stack(format!(
        "Packaging {}",
        s.source_dir.display()
    )));
    let archive = pack_to_temp(&s.source_dir)?;
    ctx.gcp
        .storage
        .upload_object(&s.bucket_name, &object, archive.path())
        .await?;
    info!("Uploaded gs://{}/{}", s.bucket_name, object);

    let spec = BuildSpec {
        source_bucket: s.bucket_name.clone(),
        source_object: object,
        image: s.image(),
    };
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceCreating,
        "container_image",
        &spec.image,
    ));
    let operation = ctx.gcp.build.create_build(&s.project_id, &spec).await?;
    let built = ctx.poller.wait(operation.as_ref()).await?;
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceCreated,
        "container_image",
        &spec.image,
    ));

    Ok(built.reference())
}

async fn deploy_service(
    ctx: &RecipeContext,
    s: &Settings,
    connection_name: &str,
    image: &str,
) -> IacResult<String> {
    let run = ctx.gcp.run.clone();
    let spec = ServiceSpec::new(&s.app_name, image)
        .env("DB_USER", &s.db_user)
        .secret_env("DB_PASSWORD", &s.db_password)
        .env("DB_NAME", &s.database_name)
        .env("DB_CONNECTION_NAME", connection_name)
        .cloud_sql_instance(connection_name)
        .resources(&s.cpu, &s.memory)
        .max_instances(s.max_instances);

    let existing = found(run.get_service(&s.project_id, &s.region, &s.app_name).await)?;
    let operation = if existing.is_some() {
        ctx.progress(&LifecycleEvent::resource(
            EventKind::ResourceUpdating,
            "cloud_run_service",
            &s.app_name,
        ));
        run.update_service(&s.project_id, &s.region, &spec).await?
    } else {
        ctx.progress(&LifecycleEvent::resource(
            EventKind::ResourceCreating,
            "cloud_run_service",
            &s.app_name,
        ));
        run.create_service(&s.project_id, &s.region, &spec).await?
    };
    let service = ctx.poller.wait(operation.as_ref()).await?;
    let done = if existing.is_some() {
        EventKind::ResourceUpdated
    } else {
        EventKind::ResourceCreated
    };
    ctx.progress(&LifecycleEvent::resource(done, "cloud_run_service", &s.app_name));

    let mut policy = run.get_iam_policy(&s.project_id, &s.region, &s.app_name).await?;
    let is_public = policy
        .bindings
        .iter()
        .any(|b| b.role == INVOKER_ROLE && b.members.iter().any(|m| m == PUBLIC_MEMBER));
    if is_public {
        info!("{} is already public", s.app_name);
    } else {
        match policy.bindings.iter_mut().find(|b| b.role == INVOKER_ROLE) {
            Some(binding) => binding.members.push(PUBLIC_MEMBER.to_string()),
            None => policy
                .bindings
                .push(IamBinding::new(INVOKER_ROLE, [PUBLIC_MEMBER])),
        }
        run.set_iam_policy(&s.project_id, &s.region, &s.app_name, &policy)
            .await?;
        info!("Granted {} to {} on {}", INVOKER_ROLE, PUBLIC_MEMBER, s.app_name);
    }

    service.uri.ok_or_else(|| {
        IacError::operation(
            "deploy cloud run service",
            format!("service {} reported no URL", s.app_name),
        )
    })
}

async fn delete_service(ctx: RecipeContext, s: Settings) -> IacResult<()> {
    let run = ctx.gcp.run.clone();
    if found(run.get_service(&s.project_id, &s.region, &s.app_name).await)?.is_none() {
        info!("Cloud Run service {} already gone", s.app_name);
        return Ok(());
    }
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroying,
        "cloud_run_service",
        &s.app_name,
    ));
    let operation = run.delete_service(&s.project_id, &s.region, &s.app_name).await?;
    ctx.poller.wait(operation.as_ref()).await?;
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroyed,
        "cloud_run_service",
        &s.app_name,
    ));
    Ok(())
}

async fn delete_instance(ctx: RecipeContext, s: Settings) -> IacResult<()> {
    let sql = ctx.gcp.sql.clone();
    if found(sql.get_instance(&s.project_id, &s.db_instance).await)?.is_none() {
        info!("Cloud SQL instance {} already gone", s.db_instance);
        return Ok(());
    }
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroying,
        "sql_instance",
        &s.db_instance,
    ));
    let operation = sql.delete_instance(&s.project_id, &s.db_instance).await?;
    ctx.poller.wait(operation.as_ref()).await?;
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroyed,
        "sql_instance",
        &s.db_instance,
    ));
    Ok(())
}

async fn delete_source_archive(ctx: RecipeContext, s: Settings) -> IacResult<()> {
    let storage = ctx.gcp.storage.clone();
    let object = s.source_object();
    if found(storage.get_object(&s.bucket_name, &object).await)?.is_none() {
        info!("gs://{}/{} already gone", s.bucket_name, object);
        return Ok(());
    }
    storage.delete_object(&s.bucket_name, &object).await?;
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroyed,
        "storage_object",
        &object,
    ));
    Ok(())
}

async fn delete_package(ctx: RecipeContext, s: Settings) -> IacResult<()> {
    let artifacts = ctx.gcp.artifacts.clone();
    let existing = found(
        artifacts
            .get_package(&s.project_id, PACKAGE_LOCATION, PACKAGE_REPOSITORY, &s.app_name)
            .await,
    )?;
    if existing.is_none() {
        info!("Container package {} already gone", s.app_name);
        return Ok(());
    }
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroying,
        "container_package",
        &s.app_name,
    ));
    let operation = artifacts
        .delete_package(&s.project_id, PACKAGE_LOCATION, PACKAGE_REPOSITORY, &s.app_name)
        .await?;
    ctx.poller.wait(operation.as_ref()).await?;
    ctx.progress(&LifecycleEvent::resource(
        EventKind::ResourceDestroyed,
        "container_package",
        &s.app_name,
    ));
    Ok(())
}

#[async_trait]
impl Recipe for FastapiPostgres {
    fn name(&self) -> &str {
        "fastapi_postgres"
    }

    async fn deploy(&self, ctx: &RecipeContext) -> IacResult<Outputs> {
        let settings = Settings::from_context(ctx)?;

        ctx.progress(&LifecycleEvent::stack(format!(
            "Enabling {} APIs in {}",
            REQUIRED_APIS.len(),
            settings.project_id
        )));
        enable_apis(
            ctx.gcp.service_usage.as_ref(),
            &ctx.poller,
            &settings.project_id,
            &REQUIRED_APIS,
        )
        .await?;

        let branches: Vec<(String, Branch<String>)> = vec![
            (
                "database".to_string(),
                ensure_database(ctx.clone(), settings.clone()).boxed(),
            ),
            (
                "image".to_string(),
                build_image(ctx.clone(), settings.clone()).boxed(),
            ),
        ];
        let mut results = ParallelOrchestrator::new().provision(branches).await?;

        let (Some(connection_name), Some(image)) = (results.remove("database"), results.remove("image")) else {
            return Err(IacError::operation(
                "fastapi_postgres deploy",
                "a provisioning branch produced no result",
            ));
        };

        let app_url = deploy_service(ctx, &settings, &connection_name, &image).await?;
        ctx.progress(&LifecycleEvent::stack(format!("Service available at {}", app_url)));

        let mut outputs = Outputs::new();
        outputs.insert("app_url".to_string(), app_url);
        Ok(outputs)
    }

    async fn destroy(&self, ctx: &RecipeContext) -> IacResult<()> {
        let settings = Settings::from_context(ctx)?;

        let branches: Vec<(String, Branch<()>)> = vec![
            (
                "service".to_string(),
                delete_service(ctx.clone(), settings.clone()).boxed(),
            ),
            (
                "sql_instance".to_string(),
                delete_instance(ctx.clone(), settings.clone()).boxed(),
            ),
            (
                "source_archive".to_string(),
                delete_source_archive(ctx.clone(), settings.clone()).boxed(),
            ),
            (
                "container_package".to_string(),
                delete_package(ctx.clone(), settings).boxed(),
            ),
        ];
        ParallelOrchestrator::new().teardown(branches).await
    }

    fn plan(&self, ctx: &RecipeContext) -> IacResult<String> {
        let s = Settings::from_context(ctx)?;

        let apis: Vec<&str> = REQUIRED_APIS.iter().map(GcpApi::as_str).collect();
        let lines = [
            format!("Plan for fastapi_postgres in project {} ({})", s.project_id, s.region),
            String::new(),
            format!("+ apis: {}", apis.join(", ")),
            format!("+ sql_instance.{} (POSTGRES_14, db-f1-micro, backups enabled)", s.db_instance),
            format!("  + sql_database.{}", s.database_name),
            format!("  + sql_user.{}", s.db_user),
            format!("+ storage_object.gs://{}/{}", s.bucket_name, s.source_object()),
            format!("+ container_image.{}", s.image()),
            format!("+ cloud_run_service.{}", s.app_name),
            format!("    cpu: {}  memory: {}  max_instances: {}", s.cpu, s.memory, s.max_instances),
            format!("    env DB_USER={}", s.db_user),
            "    env DB_PASSWORD=[HIDDEN]".to_string(),
            format!("    env DB_NAME={}", s.database_name),
            format!("    env DB_CONNECTION_NAME={}:{}:{}", s.project_id, s.region, s.db_instance),
            format!("    volume /cloudsql -> {}", s.db_instance),
            format!("+ iam.{} {} on {}", INVOKER_ROLE, PUBLIC_MEMBER, s.app_name),
        ];
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variables;
    use deploy_cloud::gcp::{FakeGcp, GcpServices};
    use deploy_cloud::Poller;
    use serde_json::json;
    use std::sync::Arc;

    fn variables() -> Variables {
        let mut v = Variables::new();
        for (key, value) in [
            ("project_id", "acme"),
            ("region", "us-central1"),
            ("app_name", "shop"),
            ("db_instance", "shop-db"),
            ("database_name", "shop"),
            ("db_user", "app"),
            ("db_password", "s3cret"),
            ("bucket_name", "acme-src"),
        ] {
            v.insert(key.to_string(), json!(value));
        }
        v
    }

    #[test]
    fn test_plan_hides_password() {
        let ctx = RecipeContext::new(
            "/stacks/fastapi_postgres/native/gcp",
            variables(),
            GcpServices::uniform(Arc::new(FakeGcp::new())),
            Poller::default(),
        );

        let plan = FastapiPostgres::new().plan(&ctx).unwrap();
        assert!(plan.contains("DB_PASSWORD=[HIDDEN]"));
        assert!(!plan.contains("s3cret"));
        assert!(plan.contains("gcr.io/acme/shop:latest"));
        assert!(plan.contains("sqladmin.googleapis.com"));
    }

    #[test]
    fn test_missing_variable_is_configuration_error() {
        let mut vars = variables();
        vars.remove("bucket_name");
        let ctx = RecipeContext::new(
            "/tmp",
            vars,
            GcpServices::uniform(Arc::new(FakeGcp::new())),
            Poller::default(),
        );

        let err = FastapiPostgres::new().plan(&ctx).unwrap_err();
        assert!(matches!(err, IacError::Configuration(m) if m.contains("bucket_name")));
    }

    #[test]
    fn test_default_source_dir_is_stack_app() {
        let ctx = RecipeContext::new(
            "/stacks/fastapi_postgres/native/gcp",
            variables(),
            GcpServices::uniform(Arc::new(FakeGcp::new())),
            Poller::default(),
        );
        let settings = Settings::from_context(&ctx).unwrap();
        assert_eq!(
            settings.source_dir,
            PathBuf::from("/stacks/fastapi_postgres/native/gcp/../../app")
        );
        assert_eq!(settings.source_object(), "shop.tar.gz");
        assert_eq!((settings.cpu.as_str(), settings.memory.as_str()), ("1", "512Mi"));
        assert_eq!(settings.max_instances, 10);
    }

    #[test]
    fn test_invalid_max_instances_is_configuration_error() {
        let mut vars = variables();
        vars.insert("cloud_run_max_instances".to_string(), json!("many"));
        let ctx = RecipeContext::new(
            "/tmp",
            vars,
            GcpServices::uniform(Arc::new(FakeGcp::new())),
            Poller::default(),
        );

        let err = Settings::from_context(&ctx).unwrap_err();
        assert!(matches!(err, IacError::Configuration(m) if m.contains("cloud_run_max_instances")));
    }
}
