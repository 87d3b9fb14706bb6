//! End-to-end runs of the built-in recipe against the in-memory cloud.

use std::sync::Arc;
use std::time::Duration;

use deploy_cloud::gcp::{FakeGcp, GcpApi, GcpServices, IamBinding};
use deploy_cloud::{CloudError, PollConfig, Poller};
use deploy_iac::recipes::FastapiPostgres;
use deploy_iac::{IacError, ProgressSink, Recipe, RecipeContext, Variables};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

fn poller() -> Poller {
    Poller::new(PollConfig::default().interval(Duration::from_millis(1)))
}

/// A stack laid out as `<stack>/native/gcp` with an `app/` source dir.
fn stack_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let native = dir.path().join("native").join("gcp");
    let app = dir.path().join("app");
    std::fs::create_dir_all(&native).unwrap();
    std::fs::create_dir_all(&app).unwrap();
    std::fs::write(native.join("recipe.yaml"), "recipe: fastapi_postgres\n").unwrap();
    std::fs::write(app.join("main.py"), "from fastapi import FastAPI\napp = FastAPI()\n").unwrap();
    std::fs::write(app.join("Dockerfile"), "FROM python:3.11-slim\n").unwrap();
    dir
}

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
        ("image_tag", "v1"),
    ] {
        v.insert(key.to_string(), json!(value));
    }
    v
}

fn context(stack: &TempDir, gcp: &FakeGcp) -> RecipeContext {
    RecipeContext::new(
        stack.path().join("native").join("gcp"),
        variables(),
        GcpServices::uniform(Arc::new(gcp.clone())),
        poller(),
    )
}

#[tokio::test]
async fn test_deploy_creates_every_resource() {
    let stack = stack_dir();
    let gcp = FakeGcp::new();

    let outputs = FastapiPostgres::new()
        .deploy(&context(&stack, &gcp))
        .await
        .unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs["app_url"], "https://shop-fake-us-central1.a.run.app");

    assert_eq!(gcp.enabled_apis().len(), 5);
    assert!(gcp.enabled_apis().contains(&GcpApi::ContainerRegistry));
    assert!(gcp.has_instance("shop-db"));
    assert!(gcp.has_database("shop-db", "shop"));
    assert!(gcp.has_user("shop-db", "app"));
    assert!(gcp.has_object("acme-src", "shop.tar.gz"));

    let spec = gcp.service_spec("shop").unwrap();
    assert!(spec.image.starts_with("gcr.io/acme/shop:v1@sha256:"));
    assert_eq!(spec.cloud_sql_instances, vec!["acme:us-central1:shop-db"]);
    let env: Vec<(&str, &str)> = spec
        .env
        .iter()
        .map(|e| (e.name.as_str(), e.value.as_str()))
        .collect();
    assert!(env.contains(&("DB_USER", "app")));
    assert!(env.contains(&("DB_PASSWORD", "s3cret")));
    assert!(env.contains(&("DB_NAME", "shop")));
    assert!(env.contains(&("DB_CONNECTION_NAME", "acme:us-central1:shop-db")));
    assert!(spec.env.iter().any(|e| e.name == "DB_PASSWORD" && e.secret));
    assert_eq!(spec.cpu.as_deref(), Some("1"));
    assert_eq!(spec.memory.as_deref(), Some("512Mi"));
    assert_eq!(spec.max_instances, Some(10));

    let policy = gcp.policy("shop").unwrap();
    assert!(policy.has_binding(&IamBinding::new("roles/run.invoker", ["allUsers"])));
}

#[tokio::test]
async fn test_redeploy_reuses_existing_resources() {
    let stack = stack_dir();
    let gcp = FakeGcp::new();
    let recipe = FastapiPostgres::new();

    let first = recipe.deploy(&context(&stack, &gcp)).await.unwrap();
    let second = recipe.deploy(&context(&stack, &gcp)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(gcp.calls_to("sql.insert_instance").len(), 1);
    assert_eq!(gcp.calls_to("sql.insert_database").len(), 1);
    assert_eq!(gcp.calls_to("sql.insert_user").len(), 1);
    assert_eq!(gcp.calls_to("run.create_service").len(), 1);
    assert_eq!(gcp.calls_to("run.update_service").len(), 1);
    // the public binding already exists on the second run
    assert_eq!(gcp.calls_to("run.set_iam_policy").len(), 1);
}

#[tokio::test]
async fn test_deploy_runs_branches_concurrently() {
    let stack = stack_dir();
    let gcp = FakeGcp::new().with_latency(Duration::from_millis(20));

    FastapiPostgres::new()
        .deploy(&context(&stack, &gcp))
        .await
        .unwrap();

    assert!(gcp.peak_concurrency() >= 2);
}

#[tokio::test]
async fn test_failed_branch_skips_assembly() {
    let stack = stack_dir();
    let gcp = FakeGcp::new().fail_operation("build.create_build", "step 0 failed: docker build");

    let err = FastapiPostgres::new()
        .deploy(&context(&stack, &gcp))
        .await
        .unwrap_err();

    match err {
        IacError::Cloud(CloudError::OperationFailed { message, .. }) => {
            assert!(message.contains("docker build"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // the database branch still ran to completion
    assert!(gcp.has_user("shop-db", "app"));
    assert!(gcp.calls_to("run.create_service").is_empty());
    assert!(gcp.calls_to("run.update_service").is_empty());
}

#[tokio::test]
async fn test_missing_source_dir_fails_image_branch() {
    let stack = stack_dir();
    std::fs::remove_dir_all(stack.path().join("app")).unwrap();
    let gcp = FakeGcp::new();

    let err = FastapiPostgres::new()
        .deploy(&context(&stack, &gcp))
        .await
        .unwrap_err();

    assert!(matches!(err, IacError::Cloud(CloudError::NotFound(_))));
    assert!(!gcp.has_service("shop"));
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let stack = stack_dir();
    let gcp = FakeGcp::new().with_package("us", "gcr.io", "shop");
    let recipe = FastapiPostgres::new();

    recipe.deploy(&context(&stack, &gcp)).await.unwrap();
    recipe.destroy(&context(&stack, &gcp)).await.unwrap();

    assert!(!gcp.has_service("shop"));
    assert!(!gcp.has_instance("shop-db"));
    assert!(!gcp.has_object("acme-src", "shop.tar.gz"));
    assert!(!gcp.has_package("us", "gcr.io", "shop"));

    recipe.destroy(&context(&stack, &gcp)).await.unwrap();
    assert_eq!(gcp.calls_to("run.delete_service").len(), 1);
    assert_eq!(gcp.calls_to("sql.delete_instance").len(), 1);
    assert_eq!(gcp.calls_to("storage.delete_object").len(), 1);
    assert_eq!(gcp.calls_to("artifacts.delete_package").len(), 1);
}

#[tokio::test]
async fn test_destroy_reports_every_failed_branch() {
    let stack = stack_dir();
    let gcp = FakeGcp::new()
        .with_service("shop", "https://shop.run.app")
        .with_instance("shop-db", "acme:us-central1:shop-db")
        .with_object("acme-src", "shop.tar.gz")
        .with_package("us", "gcr.io", "shop")
        .fail_call("run.delete_service", "permission denied")
        .fail_operation("artifacts.delete_package", "package is locked");

    let err = FastapiPostgres::new()
        .destroy(&context(&stack, &gcp))
        .await
        .unwrap_err();

    match err {
        IacError::Teardown(failures) => {
            assert_eq!(failures.len(), 2);
            let mut branches = failures.branches();
            branches.sort();
            assert_eq!(branches, vec!["container_package", "service"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!gcp.has_instance("shop-db"));
    assert!(!gcp.has_object("acme-src", "shop.tar.gz"));
    assert!(gcp.has_service("shop"));
}

#[tokio::test]
async fn test_progress_is_streamed_in_order() {
    let stack = stack_dir();
    let gcp = FakeGcp::new();
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let sink: ProgressSink = Arc::new(move |line: &str| captured.lock().push(line.to_string()));

    let ctx = context(&stack, &gcp).with_sink(Some(sink));
    FastapiPostgres::new().deploy(&ctx).await.unwrap();

    let lines = lines.lock();
    let position = |needle: &str| lines.iter().position(|l| l.contains(needle));
    let creating_db = position("Creating shop-db").unwrap();
    let created_db = position("Created shop-db").unwrap();
    let service = position("Creating shop...").unwrap();
    assert!(creating_db < created_db);
    assert!(created_db < service);
    assert!(lines.last().unwrap().contains("https://shop-fake-us-central1.a.run.app"));
}
