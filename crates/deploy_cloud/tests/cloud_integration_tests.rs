//! Integration tests driving the fake cloud through the poller.

use std::sync::Arc;
use std::time::Duration;

use deploy_cloud::gcp::{
    enable_apis, found, BuildSpec, CloudBuild, CloudRun, FakeGcp, GcpApi, GcpServices, IamBinding,
    ServiceSpec, SqlAdmin, Storage,
};
use deploy_cloud::{pack_to_temp, CloudError, PollConfig, Poller};
use tempfile::TempDir;

fn poller() -> Poller {
    Poller::new(PollConfig::default().interval(Duration::from_millis(1)))
}

#[tokio::test]
async fn test_services_bundle_shares_one_backend() {
    let fake = Arc::new(FakeGcp::new().with_pending_polls(3));
    let services = GcpServices::uniform(fake.clone());

    enable_apis(
        services.service_usage.as_ref(),
        &poller(),
        "proj",
        &[GcpApi::CloudRun, GcpApi::CloudBuild],
    )
    .await
    .unwrap();

    assert_eq!(fake.enabled_apis(), vec![GcpApi::CloudRun, GcpApi::CloudBuild]);
}

#[tokio::test]
async fn test_upload_then_build_produces_image() {
    let fake = FakeGcp::new();
    let src = TempDir::new().unwrap();
    std::fs::write(src.path().join("Dockerfile"), "FROM scratch\n").unwrap();

    let archive = pack_to_temp(src.path()).unwrap();
    fake.upload_object("sources", "app.tar.gz", archive.path())
        .await
        .unwrap();

    let spec = BuildSpec {
        source_bucket: "sources".into(),
        source_object: "app.tar.gz".into(),
        image: "gcr.io/proj/app:v1".into(),
    };
    let op = fake.create_build("proj", &spec).await.unwrap();
    let image = poller().wait(op.as_ref()).await.unwrap();

    assert!(image.reference().starts_with("gcr.io/proj/app:v1@sha256:"));
}

#[tokio::test]
async fn test_build_without_source_is_not_found() {
    let fake = FakeGcp::new();
    let spec = BuildSpec {
        source_bucket: "sources".into(),
        source_object: "missing.tar.gz".into(),
        image: "gcr.io/proj/app:v1".into(),
    };
    let err = fake.create_build("proj", &spec).await.err().unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_service_create_then_update_and_policy() {
    let fake = FakeGcp::new();
    assert_eq!(found(fake.get_service("p", "r", "web").await).unwrap(), None);

    let spec = ServiceSpec::new("web", "img@sha256:1").env("A", "1");
    let op = fake.create_service("p", "us-east1", &spec).await.unwrap();
    let service = poller().wait(op.as_ref()).await.unwrap();
    assert_eq!(service.uri.as_deref(), Some("https://web-fake-us-east1.a.run.app"));

    let err = fake.create_service("p", "us-east1", &spec).await.err().unwrap();
    assert!(matches!(err, CloudError::Api(_)));

    let spec = spec.env("B", "2");
    let op = fake.update_service("p", "us-east1", &spec).await.unwrap();
    poller().wait(op.as_ref()).await.unwrap();
    assert_eq!(fake.service_spec("web").unwrap().env.len(), 2);

    let mut policy = fake.get_iam_policy("p", "us-east1", "web").await.unwrap();
    let binding = IamBinding::new("roles/run.invoker", ["allUsers"]);
    assert!(!policy.has_binding(&binding));
    policy.bindings.push(binding.clone());
    fake.set_iam_policy("p", "us-east1", "web", &policy).await.unwrap();
    assert!(fake.policy("web").unwrap().has_binding(&binding));
}

#[tokio::test]
async fn test_database_and_user_are_scoped_to_instance() {
    let fake = FakeGcp::new().with_instance("db", "p:r:db");

    let op = fake.insert_database("p", "db", "app").await.unwrap();
    poller().wait(op.as_ref()).await.unwrap();
    let op = fake.insert_user("p", "db", "app_user", "secret").await.unwrap();
    poller().wait(op.as_ref()).await.unwrap();

    assert!(fake.get_database("p", "db", "app").await.is_ok());
    assert!(fake.get_user("p", "db", "app_user").await.is_ok());
    assert!(fake
        .get_user("p", "other", "app_user")
        .await
        .unwrap_err()
        .is_not_found());
}
