//! Tests for container provisioning against the in-memory control plane.

use super::*;
use crate::provision_spec::{ExposedPort, ImageSource};
use crate::testing::FakeControlPlane;
use crate::ErrorKind;
use std::time::Duration;

fn provisioner(fake: &Arc<FakeControlPlane>) -> ContainerProvisioner {
    let runtime = RuntimeHandle::new(fake.clone());
    ContainerProvisioner::new(&runtime, "provisioner", "127.0.0.1").with_workflow_context("local")
}

fn mysql_spec() -> ProvisionSpec {
    ProvisionSpec::new("mysql", ImageSource::pull("mysql", "8.0"))
        .env("MYSQL_DATABASE", "sample_db")
        .port(ExposedPort::tcp(3306))
        .auto_remove(true)
        .expire_after(Duration::from_secs(60))
}

#[tokio::test]
async fn test_start_returns_mapped_ports() {
    let fake = Arc::new(FakeControlPlane::new());

    let (container, cleanup) = provisioner(&fake)
        .start(mysql_spec())
        .await
        .expect("start should succeed");

    assert!(container.name().starts_with("provisioner-mysql_"));
    let port = container.host_port("3306/tcp").expect("port should be mapped");
    assert_eq!(container.host_port("3306"), Some(port));
    assert_eq!(
        container.host_address("3306"),
        Some(format!("127.0.0.1:{}", port))
    );
    assert_eq!(container.host_port("8000"), None);

    cleanup.release().await.expect("release should succeed");
}

#[tokio::test]
async fn test_start_labels_container_and_sets_expiration() {
    let fake = Arc::new(FakeControlPlane::new());

    let (_container, cleanup) = provisioner(&fake)
        .start(mysql_spec())
        .await
        .expect("start should succeed");

    let created = &fake.containers()[0];
    assert_eq!(created.labels.get(LABEL_MANAGED).map(String::as_str), Some("true"));
    assert_eq!(created.labels.get(LABEL_KIND).map(String::as_str), Some("mysql"));
    assert_eq!(created.labels.get(LABEL_CONTEXT).map(String::as_str), Some("local"));
    let expires_at: i64 = created
        .labels
        .get(LABEL_EXPIRES_AT)
        .expect("expiration label should be set")
        .parse()
        .expect("expiration label should be a timestamp");
    assert!(expires_at > Utc::now().timestamp());
    assert_eq!(created.expiration, Some(Duration::from_secs(60)));
    assert!(created.auto_remove);

    cleanup.release().await.expect("release should succeed");
}

#[tokio::test]
async fn test_no_expiration_skips_expire_call() {
    let fake = Arc::new(FakeControlPlane::new());
    let spec = ProvisionSpec::new("cache", ImageSource::pull("redis", "7")).port(ExposedPort::tcp(6379));

    let (_container, cleanup) = provisioner(&fake)
        .start(spec)
        .await
        .expect("start should succeed");

    assert!(!fake.calls().contains(&"expire".to_string()));
    assert!(!fake.containers()[0].labels.contains_key(LABEL_EXPIRES_AT));
    cleanup.release().await.expect("release should succeed");
}

#[tokio::test]
async fn test_release_leaves_no_container() {
    let fake = Arc::new(FakeControlPlane::new());

    let (container, cleanup) = provisioner(&fake)
        .start(mysql_spec())
        .await
        .expect("start should succeed");
    cleanup.release().await.expect("release should succeed");

    assert!(!fake.exists(container.id()).await.expect("exists should answer"));
    assert_eq!(fake.container_count(), 0);
}

#[tokio::test]
async fn test_image_failure_creates_nothing() {
    let fake = Arc::new(FakeControlPlane::new().failing_prepare());

    let err = provisioner(&fake).start(mysql_spec()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Start);
    assert!(err.to_string().contains("COPY failed"));
    assert_eq!(fake.container_count(), 0);
}

#[tokio::test]
async fn test_port_conflict_rolls_back_second_container() {
    let fake = Arc::new(FakeControlPlane::new());
    let spec = || {
        ProvisionSpec::new("mysql", ImageSource::pull("mysql", "8.0"))
            .port(ExposedPort::tcp(3306).on_host_port(33306))
    };
    let provisioner = provisioner(&fake);

    let (first, cleanup) = provisioner.start(spec()).await.expect("first start should succeed");
    let err = provisioner.start(spec()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Start);
    assert!(err.to_string().contains("port is already allocated"));
    assert_eq!(fake.container_count(), 1);
    assert!(fake.exists(first.id()).await.expect("exists should answer"));

    cleanup.release().await.expect("release should succeed");
}

#[tokio::test]
async fn test_expire_failure_purges_container() {
    let fake = Arc::new(FakeControlPlane::new().failing_expire());

    let err = provisioner(&fake).start(mysql_spec()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Start);
    assert_eq!(fake.container_count(), 0);
    assert_eq!(fake.calls().last().map(String::as_str), Some("purge"));
}

#[tokio::test]
async fn test_failed_rollback_reports_both_errors() {
    let fake = Arc::new(FakeControlPlane::new().failing_expire().failing_purge());

    let err = provisioner(&fake).start(mysql_spec()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Aggregate);
    assert!(err.contains(ErrorKind::Start));
    assert!(err.contains(ErrorKind::Cleanup));
}
