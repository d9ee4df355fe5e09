//! Tests for the provisioning context.

use super::*;
use crate::provision_spec::{ExposedPort, ImageSource, ProvisionSpec};
use crate::testing::FakeControlPlane;
use crate::ErrorKind;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_runtime_is_connected_once() {
    let fake = Arc::new(FakeControlPlane::new());
    let context = ProvisioningContext::new(ProvisionerConfig::default())
        .expect("context should build")
        .with_runtime(RuntimeHandle::new(fake.clone()));

    context.runtime().await.expect("first call connects");
    context.runtime().await.expect("second call reuses");

    assert_eq!(fake.ping_count(), 1);
}

#[tokio::test]
async fn test_failed_connection_is_retried_on_next_call() {
    let fake = Arc::new(FakeControlPlane::new().unreachable());
    let context = ProvisioningContext::new(ProvisionerConfig::default())
        .expect("context should build")
        .with_runtime(RuntimeHandle::new(fake.clone()));

    let err = context.runtime().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(context.runtime().await.is_err());

    assert_eq!(fake.ping_count(), 2);
}

#[tokio::test]
async fn test_provisioner_uses_configured_prefix() {
    let fake = Arc::new(FakeControlPlane::new());
    let config = ProvisionerConfig {
        container_prefix: "ci".to_string(),
        ..ProvisionerConfig::default()
    };
    let context = ProvisioningContext::new(config)
        .expect("context should build")
        .with_runtime(RuntimeHandle::new(fake.clone()));

    let provisioner = context.provisioner().await.expect("provisioner should build");
    let spec = ProvisionSpec::new("mysql", ImageSource::pull("mysql", "8.0"))
        .port(ExposedPort::tcp(3306));
    let (container, cleanup) = provisioner.start(spec).await.expect("start should succeed");

    assert!(container.name().starts_with("ci-mysql_"));
    assert_eq!(container.host(), "127.0.0.1");
    cleanup.release().await.expect("release should succeed");
}

#[test]
fn test_asset_root_override() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    std::fs::write(temp_dir.path().join("schema.sql"), "-- schema").expect("write schema");
    let nested = temp_dir.path().join("crates").join("app");
    std::fs::create_dir_all(&nested).expect("create nested dirs");

    let context = ProvisioningContext::new(ProvisionerConfig::default())
        .expect("context should build")
        .with_asset_root(&nested);

    let schema = context.assets().resolve("schema.sql").expect("schema should resolve");
    assert_eq!(schema.path(), temp_dir.path().join("schema.sql"));
}
