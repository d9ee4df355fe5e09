//! Tests for the MySQL dependency.

use super::*;
use provisioner::testing::FakeControlPlane;
use provisioner::{ErrorKind, ProvisionerConfig, RuntimeHandle};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn fixture_root(with_schema: bool) -> TempDir {
    let root = TempDir::new().expect("Failed to create temp directory");
    if with_schema {
        fs::write(root.path().join("schema.sql"), "CREATE TABLE users (id INT);")
            .expect("write schema");
    }
    let conf_dir = root.path().join("docker").join("mysql").join("conf.d");
    fs::create_dir_all(&conf_dir).expect("create conf.d");
    fs::write(conf_dir.join("my_custom.cnf"), "[mysqld]\n").expect("write cnf");
    root
}

fn fast_config() -> ProvisionerConfig {
    ProvisionerConfig {
        ready_timeout: Duration::from_secs(1),
        ready_initial_interval: Duration::from_millis(100),
        ready_max_interval: Duration::from_millis(200),
        ..ProvisionerConfig::default()
    }
}

fn context(fake: &Arc<FakeControlPlane>, root: &TempDir) -> ProvisioningContext {
    ProvisioningContext::new(fast_config())
        .expect("context should build")
        .with_runtime(RuntimeHandle::new(fake.clone()))
        .with_asset_root(root.path())
}

#[test]
fn test_default_settings() {
    let settings = MySqlSettings::default();

    assert_eq!(settings.repository, "mysql");
    assert_eq!(settings.tag, "8.0");
    assert_eq!(settings.database, "sample_db");
    assert_eq!(settings.user, "user");
}

#[test]
fn test_spec_describes_mysql_container() {
    let spec = MySqlSettings::default().spec(
        Path::new("/work/schema.sql"),
        Path::new("/work/docker/mysql/conf.d/my_custom.cnf"),
    );

    assert_eq!(spec.kind, "mysql");
    assert_eq!(spec.image.image_name(), "mysql:8.0");
    assert_eq!(
        spec.env_list(),
        vec![
            "MYSQL_DATABASE=sample_db",
            "MYSQL_PASSWORD=password",
            "MYSQL_ROOT_PASSWORD=password",
            "MYSQL_USER=user",
        ]
    );
    assert_eq!(
        spec.binds(),
        vec![
            "/work/schema.sql:/docker-entrypoint-initdb.d/00_schema.sql",
            "/work/docker/mysql/conf.d/my_custom.cnf:/etc/mysql/conf.d/my.cnf:ro",
        ]
    );
    assert_eq!(spec.ports, vec![ExposedPort::tcp(3306)]);
    assert!(spec.auto_remove);
    assert_eq!(spec.restart_policy, RestartPolicy::No);
}

#[tokio::test]
async fn test_missing_schema_fails_before_any_container() {
    let fake = Arc::new(FakeControlPlane::new());
    let root = fixture_root(false);

    let err = provision_mysql(&context(&fake, &root)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(fake.container_count(), 0);
    assert_eq!(fake.ping_count(), 0);
}

#[tokio::test]
async fn test_unready_server_times_out_and_is_purged() {
    let fake = Arc::new(FakeControlPlane::new());
    let root = fixture_root(true);

    let err = provision_mysql(&context(&fake, &root)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(fake.container_count(), 0);
    let calls = fake.calls();
    assert_eq!(calls.first().map(String::as_str), Some("prepare_image"));
    assert_eq!(calls.last().map(String::as_str), Some("purge"));
}
