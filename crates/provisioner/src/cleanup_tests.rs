//! Tests for dependency release.

use super::*;
use crate::provision_spec::{ImageSource, ProvisionSpec};
use crate::testing::FakeControlPlane;
use crate::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counting_cleanup(counter: Arc<AtomicUsize>) -> Cleanup {
    Cleanup::new("counter", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn failing_cleanup(label: &str) -> Cleanup {
    let container = label.to_string();
    Cleanup::new(label, move || async move {
        Err(Error::Cleanup {
            container,
            reason: "daemon did not answer".to_string(),
        })
    })
}

#[tokio::test]
async fn test_release_runs_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cleanup = counting_cleanup(counter.clone());

    cleanup.release().await.expect("release should succeed");

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_noop_release_succeeds() {
    Cleanup::noop("nothing")
        .release()
        .await
        .expect("noop release should succeed");
}

#[tokio::test]
async fn test_for_container_purges() {
    let fake = Arc::new(FakeControlPlane::new());
    let spec = ProvisionSpec::new("mysql", ImageSource::pull("mysql", "8.0"));
    let id = fake
        .create("provisioner-mysql_abc", "mysql:8.0", &spec)
        .await
        .expect("create should succeed");

    let cleanup = Cleanup::for_container(fake.clone(), id.clone(), "provisioner-mysql_abc");
    cleanup.release().await.expect("purge should succeed");

    assert!(!fake.exists(&id).await.expect("exists should answer"));
}

#[tokio::test]
async fn test_guard_returns_value_and_cleanup_on_success() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cleanup = counting_cleanup(counter.clone());

    let (value, cleanup) = cleanup
        .guard(async { Ok(42) })
        .await
        .expect("step should succeed");

    assert_eq!(value, 42);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    cleanup.release().await.expect("release should succeed");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_guard_rolls_back_on_failure() {
    let counter = Arc::new(AtomicUsize::new(0));
    let cleanup = counting_cleanup(counter.clone());

    let err = cleanup
        .guard(async {
            Err::<(), _>(Error::Start {
                container: "c".to_string(),
                reason: "boom".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Start);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_guard_keeps_both_errors_when_rollback_fails() {
    let err = failing_cleanup("c")
        .guard(async {
            Err::<(), _>(Error::Start {
                container: "c".to_string(),
                reason: "boom".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Aggregate);
    assert!(err.contains(ErrorKind::Start));
    assert!(err.contains(ErrorKind::Cleanup));
    let causes = err.causes();
    assert_eq!(causes[0].kind(), ErrorKind::Start);
    assert_eq!(causes[1].kind(), ErrorKind::Cleanup);
}

#[tokio::test]
async fn test_release_all_aggregates_failures() {
    let counter = Arc::new(AtomicUsize::new(0));
    let err = Cleanup::release_all(vec![
        failing_cleanup("first"),
        counting_cleanup(counter.clone()),
        failing_cleanup("second"),
    ])
    .await
    .unwrap_err();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(err.causes().len(), 2);
}

#[tokio::test]
async fn test_dropped_cleanup_releases_in_background() {
    let counter = Arc::new(AtomicUsize::new(0));
    drop(counting_cleanup(counter.clone()));

    for _ in 0..10 {
        if counter.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropped_cleanup_outside_runtime_does_not_panic() {
    let counter = Arc::new(AtomicUsize::new(0));
    drop(counting_cleanup(counter.clone()));

    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_run_releases_after_body() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dependency = ReadyDependency::new("client", counting_cleanup(counter.clone()));

    let value: Result<usize> = dependency
        .run(|client| async move { Ok(client.len()) })
        .await;

    assert_eq!(value.expect("body should succeed"), 6);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_releases_when_body_fails() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dependency = ReadyDependency::new((), counting_cleanup(counter.clone()));

    let err = dependency
        .run(|_| async {
            Err::<(), _>(Error::Connect {
                kind: "mysql".to_string(),
                reason: "refused".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connect);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_run_reports_release_failure() {
    let dependency = ReadyDependency::new((), failing_cleanup("db"));

    let err = dependency
        .run(|_| async { Ok::<_, Error>(()) })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cleanup);
}

#[tokio::test]
async fn test_run_keeps_both_errors_when_body_and_release_fail() {
    let dependency = ReadyDependency::new((), failing_cleanup("db"));

    let err = dependency
        .run(|_| async {
            Err::<(), _>(Error::Connect {
                kind: "mysql".to_string(),
                reason: "refused".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Aggregate);
    let causes = err.causes();
    assert_eq!(causes[0].kind(), ErrorKind::Connect);
    assert_eq!(causes[1].kind(), ErrorKind::Cleanup);
}

#[tokio::test]
async fn test_run_with_anyhow_keeps_release_failure() {
    let dependency = ReadyDependency::new((), failing_cleanup("db"));

    let err = dependency
        .run(|_| async { Err::<(), _>(anyhow::anyhow!("row count mismatch")) })
        .await
        .unwrap_err();

    let release = err
        .downcast_ref::<Error>()
        .expect("release error should be attached");
    assert_eq!(release.kind(), ErrorKind::Cleanup);
    assert_eq!(err.root_cause().to_string(), "row count mismatch");
}

#[tokio::test]
async fn test_run_releases_when_body_panics() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dependency = ReadyDependency::new((), counting_cleanup(counter.clone()));

    let joined = tokio::spawn(dependency.run(|_| async {
        let user_id = 2;
        assert_eq!(user_id, 1, "unexpected user id");
        Ok::<(), Error>(())
    }))
    .await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_run_releases_before_runtime_shuts_down_after_panic() {
    let counter = Arc::new(AtomicUsize::new(0));
    let dependency = ReadyDependency::new((), counting_cleanup(counter.clone()));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build");

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(dependency.run(|_| async {
            let rows: Vec<u64> = Vec::new();
            assert!(!rows.is_empty(), "body failed");
            Ok::<(), Error>(())
        }))
    }));
    drop(runtime);

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ready_dependency_records_container() {
    let container = ContainerRef::new("abc", "provisioner-mysql_x", "127.0.0.1", Default::default());
    let dependency = ReadyDependency::new((), Cleanup::noop("db")).with_container(container);

    assert_eq!(dependency.container().map(ContainerRef::id), Some("abc"));
    assert!(ReadyDependency::new((), Cleanup::noop("db")).container().is_none());
}
