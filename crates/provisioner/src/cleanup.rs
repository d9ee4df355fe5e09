//! Release of provisioned dependencies.
//!
//! A [`Cleanup`] can be released at most once: [`Cleanup::release`] takes it
//! by value. Dropping one without releasing it schedules a best-effort release
//! on the current Tokio runtime and logs a warning.

use std::fmt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::container::ContainerRef;
use crate::errors::{Error, ErrorList, Result};
use crate::runtime::ControlPlane;

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Once-only release operation for a provisioned dependency.
#[must_use = "a dependency that is never released keeps running until it expires"]
pub struct Cleanup {
    label: String,
    release: Option<ReleaseFn>,
}

impl Cleanup {
    /// Wraps an arbitrary release operation.
    pub fn new<F, Fut>(label: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            release: Some(Box::new(move || Box::pin(release()))),
        }
    }

    /// A cleanup with nothing to release.
    pub fn noop(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            release: None,
        }
    }

    /// Purges a container through the control plane.
    pub fn for_container(
        control_plane: Arc<dyn ControlPlane>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let name = name.into();
        let label = name.clone();
        Self::new(label, move || async move {
            control_plane.purge(&id).await?;
            info!(container = %name, "Container purged");
            Ok(())
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Releases the dependency.
    pub async fn release(mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release().await,
            None => Ok(()),
        }
    }

    /// Runs a provisioning step that follows the acquisition of this
    /// dependency.
    ///
    /// On success the step's value is returned together with the cleanup. On
    /// failure the dependency is released first and any release error is
    /// kept alongside the step's error.
    pub async fn guard<T, Fut>(self, step: Fut) -> Result<(T, Cleanup)>
    where
        Fut: Future<Output = Result<T>>,
    {
        match step.await {
            Ok(value) => Ok((value, self)),
            Err(err) => {
                let label = self.label.clone();
                let released = self.release().await;
                if let Err(cleanup_err) = &released {
                    error!(dependency = %label, error = %cleanup_err, "Rollback failed");
                }
                Err(err.with_cleanup(released))
            }
        }
    }

    /// Releases every cleanup, in order, collecting all failures.
    pub async fn release_all(cleanups: impl IntoIterator<Item = Cleanup>) -> Result<()> {
        let mut errors = ErrorList::new();
        for cleanup in cleanups {
            errors.push_result(cleanup.release().await);
        }
        errors.into_result()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("label", &self.label)
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };

        let label = self.label.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(dependency = %label, "Cleanup dropped without release, releasing in background");
                handle.spawn(async move {
                    if let Err(e) = release().await {
                        warn!(dependency = %label, error = %e, "Background release failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    dependency = %label,
                    "Cleanup dropped outside a runtime, dependency left to expire"
                );
            }
        }
    }
}

/// Error types that can carry a failed release next to their own failure.
pub trait ReleaseFailure: From<Error> {
    fn with_release_failure(self, release: Error) -> Self;
}

impl ReleaseFailure for Error {
    fn with_release_failure(self, release: Error) -> Self {
        self.and(release)
    }
}

/// The release error becomes the outermost context, so it can be recovered
/// with `downcast_ref::<Error>()` while the chain still ends in the body's
/// error.
impl ReleaseFailure for anyhow::Error {
    fn with_release_failure(self, release: Error) -> Self {
        self.context(release)
    }
}

/// A dependency that answered its readiness probe, with its client.
///
/// The client was reachable when this value was returned; nothing is promised
/// about later liveness.
#[derive(Debug)]
pub struct ReadyDependency<C> {
    pub client: C,
    pub cleanup: Cleanup,
    container: Option<ContainerRef>,
}

impl<C> ReadyDependency<C> {
    pub fn new(client: C, cleanup: Cleanup) -> Self {
        Self {
            client,
            cleanup,
            container: None,
        }
    }

    /// Records the container backing this dependency.
    pub fn with_container(mut self, container: ContainerRef) -> Self {
        self.container = Some(container);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn container(&self) -> Option<&ContainerRef> {
        self.container.as_ref()
    }

    pub fn into_parts(self) -> (C, Cleanup) {
        (self.client, self.cleanup)
    }

    /// Releases the dependency without using the client any further.
    pub async fn release(self) -> Result<()> {
        self.cleanup.release().await
    }

    /// Runs `body` with the client, then releases the dependency however the
    /// body ended.
    ///
    /// A release failure after a successful body becomes the result. When
    /// both fail the returned error carries both. A panicking body is
    /// resumed after the release has run.
    pub async fn run<T, E, F, Fut>(self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(C) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: ReleaseFailure,
    {
        let (client, cleanup) = self.into_parts();
        let label = cleanup.label().to_string();
        let outcome = AssertUnwindSafe(body(client)).catch_unwind().await;
        let released = cleanup.release().await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                if let Err(cleanup_err) = &released {
                    error!(dependency = %label, error = %cleanup_err, "Release failed after test body panicked");
                }
                resume_unwind(panic);
            }
        };

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup_err)) => Err(E::from(cleanup_err)),
            (Err(body_err), Ok(())) => Err(body_err),
            (Err(body_err), Err(cleanup_err)) => {
                error!(dependency = %label, error = %cleanup_err, "Release failed after test body error");
                Err(body_err.with_release_failure(cleanup_err))
            }
        }
    }
}
