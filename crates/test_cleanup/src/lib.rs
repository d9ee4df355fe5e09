//! Removal of orphaned test containers.
//!
//! Containers started by the provisioner carry a managed label and, when they
//! were given a lifetime, an `expires-at` label. Normally the daemon stops
//! them on time; this crate removes whatever a crashed run or a restarted
//! daemon left behind. It can be used from test code or through the
//! `cleanup-orphans` binary.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use provisioner::naming::{LABEL_CONTEXT, LABEL_EXPIRES_AT};
use provisioner::{ManagedContainer, RuntimeHandle};
use tracing::{debug, error, info, warn};

pub use provisioner::init_logging;

/// Why a container was selected for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Its `expires-at` label is in the past.
    LabelPassed,
    /// It has no usable label and is older than the maximum age.
    TooOld,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names of removed containers, or of those that would be removed in a
    /// dry run.
    pub removed: Vec<String>,
    /// Names of containers that could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Number of managed containers that were left alone.
    pub kept: usize,
}

/// Removes expired managed containers.
pub struct ContainerCleanup {
    runtime: RuntimeHandle,
    dry_run: bool,
}

impl ContainerCleanup {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self {
            runtime,
            dry_run: false,
        }
    }

    /// Only reports what would be removed.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Decides whether `container` has outlived its lifetime at `now`.
    ///
    /// The `expires-at` label wins when present and parseable; otherwise the
    /// creation time is compared against `max_age`. Containers with neither
    /// are kept.
    pub fn expiry(
        container: &ManagedContainer,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Option<Expiry> {
        let expires_at = container
            .labels
            .get(LABEL_EXPIRES_AT)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        match (expires_at, container.created_at) {
            (Some(at), _) if at <= now => Some(Expiry::LabelPassed),
            (Some(_), _) => None,
            (None, Some(created)) if created < now - max_age => Some(Expiry::TooOld),
            _ => None,
        }
    }

    /// Removes every managed container that has expired.
    pub async fn cleanup_expired(&self, max_age: Duration) -> Result<CleanupReport> {
        info!(
            max_age_minutes = max_age.num_minutes(),
            dry_run = self.dry_run,
            "Searching for expired test containers"
        );
        let now = Utc::now();
        self.cleanup_matching(|container| {
            Self::expiry(container, now, max_age).inspect(|reason| {
                debug!(container = %container.name, reason = ?reason, "Container expired");
            })
            .is_some()
        })
        .await
    }

    /// Removes every managed container created in the given workflow
    /// context (for example `pr123`), regardless of age.
    pub async fn cleanup_context(&self, context: &str) -> Result<CleanupReport> {
        info!(
            context = context,
            dry_run = self.dry_run,
            "Searching for test containers from workflow context"
        );
        self.cleanup_matching(|container| {
            container.labels.get(LABEL_CONTEXT).map(String::as_str) == Some(context)
        })
        .await
    }

    async fn cleanup_matching<F>(&self, mut selected: F) -> Result<CleanupReport>
    where
        F: FnMut(&ManagedContainer) -> bool,
    {
        let containers = self
            .runtime
            .control_plane()
            .list_managed()
            .await
            .context("Failed to list managed containers")?;

        let mut report = CleanupReport::default();
        for container in containers {
            if !selected(&container) {
                report.kept += 1;
                continue;
            }

            if self.dry_run {
                info!(container = %container.name, "Would remove container");
                report.removed.push(container.name);
                continue;
            }

            match self.runtime.control_plane().purge(&container.id).await {
                Ok(()) => {
                    info!(container = %container.name, "Removed container");
                    report.removed.push(container.name);
                }
                Err(err) => {
                    error!(container = %container.name, error = %err, "Failed to remove container");
                    report.failed.push((container.name, err.to_string()));
                }
            }
        }

        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "Some containers could not be removed");
        }
        info!(
            removed = report.removed.len(),
            kept = report.kept,
            "Cleanup completed"
        );

        Ok(report)
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
