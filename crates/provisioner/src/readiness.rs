//! Waiting for a started dependency to accept work.
//!
//! A [`ReadinessProbe`] is attempted repeatedly under a [`RetryPolicy`]:
//! exponential backoff up to a ceiling, a per-attempt timeout and an overall
//! deadline. The wait gives up with [`Error::Timeout`] as soon as the next
//! sleep would cross the deadline, and stops promptly with
//! [`Error::Cancelled`] when its cancellation token fires.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::errors::{Error, Result};

#[cfg(test)]
#[path = "readiness_tests.rs"]
mod tests;

/// Error returned by a single failed probe attempt.
pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// Backoff schedule for readiness probing.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_interval: Duration,
    /// Growth factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Ceiling for a single delay.
    pub max_interval: Duration,
    /// Overall deadline measured from the first attempt.
    pub max_elapsed: Duration,
    /// Upper bound for one attempt.
    pub attempt_timeout: Duration,
    /// Optional cap on the number of attempts.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay that follows `current`, capped at `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.multiplier.max(1.0);
        Duration::try_from_secs_f64(scaled)
            .map_or(self.max_interval, |next| next.min(self.max_interval))
    }
}

/// One readiness check against a dependency.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// What is being probed, for logs and errors.
    fn target(&self) -> String;

    /// Makes one attempt. `Ok` means the dependency is ready.
    async fn check(&self) -> std::result::Result<(), ProbeError>;
}

/// Probes until ready or until the policy's deadline passes.
pub async fn wait_until_ready(probe: &dyn ReadinessProbe, policy: &RetryPolicy) -> Result<()> {
    wait_until_ready_or_cancelled(probe, policy, &CancellationToken::new()).await
}

/// Like [`wait_until_ready`], but also stops when `cancel` fires.
#[instrument(skip_all, fields(target = %probe.target()))]
pub async fn wait_until_ready_or_cancelled(
    probe: &dyn ReadinessProbe,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let target = probe.target();
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { target, attempts });
            }
            outcome = timeout(policy.attempt_timeout, probe.check()) => outcome,
        };

        let last_error = match outcome {
            Ok(Ok(())) => {
                info!(
                    attempts = attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Dependency ready"
                );
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("attempt timed out after {:?}", policy.attempt_timeout),
        };

        let elapsed = started.elapsed();
        let attempts_exhausted = policy.max_attempts.is_some_and(|max| attempts >= max);
        if attempts_exhausted || elapsed + interval > policy.max_elapsed {
            return Err(Error::Timeout {
                target,
                attempts,
                elapsed,
                last_error,
            });
        }

        debug!(
            attempt = attempts,
            delay_ms = interval.as_millis() as u64,
            error = %last_error,
            "Dependency not ready, retrying after delay"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { target, attempts });
            }
            _ = sleep(interval) => {}
        }

        interval = policy.next_interval(interval);
    }
}

/// Which HTTP statuses count as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptStatus {
    /// Any response at all; only transport errors fail.
    #[default]
    Any,
    /// Only 2xx responses.
    Success,
}

/// Readiness probe issuing `GET` requests against an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
    accept: AcceptStatus,
}

impl HttpProbe {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            accept: AcceptStatus::default(),
        }
    }

    /// Probes `http://{address}{path}`.
    pub fn for_address(address: &str, path: &str) -> Result<Self> {
        let raw = format!("http://{}{}", address, path);
        let url = Url::parse(&raw).map_err(|e| Error::Config {
            key: "probe url".to_string(),
            reason: format!("'{}' is not a valid URL: {}", raw, e),
        })?;
        Ok(Self::new(url))
    }

    pub fn accept(mut self, accept: AcceptStatus) -> Self {
        self.accept = accept;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    fn target(&self) -> String {
        self.url.to_string()
    }

    async fn check(&self) -> std::result::Result<(), ProbeError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        // Drain the body so the connection is closed cleanly.
        response.bytes().await?;

        match self.accept {
            AcceptStatus::Any => Ok(()),
            AcceptStatus::Success if status.is_success() => Ok(()),
            AcceptStatus::Success => Err(format!("unexpected status {}", status).into()),
        }
    }
}
