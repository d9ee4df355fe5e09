//! Provisioner configuration.
//!
//! Every setting has a default and can be overridden through a
//! `PROVISIONER_*` environment variable.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::asset_paths::DEFAULT_MAX_UPWARD_TRAVERSAL;
use crate::errors::{Error, Result};
use crate::readiness::RetryPolicy;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

pub const ENV_MAX_UPWARD_TRAVERSAL: &str = "PROVISIONER_MAX_UPWARD_TRAVERSAL";
pub const ENV_EXPIRATION_SECS: &str = "PROVISIONER_EXPIRATION_SECS";
pub const ENV_READY_TIMEOUT_SECS: &str = "PROVISIONER_READY_TIMEOUT_SECS";
pub const ENV_READY_INITIAL_INTERVAL_MS: &str = "PROVISIONER_READY_INITIAL_INTERVAL_MS";
pub const ENV_READY_MAX_INTERVAL_MS: &str = "PROVISIONER_READY_MAX_INTERVAL_MS";
pub const ENV_CONTAINER_PREFIX: &str = "PROVISIONER_CONTAINER_PREFIX";
pub const ENV_HOST: &str = "PROVISIONER_HOST";

/// Settings shared by every provisioning call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionerConfig {
    /// How many directories the asset search may climb.
    pub max_upward_traversal: usize,
    /// Container lifetime; `None` disables expiration.
    pub expiration: Option<Duration>,
    /// Overall readiness deadline.
    pub ready_timeout: Duration,
    pub ready_initial_interval: Duration,
    pub ready_max_interval: Duration,
    pub container_prefix: String,
    /// Host on which mapped container ports are reachable.
    pub host: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            max_upward_traversal: DEFAULT_MAX_UPWARD_TRAVERSAL,
            expiration: Some(Duration::from_secs(60)),
            ready_timeout: Duration::from_secs(60),
            ready_initial_interval: Duration::from_millis(500),
            ready_max_interval: Duration::from_secs(5),
            container_prefix: "provisioner".to_string(),
            host: "127.0.0.1".to_string(),
        }
    }
}

impl ProvisionerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which returns the value of
    /// an environment variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_upward_traversal = positive(
            ENV_MAX_UPWARD_TRAVERSAL,
            parse_or(&lookup, ENV_MAX_UPWARD_TRAVERSAL, defaults.max_upward_traversal)?,
        )?;

        // Zero turns expiration off.
        let expiration_secs = parse_or(
            &lookup,
            ENV_EXPIRATION_SECS,
            defaults.expiration.map_or(0, |d| d.as_secs()),
        )?;
        let expiration = (expiration_secs > 0).then(|| Duration::from_secs(expiration_secs));

        let ready_timeout = Duration::from_secs(positive(
            ENV_READY_TIMEOUT_SECS,
            parse_or(&lookup, ENV_READY_TIMEOUT_SECS, defaults.ready_timeout.as_secs())?,
        )?);
        let ready_initial_interval = Duration::from_millis(positive(
            ENV_READY_INITIAL_INTERVAL_MS,
            parse_or(
                &lookup,
                ENV_READY_INITIAL_INTERVAL_MS,
                defaults.ready_initial_interval.as_millis() as u64,
            )?,
        )?);
        let ready_max_interval = Duration::from_millis(positive(
            ENV_READY_MAX_INTERVAL_MS,
            parse_or(
                &lookup,
                ENV_READY_MAX_INTERVAL_MS,
                defaults.ready_max_interval.as_millis() as u64,
            )?,
        )?);
        if ready_max_interval < ready_initial_interval {
            return Err(Error::Config {
                key: ENV_READY_MAX_INTERVAL_MS.to_string(),
                reason: format!(
                    "must not be below the initial interval of {}ms",
                    ready_initial_interval.as_millis()
                ),
            });
        }

        let container_prefix = non_empty(
            ENV_CONTAINER_PREFIX,
            lookup(ENV_CONTAINER_PREFIX).unwrap_or(defaults.container_prefix),
        )?;
        let host = non_empty(ENV_HOST, lookup(ENV_HOST).unwrap_or(defaults.host))?;

        Ok(Self {
            max_upward_traversal,
            expiration,
            ready_timeout,
            ready_initial_interval,
            ready_max_interval,
            container_prefix,
            host,
        })
    }

    /// Readiness policy built from the configured intervals and deadline.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_interval(self.ready_initial_interval)
            .with_max_interval(self.ready_max_interval)
            .with_max_elapsed(self.ready_timeout)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| Error::Config {
            key: key.to_string(),
            reason: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

fn positive<T>(key: &str, value: T) -> Result<T>
where
    T: PartialOrd + Default + Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(Error::Config {
            key: key.to_string(),
            reason: format!("must be greater than zero, got {}", value),
        })
    }
}

fn non_empty(key: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Config {
            key: key.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
