//! Shared state for one test harness.
//!
//! A [`ProvisioningContext`] is built once by the harness and passed to every
//! provisioning call. It owns the configuration, the lazily connected runtime
//! handle and the asset path cache.

use std::path::PathBuf;

use tokio::sync::OnceCell;

use crate::asset_paths::AssetResolver;
use crate::config::ProvisionerConfig;
use crate::container::ContainerProvisioner;
use crate::errors::Result;
use crate::readiness::RetryPolicy;
use crate::runtime::RuntimeHandle;

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

#[derive(Debug)]
pub struct ProvisioningContext {
    config: ProvisionerConfig,
    supplied_runtime: Option<RuntimeHandle>,
    runtime: OnceCell<RuntimeHandle>,
    assets: AssetResolver,
}

impl ProvisioningContext {
    /// Creates a context whose asset search starts at the working directory.
    pub fn new(config: ProvisionerConfig) -> Result<Self> {
        let assets = AssetResolver::from_current_dir(config.max_upward_traversal)?;
        Ok(Self {
            config,
            supplied_runtime: None,
            runtime: OnceCell::new(),
            assets,
        })
    }

    /// Creates a context configured from `PROVISIONER_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ProvisionerConfig::from_env()?)
    }

    /// Uses `runtime` instead of connecting with default discovery.
    pub fn with_runtime(mut self, runtime: RuntimeHandle) -> Self {
        self.supplied_runtime = Some(runtime);
        self.runtime = OnceCell::new();
        self
    }

    /// Starts the asset search at `start` instead of the working directory.
    pub fn with_asset_root(mut self, start: impl Into<PathBuf>) -> Self {
        self.assets = AssetResolver::new(start, self.config.max_upward_traversal);
        self
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetResolver {
        &self.assets
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    /// Returns the runtime handle, connecting and pinging on first use.
    ///
    /// A failed connection is not cached; the next call tries again.
    pub async fn runtime(&self) -> Result<RuntimeHandle> {
        self.runtime
            .get_or_try_init(|| RuntimeHandle::ensure(self.supplied_runtime.clone()))
            .await
            .cloned()
    }

    /// A container provisioner using this context's runtime and naming.
    pub async fn provisioner(&self) -> Result<ContainerProvisioner> {
        let runtime = self.runtime().await?;
        Ok(ContainerProvisioner::new(
            &runtime,
            self.config.container_prefix.clone(),
            self.config.host.clone(),
        ))
    }
}
