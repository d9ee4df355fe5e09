//! Ephemeral dependency provisioning for integration tests.
//!
//! The crate starts throwaway containers for the services a test needs,
//! waits until they answer and hands back a [`Cleanup`] that removes them
//! again. A typical harness builds one [`ProvisioningContext`] and passes it
//! to every provisioning call:
//!
//! ```no_run
//! use provisioner::{ExposedPort, ImageSource, ProvisionSpec, ProvisioningContext};
//!
//! # async fn example() -> provisioner::Result<()> {
//! let context = ProvisioningContext::from_env()?;
//! let provisioner = context.provisioner().await?;
//! let spec = ProvisionSpec::new("cache", ImageSource::pull("redis", "7"))
//!     .port(ExposedPort::tcp(6379));
//! let (container, cleanup) = provisioner.start(spec).await?;
//! println!("redis at {:?}", container.host_address("6379"));
//! cleanup.release().await?;
//! # Ok(())
//! # }
//! ```

pub mod asset_paths;
pub mod cleanup;
pub mod config;
pub mod container;
pub mod context;
pub mod errors;
pub mod logging;
pub mod naming;
pub mod provision_spec;
pub mod readiness;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use asset_paths::{AssetPath, AssetResolver};
pub use cleanup::{Cleanup, ReadyDependency, ReleaseFailure};
pub use config::ProvisionerConfig;
pub use container::{ContainerProvisioner, ContainerRef};
pub use context::ProvisioningContext;
pub use errors::{Error, ErrorKind, ErrorList, Result};
pub use logging::init_logging;
pub use provision_spec::{ExposedPort, ImageSource, Mount, Protocol, ProvisionSpec, RestartPolicy};
pub use readiness::{
    wait_until_ready, wait_until_ready_or_cancelled, AcceptStatus, HttpProbe, ProbeError,
    ReadinessProbe, RetryPolicy,
};
pub use runtime::{ControlPlane, DockerControlPlane, ManagedContainer, RuntimeHandle};
pub use tokio_util::sync::CancellationToken;
