//! Connection to the container control plane.
//!
//! All daemon traffic goes through the [`ControlPlane`] trait so provisioning
//! logic can be exercised without a daemon. [`DockerControlPlane`] is the
//! production implementation on top of `bollard`, and [`RuntimeHandle`] is
//! the cheap-to-clone handle shared by every provisioning call.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::service::{HostConfig, PortBinding, RestartPolicyNameEnum};
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::StreamExt;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::naming::LABEL_MANAGED;
use crate::provision_spec::{ImageSource, ProvisionSpec, RestartPolicy};

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;

/// Seconds between the polite and the forced stop of an expired container.
const EXPIRATION_GRACE_SECS: u64 = 5;

/// A container created by this crate, as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub state: Option<String>,
}

/// Operations the provisioner needs from a container runtime.
///
/// Implementations report failures using the provisioning error taxonomy:
/// `ping` fails with [`Error::Connection`], image and container setup with
/// [`Error::Start`], `purge` with [`Error::Cleanup`].
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Checks that the daemon answers.
    async fn ping(&self) -> Result<()>;

    /// Builds or pulls the image and returns the reference to create
    /// containers from. `container` is only used for error reporting.
    async fn prepare_image(&self, container: &str, image: &ImageSource) -> Result<String>;

    /// Creates (but does not start) a container and returns its id.
    async fn create(&self, name: &str, image: &str, spec: &ProvisionSpec) -> Result<String>;

    /// Starts a created container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Arranges for the daemon to stop the container after `after`, whether
    /// or not the caller is still around.
    async fn expire(&self, id: &str, after: Duration) -> Result<()>;

    /// Returns the host port mapped to each exposed container port, keyed by
    /// the `port/protocol` form.
    async fn port_bindings(&self, id: &str) -> Result<HashMap<String, u16>>;

    /// Force-removes a container and its anonymous volumes. A container that
    /// no longer exists counts as removed.
    async fn purge(&self, id: &str) -> Result<()>;

    /// Returns true if the control plane still knows the container.
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Lists all containers carrying the managed label.
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>>;
}

/// [`ControlPlane`] backed by a Docker-compatible daemon.
#[derive(Debug, Clone)]
pub struct DockerControlPlane {
    docker: Docker,
}

impl DockerControlPlane {
    /// Connects using the host's default discovery (`DOCKER_HOST` or the
    /// local socket).
    pub fn connect_with_local_defaults() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| Error::Connection {
            reason: e.to_string(),
        })?;
        Ok(Self { docker })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull_image(&self, container: &str, repository: &str, tag: &str) -> Result<String> {
        let image = format!("{}:{}", repository, tag);

        match self.docker.inspect_image(&image).await {
            Ok(_) => {
                debug!(image = %image, "Image already present");
                return Ok(image);
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(Error::Start {
                    container: container.to_string(),
                    reason: format!("could not inspect image {}: {}", image, e),
                })
            }
        }

        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(|e| Error::Start {
                container: container.to_string(),
                reason: format!("could not pull image {}: {}", image, e),
            })?;
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }

        Ok(image)
    }

    async fn build_image(
        &self,
        container: &str,
        context_dir: &Path,
        dockerfile: &str,
        tag: &str,
    ) -> Result<String> {
        info!(tag = tag, context = %context_dir.display(), "Building image");

        let context = build_context_tar(context_dir).map_err(|e| Error::Start {
            container: container.to_string(),
            reason: format!(
                "could not archive build context {}: {}",
                context_dir.display(),
                e
            ),
        })?;

        let options = BuildImageOptions {
            dockerfile,
            t: tag,
            rm: true,
            forcerm: true,
            ..Default::default()
        };
        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(msg) = stream.next().await {
            let build_info = msg.map_err(|e| Error::Start {
                container: container.to_string(),
                reason: format!("image build failed: {}", e),
            })?;
            if let Some(stream_msg) = build_info.stream {
                debug!(tag = tag, "{}", stream_msg.trim_end());
            }
            if let Some(error_msg) = build_info.error {
                return Err(Error::Start {
                    container: container.to_string(),
                    reason: format!("image build failed: {}", error_msg),
                });
            }
        }

        info!(tag = tag, "Image built");
        Ok(tag.to_string())
    }
}

#[async_trait]
impl ControlPlane for DockerControlPlane {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Connection {
                reason: e.to_string(),
            })
    }

    async fn prepare_image(&self, container: &str, image: &ImageSource) -> Result<String> {
        match image {
            ImageSource::Pull { repository, tag } => {
                self.pull_image(container, repository, tag).await
            }
            ImageSource::Build {
                context_dir,
                dockerfile,
                tag,
            } => self.build_image(container, context_dir, dockerfile, tag).await,
        }
    }

    async fn create(&self, name: &str, image: &str, spec: &ProvisionSpec) -> Result<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            exposed_ports.insert(port.key(), HashMap::new());
            port_bindings.insert(
                port.key(),
                Some(vec![PortBinding {
                    host_ip: None,
                    // No host port lets the daemon pick a free one.
                    host_port: port.host_port.map(|p| p.to_string()),
                }]),
            );
        }

        let binds = spec.binds();
        let host_config = HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: Some(port_bindings),
            restart_policy: Some(docker_restart_policy(spec.restart_policy)),
            auto_remove: Some(spec.auto_remove),
            cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
            security_opt: (!spec.security_opt.is_empty()).then(|| spec.security_opt.clone()),
            // An init process lets the expiration signal reach the main
            // process even when it would ignore signals as PID 1.
            init: spec.expiration.map(|_| true),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            env: Some(spec.env_list()),
            cmd: spec.cmd.clone(),
            tty: Some(spec.tty),
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name,
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| Error::Start {
                container: name.to_string(),
                reason: format!("could not create container: {}", e),
            })?;

        for warning in &response.warnings {
            debug!(container = name, warning = %warning, "Container created with warning");
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Start {
                container: id.to_string(),
                reason: format!("could not start container: {}", e),
            })
    }

    async fn expire(&self, id: &str, after: Duration) -> Result<()> {
        let script = expiration_script(after);
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", script.as_str()]),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Start {
                container: id.to_string(),
                reason: format!("could not set expiration: {}", e),
            })?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::Start {
                container: id.to_string(),
                reason: format!("could not set expiration: {}", e),
            })?;

        Ok(())
    }

    async fn port_bindings(&self, id: &str) -> Result<HashMap<String, u16>> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::Start {
                container: id.to_string(),
                reason: format!("could not inspect container: {}", e),
            })?;

        let ports = info
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let mut mapped = HashMap::new();
        for (key, bindings) in ports {
            let host_port = bindings
                .unwrap_or_default()
                .into_iter()
                .find_map(|binding| binding.host_port.and_then(|p| p.parse::<u16>().ok()));
            if let Some(host_port) = host_port {
                mapped.insert(key, host_port);
            }
        }

        Ok(mapped)
    }

    async fn purge(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) || is_removal_in_progress(&e) => {
                debug!(container = id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(Error::Cleanup {
                container: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::Connection {
                reason: e.to_string(),
            }),
        }
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", LABEL_MANAGED)]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::Connection {
                reason: e.to_string(),
            })?;

        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ManagedContainer {
                    id,
                    name,
                    labels: summary.labels.unwrap_or_default(),
                    created_at: summary
                        .created
                        .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
                    state: summary.state,
                })
            })
            .collect())
    }
}

/// Shared handle to the control plane.
///
/// Cloning is cheap; every clone talks to the same connection.
#[derive(Clone)]
pub struct RuntimeHandle {
    control_plane: Arc<dyn ControlPlane>,
}

impl RuntimeHandle {
    /// Wraps an existing control plane without contacting it.
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Returns a verified handle.
    ///
    /// A supplied handle is reused as-is; otherwise a new connection is made
    /// with default discovery. Either way the control plane is pinged once
    /// and an unreachable daemon is reported as [`Error::Connection`] without
    /// retrying.
    pub async fn ensure(existing: Option<RuntimeHandle>) -> Result<RuntimeHandle> {
        let handle = match existing {
            Some(handle) => handle,
            None => {
                let docker = DockerControlPlane::connect_with_local_defaults()?;
                RuntimeHandle::new(Arc::new(docker))
            }
        };

        handle.control_plane.ping().await?;
        info!("Connected to container runtime");

        Ok(handle)
    }

    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    pub(crate) fn shared(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.control_plane)
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle").finish_non_exhaustive()
    }
}

/// Shell script run inside the container to enforce its expiration.
///
/// The main process is asked to stop first; anything still alive after the
/// grace period is killed.
pub fn expiration_script(after: Duration) -> String {
    format!(
        "sleep {}; kill -TERM 1; sleep {}; kill -9 -1",
        after.as_secs().max(1),
        EXPIRATION_GRACE_SECS
    )
}

fn docker_restart_policy(policy: RestartPolicy) -> bollard::service::RestartPolicy {
    let (name, maximum_retry_count) = match policy {
        RestartPolicy::No => (RestartPolicyNameEnum::NO, None),
        RestartPolicy::OnFailure { max_retries } => {
            (RestartPolicyNameEnum::ON_FAILURE, Some(max_retries))
        }
        RestartPolicy::UnlessStopped => (RestartPolicyNameEnum::UNLESS_STOPPED, None),
        RestartPolicy::Always => (RestartPolicyNameEnum::ALWAYS, None),
    };

    bollard::service::RestartPolicy {
        name: Some(name),
        maximum_retry_count,
    }
}

fn build_context_tar(context_dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", context_dir)?;
    builder.into_inner()
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_removal_in_progress(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code: 409, message }
            if message.contains("already in progress")
    )
}
