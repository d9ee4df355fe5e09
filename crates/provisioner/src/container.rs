//! Starting dependency containers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::cleanup::Cleanup;
use crate::errors::{Error, Result};
use crate::naming::{
    generate_container_name, get_workflow_context, LABEL_CONTEXT, LABEL_EXPIRES_AT, LABEL_KIND,
    LABEL_MANAGED,
};
use crate::provision_spec::ProvisionSpec;
use crate::runtime::{ControlPlane, RuntimeHandle};

#[cfg(test)]
#[path = "container_tests.rs"]
mod tests;

/// A running container and the host ports its exposed ports map to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    id: String,
    name: String,
    host: String,
    ports: HashMap<String, u16>,
}

impl ContainerRef {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        ports: HashMap<String, u16>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            ports,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ports(&self) -> &HashMap<String, u16> {
        &self.ports
    }

    /// Host port mapped to a container port. Accepts `3306/tcp` or a bare
    /// `3306`, which means TCP.
    pub fn host_port(&self, port: &str) -> Option<u16> {
        if port.contains('/') {
            self.ports.get(port).copied()
        } else {
            self.ports.get(&format!("{}/tcp", port)).copied()
        }
    }

    /// `host:port` address reaching a container port from the test process.
    pub fn host_address(&self, port: &str) -> Option<String> {
        self.host_port(port)
            .map(|host_port| format!("{}:{}", self.host, host_port))
    }
}

/// Creates and starts dependency containers.
#[derive(Clone)]
pub struct ContainerProvisioner {
    control_plane: Arc<dyn ControlPlane>,
    prefix: String,
    host: String,
    workflow_context: String,
}

impl ContainerProvisioner {
    /// `prefix` starts every container name; `host` is where mapped ports
    /// are reachable.
    pub fn new(runtime: &RuntimeHandle, prefix: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            control_plane: runtime.shared(),
            prefix: prefix.into(),
            host: host.into(),
            workflow_context: get_workflow_context(),
        }
    }

    /// Overrides the workflow context recorded in container labels.
    pub fn with_workflow_context(mut self, context: impl Into<String>) -> Self {
        self.workflow_context = context.into();
        self
    }

    /// Prepares the image, then creates and starts a uniquely named container.
    ///
    /// Once the container exists every later failure purges it before
    /// returning; a failed purge is reported together with the first
    /// error.
    #[instrument(skip(self, spec), fields(kind = %spec.kind))]
    pub async fn start(&self, spec: ProvisionSpec) -> Result<(ContainerRef, Cleanup)> {
        let name = generate_container_name(&self.prefix, &spec.kind);
        let spec = self.labelled(spec);

        let image = self.control_plane.prepare_image(&name, &spec.image).await?;
        let id = self.control_plane.create(&name, &image, &spec).await?;
        info!(container = %name, id = %id, image = %image, "Container created");

        let cleanup = Cleanup::for_container(Arc::clone(&self.control_plane), id.clone(), name.clone());
        let (ports, cleanup) = cleanup.guard(self.run(&id, &name, &spec)).await?;

        info!(container = %name, ports = ?ports, "Container started");
        Ok((ContainerRef::new(id, name, self.host.clone(), ports), cleanup))
    }

    async fn run(&self, id: &str, name: &str, spec: &ProvisionSpec) -> Result<HashMap<String, u16>> {
        self.control_plane.start(id).await?;

        if let Some(after) = spec.expiration {
            self.control_plane.expire(id, after).await?;
            info!(container = %name, expires_in_secs = after.as_secs(), "Expiration set");
        }

        let ports = self.control_plane.port_bindings(id).await?;
        for port in &spec.ports {
            if !ports.contains_key(&port.key()) {
                return Err(Error::Start {
                    container: name.to_string(),
                    reason: format!("port {} was not published", port.key()),
                });
            }
        }

        Ok(ports)
    }

    fn labelled(&self, spec: ProvisionSpec) -> ProvisionSpec {
        let kind = spec.kind.clone();
        let expires_at = spec
            .expiration
            .map(|after| Utc::now().timestamp() + after.as_secs() as i64);

        let spec = spec
            .label(LABEL_MANAGED, "true")
            .label(LABEL_KIND, kind)
            .label(LABEL_CONTEXT, self.workflow_context.clone());
        match expires_at {
            Some(at) => spec.label(LABEL_EXPIRES_AT, at.to_string()),
            None => spec,
        }
    }
}

impl std::fmt::Debug for ContainerProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerProvisioner")
            .field("prefix", &self.prefix)
            .field("host", &self.host)
            .field("workflow_context", &self.workflow_context)
            .finish_non_exhaustive()
    }
}
