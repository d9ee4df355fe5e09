//! In-memory [`ControlPlane`] for tests.
//!
//! The fake keeps containers in a map, assigns host ports from a counter and
//! can be told to fail individual operations, which makes rollback paths easy
//! to reach without a daemon.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{Error, Result};
use crate::naming::LABEL_MANAGED;
use crate::provision_spec::{ExposedPort, ImageSource, ProvisionSpec};
use crate::runtime::{ControlPlane, ManagedContainer};

const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// A container held by [`FakeControlPlane`].
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub requested_ports: Vec<ExposedPort>,
    pub ports: HashMap<String, u16>,
    pub running: bool,
    pub expiration: Option<Duration>,
    pub auto_remove: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u32,
    next_port: u16,
    containers: BTreeMap<String, FakeContainer>,
    seeded: Vec<ManagedContainer>,
    calls: Vec<String>,
}

/// Scriptable in-memory control plane.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
    pings: AtomicUsize,
    unreachable: bool,
    fail_prepare: bool,
    fail_expire: bool,
    fail_purge: bool,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ping fails.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Image preparation fails, as a broken Dockerfile would.
    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// Setting an expiration fails after the container is running.
    pub fn failing_expire(mut self) -> Self {
        self.fail_expire = true;
        self
    }

    /// Purging any container fails.
    pub fn failing_purge(mut self) -> Self {
        self.fail_purge = true;
        self
    }

    /// Adds a managed container that only shows up in listings.
    pub fn with_listed(self, container: ManagedContainer) -> Self {
        self.lock().seeded.push(container);
        self
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Containers currently known, in creation order.
    pub fn containers(&self) -> Vec<FakeContainer> {
        self.lock().containers.values().cloned().collect()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Names of the operations invoked so far, e.g. `create`, `purge`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(Error::Connection {
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn prepare_image(&self, container: &str, image: &ImageSource) -> Result<String> {
        self.lock().calls.push("prepare_image".to_string());
        if self.fail_prepare {
            return Err(Error::Start {
                container: container.to_string(),
                reason: "image build failed: COPY failed: no such file".to_string(),
            });
        }
        Ok(image.image_name())
    }

    async fn create(&self, name: &str, image: &str, spec: &ProvisionSpec) -> Result<String> {
        let mut state = self.lock();
        state.calls.push("create".to_string());
        state.next_id += 1;
        let id = format!("fake-{:04}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image: image.to_string(),
                labels: spec.labels.clone().into_iter().collect(),
                requested_ports: spec.ports.clone(),
                ports: HashMap::new(),
                running: false,
                expiration: None,
                auto_remove: spec.auto_remove,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("start".to_string());

        let requested = match state.containers.get(id) {
            Some(container) => container.requested_ports.clone(),
            None => {
                return Err(Error::Start {
                    container: id.to_string(),
                    reason: "no such container".to_string(),
                })
            }
        };

        let mut ports = HashMap::new();
        for port in requested {
            let host_port = match port.host_port {
                Some(fixed) => {
                    let taken = state
                        .containers
                        .values()
                        .filter(|c| c.running)
                        .any(|c| c.ports.values().any(|p| *p == fixed));
                    if taken {
                        return Err(Error::Start {
                            container: id.to_string(),
                            reason: format!(
                                "Bind for 0.0.0.0:{} failed: port is already allocated",
                                fixed
                            ),
                        });
                    }
                    fixed
                }
                None => {
                    let assigned = FIRST_EPHEMERAL_PORT + state.next_port;
                    state.next_port += 1;
                    assigned
                }
            };
            ports.insert(port.key(), host_port);
        }

        if let Some(container) = state.containers.get_mut(id) {
            container.ports = ports;
            container.running = true;
        }
        Ok(())
    }

    async fn expire(&self, id: &str, after: Duration) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("expire".to_string());
        if self.fail_expire {
            return Err(Error::Start {
                container: id.to_string(),
                reason: "could not set expiration: exec failed".to_string(),
            });
        }
        if let Some(container) = state.containers.get_mut(id) {
            container.expiration = Some(after);
        }
        Ok(())
    }

    async fn port_bindings(&self, id: &str) -> Result<HashMap<String, u16>> {
        let mut state = self.lock();
        state.calls.push("port_bindings".to_string());
        state
            .containers
            .get(id)
            .map(|c| c.ports.clone())
            .ok_or_else(|| Error::Start {
                container: id.to_string(),
                reason: "no such container".to_string(),
            })
    }

    async fn purge(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("purge".to_string());
        if self.fail_purge {
            return Err(Error::Cleanup {
                container: id.to_string(),
                reason: "daemon did not answer".to_string(),
            });
        }
        state.containers.remove(id);
        state.seeded.retain(|c| c.id != id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.lock().containers.contains_key(id))
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let state = self.lock();
        let mut listed: Vec<ManagedContainer> = state
            .containers
            .values()
            .filter(|c| c.labels.get(LABEL_MANAGED).map(String::as_str) == Some("true"))
            .map(|c| ManagedContainer {
                id: c.id.clone(),
                name: c.name.clone(),
                labels: c.labels.clone(),
                created_at: None,
                state: Some(if c.running { "running" } else { "created" }.to_string()),
            })
            .collect();
        listed.extend(state.seeded.iter().cloned());
        Ok(listed)
    }
}
