//! Declarative description of a container to provision.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Error, Result};

#[cfg(test)]
#[path = "provision_spec_tests.rs"]
mod tests;

/// Where the container image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A pre-built image, pulled when not present locally.
    Pull { repository: String, tag: String },

    /// An image built from a local Dockerfile.
    Build {
        /// Directory sent to the daemon as the build context.
        context_dir: PathBuf,
        /// Dockerfile path relative to the context directory.
        dockerfile: String,
        /// Tag applied to the built image.
        tag: String,
    },
}

impl ImageSource {
    pub fn pull(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        ImageSource::Pull {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    pub fn build(context_dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        ImageSource::Build {
            context_dir: context_dir.into(),
            dockerfile: "Dockerfile".to_string(),
            tag: tag.into(),
        }
    }

    /// The image reference containers are created from.
    pub fn image_name(&self) -> String {
        match self {
            ImageSource::Pull { repository, tag } => format!("{}:{}", repository, tag),
            ImageSource::Build { tag, .. } => tag.clone(),
        }
    }
}

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Formats the mount in the daemon's `host:container[:ro]` bind syntax.
    pub fn bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A container port published to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExposedPort {
    pub container_port: u16,
    pub protocol: Protocol,
    /// Fixed host port; `None` lets the daemon pick a free one.
    pub host_port: Option<u16>,
}

impl ExposedPort {
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Tcp,
            host_port: None,
        }
    }

    pub fn on_host_port(mut self, host_port: u16) -> Self {
        self.host_port = Some(host_port);
        self
    }

    /// The daemon's key for this port, e.g. `3306/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl FromStr for ExposedPort {
    type Err = Error;

    /// Parses `"<port>"` or `"<port>/<tcp|udp>"`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Config {
            key: "exposed port".to_string(),
            reason: format!("'{}': {}", s, reason),
        };

        let (port, protocol) = match s.split_once('/') {
            Some((port, "tcp")) => (port, Protocol::Tcp),
            Some((port, "udp")) => (port, Protocol::Udp),
            Some(_) => return Err(invalid("protocol must be tcp or udp")),
            None => (s, Protocol::Tcp),
        };
        let container_port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self {
            container_port,
            protocol,
            host_port: None,
        })
    }
}

/// What the daemon does when the container exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Never restart. A dependency that fails to start fails the run.
    #[default]
    No,
    OnFailure { max_retries: i64 },
    UnlessStopped,
    Always,
}

/// Everything needed to start one dependency container.
///
/// Built by the caller with the chained setters and consumed once by
/// [`crate::ContainerProvisioner::start`].
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    /// Logical dependency kind, e.g. `mysql`. Used for naming and labels.
    pub kind: String,
    pub image: ImageSource,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub ports: Vec<ExposedPort>,
    pub cmd: Option<Vec<String>>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub tty: bool,
    pub restart_policy: RestartPolicy,
    pub auto_remove: bool,
    /// Wall-clock lifetime after which the container is torn down even if
    /// nobody releases it.
    pub expiration: Option<Duration>,
    pub labels: BTreeMap<String, String>,
}

impl ProvisionSpec {
    pub fn new(kind: impl Into<String>, image: ImageSource) -> Self {
        Self {
            kind: kind.into(),
            image,
            env: BTreeMap::new(),
            mounts: Vec::new(),
            ports: Vec::new(),
            cmd: None,
            cap_add: Vec::new(),
            security_opt: Vec::new(),
            tty: false,
            restart_policy: RestartPolicy::No,
            auto_remove: false,
            expiration: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn port(mut self, port: ExposedPort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    pub fn cap_add(mut self, capability: impl Into<String>) -> Self {
        self.cap_add.push(capability.into());
        self
    }

    pub fn security_opt(mut self, option: impl Into<String>) -> Self {
        self.security_opt.push(option.into());
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    pub fn expire_after(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Environment in the daemon's `KEY=value` form.
    pub fn env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    /// Bind strings for all mounts.
    pub fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(Mount::bind).collect()
    }
}
