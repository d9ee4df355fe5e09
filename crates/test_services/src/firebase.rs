//! Firebase emulator suite.
//!
//! The emulator image is built from `docker/firebase/Dockerfile`. The project
//! id comes from `projects.default` in `docker/firebase/.firebaserc`.

use std::fs;
use std::path::{Path, PathBuf};

use provisioner::{
    wait_until_ready, AcceptStatus, ContainerRef, Error, ExposedPort, HttpProbe, ImageSource,
    Mount, ProvisionSpec, ProvisioningContext, ReadyDependency, RestartPolicy, Result,
};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::firestore::{FirestoreClient, EMULATOR_HOST_ENV};

#[cfg(test)]
#[path = "firebase_tests.rs"]
mod tests;

pub const EMULATOR_UI_PORT: u16 = 4000;
pub const FIRESTORE_PORT: u16 = 8000;
pub const DATABASE_PORT: u16 = 9000;
pub const AUTH_PORT: u16 = 9099;

/// The parts of `.firebaserc` the emulator needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirebaseRc {
    pub projects: FirebaseProjects,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FirebaseProjects {
    pub default: String,
}

impl FirebaseRc {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|reason| Error::Config {
            key: path.display().to_string(),
            reason,
        })
    }

    fn parse(raw: &str) -> std::result::Result<Self, String> {
        let rc: FirebaseRc =
            serde_json::from_str(raw).map_err(|e| format!("could not parse .firebaserc: {}", e))?;
        if rc.projects.default.trim().is_empty() {
            return Err("projects.default is empty".to_string());
        }
        Ok(rc)
    }

    pub fn default_project(&self) -> &str {
        &self.projects.default
    }
}

/// Build and probe settings for the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseSettings {
    /// Emulator assets, relative to the `docker` directory.
    pub docker_subdir: String,
    pub image_tag: String,
    pub health_path: String,
    pub accept: AcceptStatus,
}

impl Default for FirebaseSettings {
    fn default() -> Self {
        Self {
            docker_subdir: "firebase".to_string(),
            image_tag: "provisioner-firebase:latest".to_string(),
            health_path: "/emulator".to_string(),
            accept: AcceptStatus::Any,
        }
    }
}

impl FirebaseSettings {
    /// Container description for the emulator assets in `firebase_dir`.
    pub fn spec(&self, firebase_dir: &Path) -> ProvisionSpec {
        let mut spec = ProvisionSpec::new(
            "firebase",
            ImageSource::build(firebase_dir, &self.image_tag),
        )
        .cmd(["firebase", "emulators:start"])
        .cap_add("SYS_PTRACE")
        .security_opt("seccomp:unconfined")
        .tty(true)
        .restart_policy(RestartPolicy::No)
        .mount(Mount::new(firebase_dir.join("bin"), "/root/.cache"))
        .mount(Mount::new(firebase_dir.join("config"), "/root/.config"))
        .mount(Mount::new(firebase_dir.join(".firebaserc"), "/opt/.firebaserc"))
        .mount(Mount::new(firebase_dir.join("firebase.json"), "/opt/firebase.json"));
        for port in [EMULATOR_UI_PORT, FIRESTORE_PORT, DATABASE_PORT, AUTH_PORT] {
            spec = spec.port(ExposedPort::tcp(port));
        }
        spec
    }
}

/// A running emulator suite.
#[derive(Debug, Clone)]
pub struct FirebaseEmulator {
    project_id: String,
    container: ContainerRef,
    firestore_host: String,
}

impl FirebaseEmulator {
    fn new(project_id: String, container: ContainerRef) -> Result<Self> {
        let firestore_host = container
            .host_address(&FIRESTORE_PORT.to_string())
            .ok_or_else(|| Error::Start {
                container: container.name().to_string(),
                reason: format!("port {} is not mapped", FIRESTORE_PORT),
            })?;
        Ok(Self {
            project_id,
            container,
            firestore_host,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    /// `host:port` of the Firestore emulator.
    pub fn firestore_host(&self) -> &str {
        &self.firestore_host
    }

    /// The variable and value that point Firestore clients at this emulator.
    pub fn firestore_env(&self) -> (&'static str, &str) {
        (EMULATOR_HOST_ENV, &self.firestore_host)
    }

    /// A Firestore client for the default project.
    pub fn firestore(&self) -> Result<FirestoreClient> {
        FirestoreClient::new(&self.firestore_host, &self.project_id).map_err(|e| {
            Error::Connect {
                kind: "firestore".to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Starts the emulator with the default settings.
pub async fn provision_firebase(
    context: &ProvisioningContext,
) -> Result<ReadyDependency<FirebaseEmulator>> {
    provision_firebase_with(context, &FirebaseSettings::default()).await
}

/// Builds and starts the emulator and waits for its UI endpoint to answer.
#[instrument(skip_all, fields(image = %settings.image_tag))]
pub async fn provision_firebase_with(
    context: &ProvisioningContext,
    settings: &FirebaseSettings,
) -> Result<ReadyDependency<FirebaseEmulator>> {
    let firebase_dir: PathBuf = context
        .assets()
        .resolve_within("docker", &settings.docker_subdir)?;
    let rc = FirebaseRc::from_path(&firebase_dir.join(".firebaserc"))?;

    let mut spec = settings.spec(&firebase_dir);
    if let Some(expiration) = context.config().expiration {
        spec = spec.expire_after(expiration);
    }

    let provisioner = context.provisioner().await?;
    let (container, cleanup) = provisioner.start(spec).await?;

    let policy = context.retry_policy();
    let (emulator, cleanup) = cleanup
        .guard(async {
            let ui_address = container
                .host_address(&EMULATOR_UI_PORT.to_string())
                .ok_or_else(|| Error::Start {
                    container: container.name().to_string(),
                    reason: format!("port {} is not mapped", EMULATOR_UI_PORT),
                })?;
            let probe =
                HttpProbe::for_address(&ui_address, &settings.health_path)?.accept(settings.accept);

            wait_until_ready(&probe, &policy).await?;
            FirebaseEmulator::new(rc.default_project().to_string(), container.clone())
        })
        .await?;

    info!(
        container = %emulator.container().name(),
        project = %emulator.project_id(),
        firestore = %emulator.firestore_host(),
        "Firebase emulator ready"
    );
    Ok(ReadyDependency::new(emulator, cleanup).with_container(container))
}
