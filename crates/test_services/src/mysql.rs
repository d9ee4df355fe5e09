//! Throwaway MySQL server.
//!
//! The container is initialised with `schema.sql`, found by searching upward
//! from the test's working directory, and the custom server configuration
//! under `docker/mysql/conf.d/`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use provisioner::{
    wait_until_ready, Error, ExposedPort, ImageSource, Mount, ProbeError, ProvisionSpec,
    ProvisioningContext, ReadinessProbe, ReadyDependency, RestartPolicy, Result,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::Connection;
use tracing::{info, instrument};

#[cfg(test)]
#[path = "mysql_tests.rs"]
mod tests;

pub const MYSQL_PORT: u16 = 3306;

/// Image, credentials and fixture locations for the MySQL dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlSettings {
    pub repository: String,
    pub tag: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub root_password: String,
    /// Schema file, found by upward search.
    pub schema_asset: String,
    /// Server configuration, relative to the `docker` directory.
    pub config_asset: String,
    pub max_connections: u32,
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self {
            repository: "mysql".to_string(),
            tag: "8.0".to_string(),
            database: "sample_db".to_string(),
            user: "user".to_string(),
            password: "password".to_string(),
            root_password: "password".to_string(),
            schema_asset: "schema.sql".to_string(),
            config_asset: "mysql/conf.d/my_custom.cnf".to_string(),
            max_connections: 5,
        }
    }
}

impl MySqlSettings {
    /// Container description for the given fixture files.
    pub fn spec(&self, schema: &Path, server_config: &Path) -> ProvisionSpec {
        ProvisionSpec::new("mysql", ImageSource::pull(&self.repository, &self.tag))
            .env("MYSQL_DATABASE", &self.database)
            .env("MYSQL_USER", &self.user)
            .env("MYSQL_PASSWORD", &self.password)
            .env("MYSQL_ROOT_PASSWORD", &self.root_password)
            .mount(Mount::new(schema, "/docker-entrypoint-initdb.d/00_schema.sql"))
            .mount(Mount::new(server_config, "/etc/mysql/conf.d/my.cnf").read_only())
            .port(ExposedPort::tcp(MYSQL_PORT))
            .auto_remove(true)
            .restart_policy(RestartPolicy::No)
    }

    pub fn connect_options(&self, host: &str, port: u16) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

/// Ready when a fresh connection can be opened and pinged.
#[derive(Debug, Clone)]
pub struct MySqlPingProbe {
    target: String,
    options: MySqlConnectOptions,
}

impl MySqlPingProbe {
    pub fn new(target: impl Into<String>, options: MySqlConnectOptions) -> Self {
        Self {
            target: target.into(),
            options,
        }
    }
}

#[async_trait]
impl ReadinessProbe for MySqlPingProbe {
    fn target(&self) -> String {
        self.target.clone()
    }

    async fn check(&self) -> std::result::Result<(), ProbeError> {
        let mut connection = MySqlConnection::connect_with(&self.options).await?;
        connection.ping().await?;
        connection.close().await?;
        Ok(())
    }
}

/// Opens a connection pool against a ready server.
pub async fn connect_pool(options: MySqlConnectOptions, max_connections: u32) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(|e| Error::Connect {
            kind: "mysql".to_string(),
            reason: e.to_string(),
        })
}

/// Starts MySQL with the default settings.
pub async fn provision_mysql(context: &ProvisioningContext) -> Result<ReadyDependency<MySqlPool>> {
    provision_mysql_with(context, &MySqlSettings::default()).await
}

/// Starts MySQL, waits until it accepts connections and returns a pool.
#[instrument(skip_all, fields(image = %format!("{}:{}", settings.repository, settings.tag)))]
pub async fn provision_mysql_with(
    context: &ProvisioningContext,
    settings: &MySqlSettings,
) -> Result<ReadyDependency<MySqlPool>> {
    let schema = context.assets().resolve(&settings.schema_asset)?;
    let server_config = context
        .assets()
        .resolve_within("docker", &settings.config_asset)?;

    let mut spec = settings.spec(schema.path(), &server_config);
    if let Some(expiration) = context.config().expiration {
        spec = spec.expire_after(expiration);
    }

    let provisioner = context.provisioner().await?;
    let (container, cleanup) = provisioner.start(spec).await?;

    let policy = context.retry_policy();
    let (pool, cleanup) = cleanup
        .guard(async {
            let port = container
                .host_port(&MYSQL_PORT.to_string())
                .ok_or_else(|| Error::Start {
                    container: container.name().to_string(),
                    reason: format!("port {} is not mapped", MYSQL_PORT),
                })?;
            let options = settings.connect_options(container.host(), port);
            let probe = MySqlPingProbe::new(
                format!("mysql at {}:{}", container.host(), port),
                options.clone(),
            );

            wait_until_ready(&probe, &policy).await?;
            connect_pool(options, settings.max_connections).await
        })
        .await?;

    info!(container = %container.name(), "MySQL ready");
    Ok(ReadyDependency::new(pool, cleanup).with_container(container))
}
