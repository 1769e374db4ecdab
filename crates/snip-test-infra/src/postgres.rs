use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const POSTGRES_PORT: u16 = 5432;

/// Logged by the server once it accepts connections. The entrypoint starts a
/// temporary server for initialisation first, so it appears on both streams.
const READY_MESSAGE: &str = "database system is ready to accept connections";

#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "16-alpine".to_string(), setter(into))]
    image_tag: String,
    #[builder(default = "snip".to_string(), setter(into))]
    database: String,
    #[builder(default = "snip".to_string(), setter(into))]
    user: String,
    #[builder(default = "snip".to_string(), setter(into))]
    password: String,
}

impl PostgresConfig {
    fn url_for(&self, host: &str, port: u16) -> String {
        format!(
            "postgres://{}:{}@{host}:{port}/{}",
            self.user, self.password, self.database
        )
    }
}

/// A PostgreSQL server in a throwaway container.
///
/// The connection URL is resolved once at startup. The container is removed
/// when the server is dropped.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    database_url: String,
}

impl PostgresServer {
    pub async fn start(config: PostgresConfig) -> Result<Self> {
        let container = GenericImage::new("postgres", config.image_tag.as_str())
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout(READY_MESSAGE))
            .with_wait_for(WaitFor::message_on_stderr(READY_MESSAGE))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.user.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(POSTGRES_PORT).await?;
        let database_url = config.url_for(&host, port);

        Ok(Self {
            container,
            database_url,
        })
    }

    /// Starts a server with the default database, user and password.
    pub async fn start_default() -> Result<Self> {
        Self::start(PostgresConfig::builder().build()).await
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
