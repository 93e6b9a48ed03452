//! MySQL testcontainer harness for binlog stream tests

use anyhow::{Context, Result};
use ditto_binlog::mysql::{MySqlBinlogClient, ReplicationConfig};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mysql::Mysql;
use tokio::time::Duration;
use tracing::info;

const ROOT_PASSWORD: &str = "rootpassword";

/// MySQL test container with row-based binary logging enabled
pub struct MySqlTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Mysql>,
    host: String,
    port: u16,
}

impl MySqlTestContainer {
    pub async fn start() -> Result<Self> {
        info!("Starting MySQL test container...");

        let container = Mysql::default()
            .with_env_var("MYSQL_ROOT_PASSWORD", ROOT_PASSWORD)
            .with_cmd(vec![
                "--server-id=1",
                "--log-bin=mysql-bin",
                "--binlog-format=ROW",
                "--binlog-row-image=FULL",
                // Plain TCP only, so no full caching_sha2 exchange
                "--default-authentication-plugin=mysql_native_password",
            ])
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(3306).await?;

        info!("MySQL container started at {}:{}", host, port);
        Self::wait_for_mysql(&host, port).await?;

        Ok(Self {
            container,
            host,
            port,
        })
    }

    async fn wait_for_mysql(host: &str, port: u16) -> Result<()> {
        let timeout_duration = Duration::from_secs(60);
        let check_interval = Duration::from_millis(500);

        let start = std::time::Instant::now();
        while start.elapsed() < timeout_duration {
            match MySqlBinlogClient::connect(host, port, "root", Some(ROOT_PASSWORD)).await {
                Ok(_) => {
                    info!("MySQL is ready");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("MySQL not ready yet: {}", e);
                    tokio::time::sleep(check_interval).await;
                }
            }
        }

        anyhow::bail!("MySQL did not become ready within {:?}", timeout_duration);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        "root"
    }

    pub fn password(&self) -> &str {
        ROOT_PASSWORD
    }

    /// Execute statements over the replication client's COM_QUERY path
    pub async fn execute_batch(&self, statements: &[&str]) -> Result<()> {
        let mut client =
            MySqlBinlogClient::connect(&self.host, self.port, self.user(), Some(self.password()))
                .await?;

        for stmt in statements {
            client.query(stmt).await?;
        }
        Ok(())
    }

    pub async fn execute(&self, sql: &str) -> Result<()> {
        self.execute_batch(&[sql]).await
    }

    /// Stream configuration for this container
    pub fn replication_config(&self, server_id: u32) -> ReplicationConfig {
        ReplicationConfig::new(&self.host, self.user())
            .with_password(self.password())
            .with_port(self.port)
            .with_server_id(server_id)
    }
}
