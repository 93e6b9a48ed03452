//! Replication transport seams
//!
//! The stream controller talks to the server only through these traits, so
//! the read loop can be driven by the real protocol client or by a scripted
//! transport in tests.

use async_trait::async_trait;
use bytes::Bytes;
use mysql_async::prelude::*;
use tracing::{debug, info};

use crate::common::{BinlogPosition, CdcError, Result};

use super::config::ReplicationConfig;
use super::protocol::{into_cdc_error, MySqlBinlogClient};

/// Raw packet I/O on an established replication connection
#[async_trait]
pub trait ReplicationTransport: Send {
    /// Write an already framed command (envelope included).
    async fn send_command(&mut self, frame: Bytes) -> Result<()>;

    /// Read one framed packet. Payloads split across several envelopes are
    /// returned merged behind a single header.
    async fn read_packet(&mut self) -> Result<Bytes>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&mut self) -> Result<()>;

    /// Whether the session negotiated CRC32 event checksums. Events sent
    /// before the first FORMAT_DESCRIPTION (the artificial ROTATE) already
    /// carry one when this is set.
    fn checksum_enabled(&self) -> bool;
}

/// Opens replication connections and answers control-plane questions
#[async_trait]
pub trait ReplicationConnector: Send + Sync {
    type Transport: ReplicationTransport;

    /// Connect, authenticate and prepare the session for a dump: checksum
    /// negotiation and replica registration.
    async fn open(&self) -> Result<Self::Transport>;

    /// Current write position of the server.
    async fn head_position(&self) -> Result<BinlogPosition>;
}

/// [`ReplicationConnector`] for a real MySQL or MariaDB server
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    config: ReplicationConfig,
}

impl MySqlConnector {
    pub fn new(config: ReplicationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    async fn open_client(&self) -> anyhow::Result<MySqlBinlogClient> {
        let mut client = MySqlBinlogClient::connect(
            &self.config.host,
            self.config.port,
            &self.config.user,
            self.config.password.as_deref(),
        )
        .await?;

        client.negotiate_checksum().await?;
        client.register_replica(self.config.server_id).await?;
        Ok(client)
    }
}

#[async_trait]
impl ReplicationConnector for MySqlConnector {
    type Transport = MySqlBinlogClient;

    async fn open(&self) -> Result<MySqlBinlogClient> {
        self.open_client().await.map_err(into_cdc_error)
    }

    /// Uses a regular `mysql_async` connection, since the replication client
    /// does not read result sets. `SHOW BINARY LOG STATUS` (MySQL 8.2+) is
    /// tried first, then `SHOW MASTER STATUS`.
    async fn head_position(&self) -> Result<BinlogPosition> {
        let opts = mysql_async::Opts::from_url(&self.config.connection_url())
            .map_err(|e| CdcError::config(format!("Invalid MySQL connection options: {}", e)))?;
        let mut conn = mysql_async::Conn::new(opts).await.map_err(|e| {
            CdcError::connection_refused(format!("Failed to connect for binlog position: {}", e))
        })?;

        let rows: Vec<mysql_async::Row> = match conn.query("SHOW BINARY LOG STATUS").await {
            Ok(rows) => rows,
            Err(e) => {
                debug!("SHOW BINARY LOG STATUS failed, falling back: {}", e);
                conn.query("SHOW MASTER STATUS").await.map_err(|e| {
                    CdcError::replication(format!("Failed to query binlog position: {}", e))
                })?
            }
        };

        if let Err(e) = conn.disconnect().await {
            debug!("Error closing position query connection: {}", e);
        }

        let row = rows.into_iter().next().ok_or_else(|| {
            CdcError::replication(
                "SHOW MASTER STATUS returned no rows, binary logging may be disabled",
            )
        })?;
        let file: String = row.get(0).unwrap_or_default();
        let offset: u64 = row.get(1).unwrap_or(crate::common::BINLOG_START_OFFSET);

        if file.is_empty() {
            return Err(CdcError::replication(
                "SHOW MASTER STATUS returned an empty file name, binary logging may be disabled",
            ));
        }

        let position = BinlogPosition::new(file, offset);
        info!("Current binlog position: {}", position);
        Ok(position)
    }
}
