//! Replication stream configuration

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::common::{BinlogPosition, ExponentialBackoff, Result, Validator};

use super::decoder::EventKind;

/// MySQL replication configuration
///
/// # Security Note
///
/// This struct implements a custom Debug that redacts the password field
/// to prevent accidental leakage to logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// MySQL host
    pub host: String,
    /// MySQL port (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Replicated database; row and query events from other schemas are
    /// dropped. `None` delivers every schema.
    pub database: Option<String>,
    /// With no recorded position, start at the server head instead of the
    /// beginning of the current binlog file
    pub resume_stream: bool,
    /// Wait for new events instead of ending the stream at the last one
    pub blocking: bool,
    /// Event kinds to deliver besides row and query events (`None` = all)
    pub only_events: Option<HashSet<EventKind>>,
    /// Server ID for replication (must be unique among all replicas)
    pub server_id: u32,
    /// Initial resume point
    pub start_position: Option<BinlogPosition>,
    /// First reconnect delay
    pub reconnect_backoff_ms: u64,
    /// Reconnect delay cap
    pub max_reconnect_backoff_ms: u64,
    /// Column-name cache capacity (tables)
    pub schema_cache_size: usize,
}

impl std::fmt::Debug for ReplicationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("resume_stream", &self.resume_stream)
            .field("blocking", &self.blocking)
            .field("only_events", &self.only_events)
            .field("server_id", &self.server_id)
            .field("start_position", &self.start_position)
            .field("reconnect_backoff_ms", &self.reconnect_backoff_ms)
            .field("max_reconnect_backoff_ms", &self.max_reconnect_backoff_ms)
            .field("schema_cache_size", &self.schema_cache_size)
            .finish()
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            database: None,
            resume_stream: true,
            blocking: true,
            only_events: None,
            server_id: Self::random_server_id(),
            start_position: None,
            reconnect_backoff_ms: 100,
            max_reconnect_backoff_ms: 30_000,
            schema_cache_size: 1000,
        }
    }
}

impl ReplicationConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_server_id(mut self, server_id: u32) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_resume_stream(mut self, resume_stream: bool) -> Self {
        self.resume_stream = resume_stream;
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_only_events(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.only_events = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_start_position(mut self, position: BinlogPosition) -> Self {
        self.start_position = Some(position);
        self
    }

    pub fn with_reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_backoff_ms = base.as_millis() as u64;
        self.max_reconnect_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_schema_cache_size(mut self, size: usize) -> Self {
        self.schema_cache_size = size;
        self
    }

    /// Random non-zero replica id, so concurrent streams do not collide.
    pub fn random_server_id() -> u32 {
        rand::thread_rng().gen_range(1..=u32::MAX)
    }

    /// Target schema for the event filter
    pub fn target_schema(&self) -> Option<&str> {
        self.database.as_deref().filter(|db| !db.is_empty())
    }

    pub fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.reconnect_backoff_ms),
            Duration::from_millis(self.max_reconnect_backoff_ms),
        )
        .with_jitter(0.1)
    }

    /// Check identifiers and ids before any connection is made.
    pub fn validate(&self) -> Result<()> {
        Validator::validate_host(&self.host)?;
        Validator::validate_user(&self.user)?;
        Validator::validate_server_id(self.server_id)?;
        if let Some(database) = self.target_schema() {
            Validator::validate_identifier(database)?;
        }
        if self.port == 0 {
            return Err(crate::common::CdcError::config("port must be non-zero"));
        }
        if self.reconnect_backoff_ms == 0 {
            return Err(crate::common::CdcError::config(
                "reconnect_backoff_ms must be non-zero",
            ));
        }
        Ok(())
    }

    /// `mysql://` URL for control-plane connections, credentials url-encoded.
    pub(crate) fn connection_url(&self) -> String {
        let user = url::form_urlencoded::byte_serialize(self.user.as_bytes()).collect::<String>();
        let credentials = match self.password.as_deref() {
            Some(password) => format!(
                "{}:{}",
                user,
                url::form_urlencoded::byte_serialize(password.as_bytes()).collect::<String>()
            ),
            None => user,
        };
        format!(
            "mysql://{}@{}:{}/{}",
            credentials,
            self.host,
            self.port,
            self.target_schema().unwrap_or("")
        )
    }
}
