//! Error types for binlog streaming
//!
//! `CdcError` covers everything that can stop or interrupt a stream.
//! Per-event decode failures have their own type ([`crate::mysql::DecodeError`])
//! because they never reach the consumer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Errors reported by the server (ERR packets, rejected commands)
    Database,
    /// Replication protocol errors (framing, unexpected packets)
    Replication,
    /// Schema catalog errors
    Schema,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Network errors (connection, timeout)
    Network,
    /// Other/unknown errors
    Other,
}

/// Binlog streaming errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// Server answered with an ERR packet
    #[error("MySQL error {code} ({sql_state}): {message}")]
    Server {
        code: u16,
        sql_state: String,
        message: String,
    },

    /// Replication protocol violation
    #[error("Replication error: {0}")]
    Replication(String),

    /// Malformed packet framing
    #[error("Codec error: {0}")]
    Codec(#[from] crate::mysql::CodecError),

    /// Schema catalog lookup error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection could not be established
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CdcError {
    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a connection refused error
    pub fn connection_refused(msg: impl Into<String>) -> Self {
        Self::ConnectionRefused(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Check if this error means the replication connection was lost.
    ///
    /// Retriable errors are handled inside the stream by reconnecting from
    /// the last confirmed position; everything else is surfaced.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::ConnectionRefused(_) => true,
            Self::Timeout(_) => true,

            // A frame we cannot parse means the byte stream is out of sync
            Self::Codec(e) => !e.is_local(),

            // 2013 = CR_SERVER_LOST, 1053 = ER_SERVER_SHUTDOWN
            Self::Server { code, .. } => matches!(code, 2013 | 1053),

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                        | ErrorKind::UnexpectedEof
                        | ErrorKind::NotConnected
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Replication(_)
            | Self::Schema(_)
            | Self::Config(_)
            | Self::InvalidState(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Server { .. } => ErrorCategory::Database,
            Self::Replication(_) => ErrorCategory::Replication,
            Self::Codec(_) => ErrorCategory::Replication,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Timeout(_) => ErrorCategory::Network,
            Self::ConnectionClosed => ErrorCategory::Network,
            Self::ConnectionRefused(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Network,
            Self::InvalidState(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Server { .. } => "server_error",
            Self::Replication(_) => "replication_error",
            Self::Codec(_) => "codec_error",
            Self::Schema(_) => "schema_error",
            Self::Config(_) => "config_error",
            Self::Timeout(_) => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::ConnectionRefused(_) => "connection_refused",
            Self::Io(_) => "io_error",
            Self::InvalidState(_) => "invalid_state",
        }
    }
}

/// Result type for binlog streaming operations
pub type Result<T> = std::result::Result<T, CdcError>;
