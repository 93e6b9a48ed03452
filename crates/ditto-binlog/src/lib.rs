//! # ditto-binlog - MySQL binary log streaming
//!
//! Opens a replication connection to a MySQL or MariaDB server, issues
//! `COM_BINLOG_DUMP` and turns the binary log into typed, filtered,
//! resumable change events.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌───────────┐   ┌───────────────┐   ┌──────────┐
//! │ Replication    │──▶│  Codec    │──▶│ BinlogDecoder │──▶│  Filter  │
//! │ transport      │   │ (packets) │   │ + table maps  │   │          │
//! └────────────────┘   └───────────┘   └───────────────┘   └────┬─────┘
//!         ▲                                                     │
//!         │ reconnect from last position                        ▼
//! ┌───────┴──────────────────────────────────────────────────────────┐
//! │                        BinlogStream                              │
//! │   next_event() → StreamEvent { event, position }                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ditto_binlog::{BinlogStream, ReplicationConfig, StartPosition};
//!
//! # async fn example() -> ditto_binlog::Result<()> {
//! let config = ReplicationConfig::new("localhost", "repl")
//!     .with_password("secret")
//!     .with_database("shop")
//!     .with_blocking(false);
//!
//! let mut stream = BinlogStream::mysql(config)?;
//! stream.connect(StartPosition::FromStart).await?;
//! while let Some(event) = stream.next_event().await? {
//!     // Persist `event.position` to resume after a restart
//!     println!("{:?}", event.event.event);
//! }
//! stream.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API Organization
//!
//! - Crate root: the stream, its configuration and the event types
//! - [`mysql`]: protocol client, codec, decoder and the transport traits
//! - [`common`]: errors, positions, metrics, validation and backoff

pub mod common;
pub mod mysql;

pub use common::{
    BinlogPosition, CdcError, ErrorCategory, MetricsSnapshot, Result, StartPosition,
    StreamMetrics,
};
pub use mysql::{
    BinlogEvent, BinlogStream, ColumnValue, DecodeError, DecodedEvent, EventKind,
    ReplicationConfig, RowImage, StreamEvent, StreamState,
};
