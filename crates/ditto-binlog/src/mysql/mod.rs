//! MySQL/MariaDB binary log replication
//!
//! Supports:
//! - MySQL 5.6+, 8.0+
//! - MariaDB 10.2+
//! - Row-based replication (binlog_format=ROW)
//! - Schema filtering and event-kind allow-lists
//! - Column names from `INFORMATION_SCHEMA`
//! - Resume from a recorded position, reconnect on transport loss
//!
//! # Architecture
//!
//! ```text
//! MySqlBinlogClient → codec → BinlogDecoder (+ TableMapCache) → should_emit → StreamEvent
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use ditto_binlog::common::StartPosition;
//! use ditto_binlog::mysql::{BinlogStream, ReplicationConfig};
//!
//! # async fn example() -> ditto_binlog::Result<()> {
//! let config = ReplicationConfig::new("localhost", "repl")
//!     .with_password("password")
//!     .with_database("shop")
//!     .with_server_id(1001);
//!
//! let mut stream = BinlogStream::mysql(config)?;
//! stream.connect(StartPosition::Resume).await?;
//! while let Some(event) = stream.next_event().await? {
//!     println!("{} at {}", event.event.event.kind(), event.position);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod reader;
pub mod schema;
pub mod stream;
pub mod table_map;
pub mod transport;
pub mod value;

pub use codec::Packet;
pub use config::ReplicationConfig;
pub use decoder::{
    BinlogDecoder, BinlogEvent, DecodeOutcome, DecodedEvent, EventHeader, EventKind, EventType,
    QueryEvent, RotateEvent, RowImage, RowsEvent, UpdateRowsEvent, UpdatedRow,
};
pub use error::{CodecError, DecodeError};
pub use filter::should_emit;
pub use protocol::MySqlBinlogClient;
pub use schema::{CatalogColumn, InformationSchemaLookup, SchemaCache, SchemaLookup};
pub use stream::{BinlogStream, StreamEvent, StreamState};
pub use table_map::{ColumnDescriptor, ColumnType, TableMapCache, TableMapEntry, TableRef};
pub use transport::{MySqlConnector, ReplicationConnector, ReplicationTransport};
pub use value::ColumnValue;
