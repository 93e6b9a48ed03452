//! # Shared Building Blocks
//!
//! Database-agnostic pieces used by the replication client:
//!
//! - [`CdcError`] - Error taxonomy with retry classification
//! - [`BinlogPosition`] / [`StartPosition`] - Resume points and start policies
//! - [`Validator`] - Connection parameter validation
//! - [`StreamMetrics`] - Counters mirrored to the `metrics` facade
//! - [`ExponentialBackoff`] - Reconnect pacing

mod error;
mod metrics;
mod position;
mod resilience;
mod validation;

pub use error::{CdcError, ErrorCategory, Result};
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use position::{BinlogPosition, StartPosition, BINLOG_START_OFFSET};
pub use resilience::ExponentialBackoff;
pub use validation::{Validator, CONNECTION_TIMEOUT_SECS, IO_TIMEOUT_SECS, MAX_MESSAGE_SIZE};
