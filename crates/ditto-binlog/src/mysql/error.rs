//! MySQL replication error types

use thiserror::Error;

/// Framing errors from the wire codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes for the envelope or its declared payload
    #[error("Truncated packet: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Envelope with an empty payload
    #[error("Empty packet payload")]
    EmptyPayload,

    /// Payload starts with a byte that is neither OK, EOF nor ERR
    #[error("Unexpected packet marker 0x{0:02X}")]
    UnexpectedMarker(u8),

    /// Command frame larger than a single packet
    #[error("Command frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Start offset does not fit the 4-byte dump field
    #[error("Binlog offset {0} does not fit COM_BINLOG_DUMP")]
    OffsetOutOfRange(u64),
}

impl CodecError {
    /// True for errors raised while building a frame locally.
    ///
    /// These are programming errors; everything else means the incoming
    /// byte stream is broken.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::FrameTooLarge(_) | Self::OffsetOutOfRange(_))
    }
}

/// Per-event decode failures
///
/// A decode error drops the single event it was raised for; the stream
/// keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before a field could be read
    #[error("Truncated event: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// Event shorter than the common header
    #[error("Event header too short: {0} bytes")]
    HeaderTooShort(usize),

    /// Rows event for a table id with no cached table map
    #[error("No table map for table_id={0}")]
    UnknownTable(u64),

    /// Rows event column count differs from the cached table map
    #[error("Column count mismatch for table_id={table_id}: table map has {expected}, event has {actual}")]
    ColumnCountMismatch {
        table_id: u64,
        expected: usize,
        actual: usize,
    },

    /// Column type code the row decoder cannot interpret
    #[error("Unsupported column type {0}")]
    UnsupportedColumnType(u8),

    /// Invalid length-encoded integer prefix
    #[error("Invalid length-encoded integer prefix 0x{0:02X}")]
    InvalidLengthPrefix(u8),

    /// Any other structural problem
    #[error("Malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

impl DecodeError {
    /// Create a malformed-payload error
    pub fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }

    /// Metric-safe error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::HeaderTooShort(_) => "header_too_short",
            Self::UnknownTable(_) => "unknown_table",
            Self::ColumnCountMismatch { .. } => "column_count_mismatch",
            Self::UnsupportedColumnType(_) => "unsupported_column_type",
            Self::InvalidLengthPrefix(_) => "invalid_length_prefix",
            Self::Malformed { .. } => "malformed",
        }
    }
}
