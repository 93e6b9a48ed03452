//! Binlog positions and start policies
//!
//! A position is a `(file, offset)` pair. Its text form is `file:offset`,
//! e.g. `mysql-bin.000003:12345`, which is what consumers persist when they
//! checkpoint a stream.

use crate::common::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Offset of the first event in every binlog file (after the 4-byte magic).
pub const BINLOG_START_OFFSET: u64 = 4;

/// A point in the server's binary log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogPosition {
    /// Binlog file name, e.g. `mysql-bin.000003`
    pub file: String,
    /// Byte offset inside `file`
    pub offset: u64,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }

    /// Position of the first event in `file`.
    pub fn start_of(file: impl Into<String>) -> Self {
        Self::new(file, BINLOG_START_OFFSET)
    }

    /// Same file, different offset.
    pub fn with_offset(&self, offset: u64) -> Self {
        Self::new(self.file.clone(), offset)
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

impl FromStr for BinlogPosition {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        let (file, offset) = s
            .rsplit_once(':')
            .ok_or_else(|| CdcError::config(format!("Invalid binlog position '{}'", s)))?;
        if file.is_empty() {
            return Err(CdcError::config(format!(
                "Invalid binlog position '{}': empty file name",
                s
            )));
        }
        let offset = offset.parse::<u64>().map_err(|e| {
            CdcError::config(format!("Invalid binlog position '{}': {}", s, e))
        })?;
        Ok(Self::new(file, offset))
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BinlogPosition {
    /// Binlog file names share a base name and a zero-padded sequence
    /// number, so lexical order is log order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.file
            .cmp(&other.file)
            .then(self.offset.cmp(&other.offset))
    }
}

/// Where a new dump should begin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// The last position recorded by the stream. Without one, fall back to
    /// `Latest` when `resume_stream` is set and `FromStart` otherwise.
    #[default]
    Resume,
    /// Current head of the server's binlog.
    Latest,
    /// Offset 4 of the server's current binlog file.
    FromStart,
    /// A caller-supplied position.
    Explicit(BinlogPosition),
}
