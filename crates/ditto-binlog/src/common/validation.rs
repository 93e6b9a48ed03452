//! Input validation for replication settings
//!
//! Protects against:
//! - SQL injection via identifier validation (schema names end up in
//!   catalog queries)
//! - Resource exhaustion via packet size limits

use crate::common::{CdcError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum identifier length accepted by MySQL
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Maximum MySQL user name length
const MAX_USER_LENGTH: usize = 32;

/// Largest packet payload accepted from the server (`max_allowed_packet` ceiling, 1 GiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;

/// Connect timeout (30 seconds)
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Timeout for handshake and session-setup round trips (60 seconds)
pub const IO_TIMEOUT_SECS: u64 = 60;

/// Regex for validating SQL identifiers
static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]{0,63}$").expect("identifier regex is valid")
});

/// Regex for validating MySQL account names
static USER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.\-]{0,31}$").expect("user regex is valid")
});

/// Validator for replication inputs
pub struct Validator;

impl Validator {
    /// Validate a SQL identifier (schema or table name)
    ///
    /// # Security
    ///
    /// Prevents SQL injection by rejecting:
    /// - Empty strings
    /// - Strings starting with numbers
    /// - Special characters (quotes, semicolons, etc.)
    /// - Excessively long strings
    pub fn validate_identifier(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CdcError::config("Identifier cannot be empty"));
        }

        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(CdcError::config(format!(
                "Identifier too long: {} chars (max: {})",
                name.len(),
                MAX_IDENTIFIER_LENGTH
            )));
        }

        if !IDENTIFIER_REGEX.is_match(name) {
            return Err(CdcError::config(format!(
                "Invalid identifier '{}': must start with letter/underscore and contain only alphanumeric characters, underscores and '$'",
                name
            )));
        }

        Ok(())
    }

    /// Validate a MySQL account name
    pub fn validate_user(user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(CdcError::config("User cannot be empty"));
        }

        if user.len() > MAX_USER_LENGTH {
            return Err(CdcError::config(format!(
                "User name too long: {} chars (max: {})",
                user.len(),
                MAX_USER_LENGTH
            )));
        }

        if !USER_REGEX.is_match(user) {
            return Err(CdcError::config(format!("Invalid user name '{}'", user)));
        }

        Ok(())
    }

    /// Validate a host name or address
    pub fn validate_host(host: &str) -> Result<()> {
        if host.trim().is_empty() {
            return Err(CdcError::config("Host cannot be empty"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(CdcError::config(format!("Invalid host '{}'", host)));
        }
        Ok(())
    }

    /// Validate a replica server id
    ///
    /// Zero is reserved: a server with `server_id = 0` refuses to act as a
    /// replica.
    pub fn validate_server_id(server_id: u32) -> Result<()> {
        if server_id == 0 {
            return Err(CdcError::config("server_id must be non-zero"));
        }
        Ok(())
    }

    /// Validate message size
    pub fn validate_message_size(size: usize) -> Result<()> {
        if size > MAX_MESSAGE_SIZE {
            return Err(CdcError::replication(format!(
                "Message size {} bytes exceeds maximum {}",
                size, MAX_MESSAGE_SIZE
            )));
        }
        Ok(())
    }
}
