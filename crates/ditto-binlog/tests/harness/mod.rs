//! Test harness for binlog stream tests
//!
//! - `binlog`: builders for raw binlog events and server packets
//! - `scripted`: in-memory connector/transport replaying scripted sessions
//! - `mysql`: MySQL testcontainer for the Docker-backed tests

#![allow(dead_code)]

pub mod binlog;
pub mod mysql;
pub mod scripted;

pub use mysql::MySqlTestContainer;
pub use scripted::{ScriptedConnector, Step};

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("ditto_binlog=debug".parse().unwrap())
                    .add_directive("testcontainers=info".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Event propagation wait time for the Docker-backed tests
pub const EVENT_PROPAGATION_DELAY_MS: u64 = 500;
