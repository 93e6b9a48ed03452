//! # Stream Observability
//!
//! Counters for a binlog stream. Every update is applied to a lock-free
//! atomic (read back through [`StreamMetrics::snapshot`]) and mirrored to the
//! `metrics` crate facade, so any installed recorder (Prometheus, StatsD, ...)
//! picks them up.
//!
//! ## Usage
//!
//! ```ignore
//! use ditto_binlog::common::StreamMetrics;
//! use ditto_binlog::mysql::EventKind;
//!
//! let metrics = StreamMetrics::new("shop");
//! metrics.record_delivered(EventKind::WriteRows, 128, 1_700_000_000);
//!
//! let snapshot = metrics.snapshot();
//! println!("delivered: {}", snapshot.events_delivered);
//! ```

use crate::mysql::EventKind;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Binlog stream metrics collector.
#[derive(Debug)]
pub struct StreamMetrics {
    /// Target schema label (`*` when unfiltered)
    database: String,
    start_time: Instant,

    events_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    queries: AtomicU64,

    events_filtered: AtomicU64,
    events_skipped: AtomicU64,
    decode_errors: AtomicU64,
    unknown_tables: AtomicU64,
    reconnects: AtomicU64,

    connected: AtomicBool,
    /// Timestamp of the last delivered event (binlog header seconds)
    last_event_timestamp: AtomicU64,
}

impl StreamMetrics {
    /// Create a new metrics collector labelled with the target schema.
    pub fn new(database: &str) -> Self {
        Self {
            database: if database.is_empty() {
                "*".to_string()
            } else {
                database.to_string()
            },
            start_time: Instant::now(),

            events_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            queries: AtomicU64::new(0),

            events_filtered: AtomicU64::new(0),
            events_skipped: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            unknown_tables: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),

            connected: AtomicBool::new(false),
            last_event_timestamp: AtomicU64::new(0),
        }
    }

    /// Record an event handed to the consumer.
    #[inline]
    pub fn record_delivered(&self, kind: EventKind, bytes: u64, timestamp: u32) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
        self.last_event_timestamp
            .store(timestamp as u64, Ordering::Relaxed);

        match kind {
            EventKind::WriteRows => {
                self.inserts.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::UpdateRows => {
                self.updates.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::DeleteRows => {
                self.deletes.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::Query => {
                self.queries.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::TableMap => {}
        }

        metrics::counter!(
            "ditto_binlog_events_delivered_total",
            "database" => self.database.clone(),
            "kind" => kind.as_str()
        )
        .increment(1);
        metrics::counter!(
            "ditto_binlog_bytes_delivered_total",
            "database" => self.database.clone()
        )
        .increment(bytes);
    }

    /// Record an event dropped by the filter.
    #[inline]
    pub fn record_filtered(&self, kind: EventKind) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "ditto_binlog_events_filtered_total",
            "database" => self.database.clone(),
            "kind" => kind.as_str()
        )
        .increment(1);
    }

    /// Record a control or unsupported event consumed without delivery.
    #[inline]
    pub fn record_skipped(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "ditto_binlog_events_skipped_total",
            "database" => self.database.clone()
        )
        .increment(1);
    }

    /// Record an event that failed to decode.
    #[inline]
    pub fn record_decode_error(&self, code: &'static str) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        if code == "unknown_table" {
            self.unknown_tables.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!(
            "ditto_binlog_decode_errors_total",
            "database" => self.database.clone(),
            "type" => code
        )
        .increment(1);
    }

    /// Record a reconnect after transport loss.
    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "ditto_binlog_reconnects_total",
            "database" => self.database.clone()
        )
        .increment(1);
    }

    /// Set connection state.
    #[inline]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        metrics::gauge!(
            "ditto_binlog_connected",
            "database" => self.database.clone()
        )
        .set(if connected { 1.0 } else { 0.0 });
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            database: self.database.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),

            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),

            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_tables: self.unknown_tables.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),

            connected: self.connected.load(Ordering::Relaxed),
            last_event_timestamp: self.last_event_timestamp.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub database: String,
    pub uptime_secs: u64,

    // Delivered
    pub events_delivered: u64,
    pub bytes_delivered: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub queries: u64,

    // Dropped
    pub events_filtered: u64,
    pub events_skipped: u64,
    pub decode_errors: u64,
    pub unknown_tables: u64,

    // Health
    pub reconnects: u64,
    pub connected: bool,
    pub last_event_timestamp: u64,
}
