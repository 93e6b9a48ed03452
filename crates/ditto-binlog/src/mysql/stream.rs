//! Binlog stream controller
//!
//! Owns the replication connection and turns its packets into filtered,
//! positioned [`StreamEvent`]s:
//!
//! ```text
//! transport → codec → decoder (+ table maps) → filter → StreamEvent
//! ```
//!
//! The controller keeps the last confirmed [`BinlogPosition`]. When the
//! transport is lost it reconnects from that position with exponential
//! backoff, without surfacing the failure to the consumer.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::common::{
    BinlogPosition, CdcError, ExponentialBackoff, Result, StartPosition, StreamMetrics,
};

use super::codec::{decode_packet, encode_dump_request, Packet};
use super::config::ReplicationConfig;
use super::decoder::{BinlogDecoder, BinlogEvent, DecodeOutcome, DecodedEvent};
use super::filter::should_emit;
use super::schema::{InformationSchemaLookup, SchemaCache, SchemaLookup};
use super::table_map::{TableMapCache, TableMapEntry};
use super::transport::{MySqlConnector, ReplicationConnector, ReplicationTransport};

/// A delivered event and the position right after it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event: DecodedEvent,
    /// Resume point that skips this event
    pub position: BinlogPosition,
}

/// How a reconnect attempt ended
enum Reopen {
    Opened,
    Cancelled,
    /// The server refused the dump with an ERR packet
    Rejected,
}

/// Connection state of a [`BinlogStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connected,
    /// Terminal
    Closed,
}

/// Pull-based binlog event stream
pub struct BinlogStream<C: ReplicationConnector> {
    config: ReplicationConfig,
    connector: C,
    transport: Option<C::Transport>,
    /// First dump response, read while opening and not yet processed
    pending: Option<Bytes>,
    decoder: BinlogDecoder,
    tables: TableMapCache,
    schema_cache: SchemaCache,
    schema_lookup: Option<Arc<dyn SchemaLookup>>,
    metrics: Arc<StreamMetrics>,
    /// Last confirmed position; the next dump starts here
    position: Option<BinlogPosition>,
    starting_position: Option<BinlogPosition>,
    state: StreamState,
    cancel: CancellationToken,
    backoff: ExponentialBackoff,
}

impl<C: ReplicationConnector> std::fmt::Debug for BinlogStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinlogStream")
            .field("config", &self.config)
            .field("position", &self.position)
            .field("starting_position", &self.starting_position)
            .field("state", &self.state)
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

impl BinlogStream<MySqlConnector> {
    /// Stream from a MySQL server, with column names looked up in
    /// `INFORMATION_SCHEMA`.
    pub fn mysql(config: ReplicationConfig) -> Result<Self> {
        config.validate()?;
        let lookup = InformationSchemaLookup::new(&config)?;
        Ok(Self::new(MySqlConnector::new(config.clone()), config)
            .with_schema_lookup(Arc::new(lookup)))
    }
}

impl<C: ReplicationConnector> BinlogStream<C> {
    pub fn new(connector: C, config: ReplicationConfig) -> Self {
        let metrics = StreamMetrics::new(config.target_schema().unwrap_or("*"));
        Self {
            schema_cache: SchemaCache::with_max_entries(config.schema_cache_size),
            backoff: config.reconnect_backoff(),
            position: config.start_position.clone(),
            connector,
            transport: None,
            pending: None,
            decoder: BinlogDecoder::new(),
            tables: TableMapCache::new(),
            schema_lookup: None,
            metrics: Arc::new(metrics),
            starting_position: None,
            state: StreamState::Disconnected,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Resolve column names on TABLE_MAP; without a lookup rows are keyed
    /// `col0`, `col1`, ...
    pub fn with_schema_lookup(mut self, lookup: Arc<dyn SchemaLookup>) -> Self {
        self.schema_lookup = Some(lookup);
        self
    }

    /// Cancelling `token` closes the stream, including while a read is
    /// blocked.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Position after the last delivered or consumed event.
    pub fn position(&self) -> Option<&BinlogPosition> {
        self.position.as_ref()
    }

    /// Override the resume point. Takes effect on the next (re)connect.
    pub fn set_position(&mut self, position: BinlogPosition) {
        debug!("Resume position set to {}", position);
        self.position = Some(position);
    }

    /// Where the current connection started streaming.
    pub fn starting_position(&self) -> Option<&BinlogPosition> {
        self.starting_position.as_ref()
    }

    /// Current write position of the server.
    pub async fn server_head_position(&self) -> Result<BinlogPosition> {
        self.connector.head_position().await
    }

    /// Open the replication connection and start the dump.
    ///
    /// The server's first answer to the dump request is read here, so a
    /// rejected start position (e.g. a purged binlog file) fails `connect`.
    /// Errors here are returned as-is; reconnects only happen once a stream
    /// has been established.
    pub async fn connect(&mut self, start: StartPosition) -> Result<()> {
        if self.state == StreamState::Closed {
            return Err(CdcError::invalid_state("stream is closed"));
        }
        self.config.validate()?;

        let position = self.resolve_start(start).await?;
        self.open_at(&position).await?;
        self.backoff.reset();
        Ok(())
    }

    async fn resolve_start(&self, start: StartPosition) -> Result<BinlogPosition> {
        let position = match start {
            StartPosition::Resume => match &self.position {
                Some(position) => position.clone(),
                None if self.config.resume_stream => self.server_head_position().await?,
                None => BinlogPosition::start_of(self.server_head_position().await?.file),
            },
            StartPosition::Latest => self.server_head_position().await?,
            StartPosition::FromStart => {
                BinlogPosition::start_of(self.server_head_position().await?.file)
            }
            StartPosition::Explicit(position) => position,
        };
        Ok(position)
    }

    /// Open a transport and send the dump request for `start`.
    async fn open_at(&mut self, start: &BinlogPosition) -> Result<()> {
        let frame = encode_dump_request(start, self.config.server_id, self.config.blocking)?;

        self.release_transport().await;
        let mut transport = self.connector.open().await?;
        let first = match Self::start_dump(&mut transport, frame).await {
            Ok(first) => first,
            Err(e) => {
                transport.close().await.ok();
                return Err(e);
            }
        };

        // The server re-sends FORMAT_DESCRIPTION after every dump request
        self.decoder.reset(transport.checksum_enabled());
        self.transport = Some(transport);
        self.pending = Some(first);
        self.position = Some(start.clone());
        self.starting_position = Some(start.clone());
        self.state = StreamState::Connected;
        self.metrics.set_connected(true);

        info!(
            "Streaming binlog from {} (server_id={}, blocking={})",
            start, self.config.server_id, self.config.blocking
        );
        Ok(())
    }

    /// Send the dump request and read the server's first answer. An ERR
    /// packet here is the server rejecting the request.
    async fn start_dump(transport: &mut C::Transport, frame: Bytes) -> Result<Bytes> {
        transport.send_command(frame).await?;
        let first = transport.read_packet().await?;
        if let Ok(Packet::Error {
            code,
            sql_state,
            message,
        }) = decode_packet(&first)
        {
            return Err(CdcError::Server {
                code,
                sql_state,
                message,
            });
        }
        Ok(first)
    }

    /// Reopen from the last confirmed position, retrying retriable failures
    /// without bound.
    async fn reopen(&mut self, after_loss: bool) -> Result<Reopen> {
        let cancel = self.cancel.clone();
        let mut wait = after_loss;

        loop {
            if wait {
                let delay = self.backoff.next_backoff();
                debug!(
                    "Reconnecting in {:?} (attempt {})",
                    delay,
                    self.backoff.attempt()
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(Reopen::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let Some(start) = self.position.clone() else {
                return Err(CdcError::invalid_state(
                    "stream has no position, call connect() first",
                ));
            };

            match self.open_at(&start).await {
                Ok(()) => return Ok(Reopen::Opened),
                Err(e) if e.is_retriable() => {
                    warn!("Reconnect from {} failed: {}", start, e);
                    wait = true;
                }
                Err(e @ CdcError::Server { .. }) => {
                    warn!("Server rejected dump from {}: {}", start, e);
                    return Ok(Reopen::Rejected);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn on_transport_lost(&mut self, err: CdcError) {
        warn!(
            "Replication connection lost at {}: {}",
            self.position
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            err
        );
        self.release_transport().await;
        self.state = StreamState::Disconnected;
        self.metrics.record_reconnect();
    }

    async fn release_transport(&mut self) {
        self.pending = None;
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Error closing replication transport: {}", e);
            }
        }
        self.metrics.set_connected(false);
    }

    /// Next delivered event.
    ///
    /// Returns `Ok(None)` at the end of the log (non-blocking mode), when the
    /// server ends the dump with an ERR packet (a later call re-dumps from
    /// the current position) and once the stream is closed or cancelled.
    /// Transport loss is handled internally.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        let cancel = self.cancel.clone();
        let mut after_loss = false;

        loop {
            if cancel.is_cancelled() {
                self.close().await?;
                return Ok(None);
            }

            match self.state {
                StreamState::Closed => return Ok(None),
                StreamState::Disconnected => {
                    if self.starting_position.is_none() {
                        return Err(CdcError::invalid_state(
                            "stream is not connected, call connect() first",
                        ));
                    }
                    match self.reopen(after_loss).await? {
                        Reopen::Opened => {}
                        Reopen::Cancelled => {
                            self.close().await?;
                            return Ok(None);
                        }
                        Reopen::Rejected => return Ok(None),
                    }
                    after_loss = false;
                }
                StreamState::Connected => {}
            }

            let read = match self.pending.take() {
                Some(first) => Some(Ok(first)),
                None => {
                    let Some(transport) = self.transport.as_mut() else {
                        self.state = StreamState::Disconnected;
                        continue;
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = transport.read_packet() => Some(result),
                    }
                }
            };
            let raw = match read {
                None => {
                    info!("Binlog stream cancelled");
                    self.close().await?;
                    return Ok(None);
                }
                Some(Ok(raw)) => raw,
                Some(Err(e)) if e.is_retriable() => {
                    self.on_transport_lost(e).await;
                    after_loss = true;
                    continue;
                }
                Some(Err(e)) => {
                    self.release_transport().await;
                    self.state = StreamState::Disconnected;
                    return Err(e);
                }
            };

            let payload = match decode_packet(&raw) {
                Ok(Packet::Event(payload)) => payload,
                Ok(Packet::Eof) => {
                    debug!("End of binlog reached");
                    self.release_transport().await;
                    self.state = StreamState::Disconnected;
                    return Ok(None);
                }
                Ok(Packet::Error {
                    code,
                    sql_state,
                    message,
                }) => {
                    let err = CdcError::Server {
                        code,
                        sql_state,
                        message,
                    };
                    if err.is_retriable() {
                        self.on_transport_lost(err).await;
                        after_loss = true;
                        continue;
                    }
                    warn!("Server ended the binlog dump: {}", err);
                    self.release_transport().await;
                    self.state = StreamState::Disconnected;
                    return Ok(None);
                }
                Err(e) => {
                    self.on_transport_lost(e.into()).await;
                    after_loss = true;
                    continue;
                }
            };
            self.backoff.reset();
            trace!("Binlog packet: {} bytes", payload.len());

            let outcome = match self.decoder.decode(&payload, &mut self.tables) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        "Dropping undecodable event after {}: {}",
                        self.position
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        e
                    );
                    self.metrics.record_decode_error(e.error_code());
                    continue;
                }
            };

            match outcome {
                DecodeOutcome::Skip(header) => {
                    self.metrics.record_skipped();
                    self.advance(header.next_position);
                }
                DecodeOutcome::Rotate(header, rotate) => {
                    // The artificial rotate opening a dump restates the file
                    // being read; the confirmed offset stays
                    let restates_current = header.next_position == 0
                        && self
                            .position
                            .as_ref()
                            .is_some_and(|p| p.file == rotate.next_file);
                    if restates_current {
                        trace!("Dump opened on {}", rotate.next_file);
                        continue;
                    }
                    info!(
                        "Rotating to binlog file {} at {}",
                        rotate.next_file, rotate.position
                    );
                    self.position = Some(BinlogPosition::new(rotate.next_file, rotate.position));
                }
                DecodeOutcome::Event(mut decoded) => {
                    if let BinlogEvent::TableMap(entry) = &mut decoded.event {
                        self.resolve_column_names(entry).await;
                    }

                    let kind = decoded.event.kind();
                    self.advance(decoded.header.next_position);

                    if !should_emit(
                        &decoded.event,
                        self.config.target_schema(),
                        self.config.only_events.as_ref(),
                    ) {
                        trace!("Filtered {} event from '{}'", kind, decoded.event.schema());
                        self.metrics.record_filtered(kind);
                        continue;
                    }

                    self.metrics.record_delivered(
                        kind,
                        payload.len() as u64,
                        decoded.header.timestamp,
                    );
                    debug!(
                        "{} event for '{}' ({} rows)",
                        kind,
                        decoded.event.schema(),
                        decoded.event.row_count()
                    );

                    let Some(position) = self.position.clone() else {
                        return Err(CdcError::invalid_state("stream lost its position"));
                    };
                    return Ok(Some(StreamEvent {
                        event: decoded,
                        position,
                    }));
                }
            }
        }
    }

    /// Move the confirmed position forward within the current file. Zero and
    /// backwards offsets are ignored.
    fn advance(&mut self, next_position: u32) {
        let next = u64::from(next_position);
        if let Some(position) = self.position.as_mut() {
            if next > position.offset {
                position.offset = next;
            }
        }
    }

    /// Attach catalog column facts to a freshly mapped table.
    ///
    /// Cached facts are reused only for the same table id; DDL makes the
    /// server map the table under a new id, which triggers a fresh lookup.
    /// Tables outside the target schema are not looked up; their rows are
    /// filtered anyway.
    async fn resolve_column_names(&mut self, entry: &mut TableMapEntry) {
        let Some(lookup) = self.schema_lookup.clone() else {
            return;
        };
        if self
            .config
            .target_schema()
            .is_some_and(|target| target != entry.schema)
        {
            return;
        }

        let cached = self
            .schema_cache
            .get_columns(&entry.schema, &entry.table, entry.table_id)
            .map(<[_]>::to_vec);
        let columns = match cached {
            Some(columns) => columns,
            None => match lookup.columns(&entry.schema, &entry.table).await {
                Ok(columns) => {
                    self.schema_cache.set_columns(
                        &entry.schema,
                        &entry.table,
                        entry.table_id,
                        columns.clone(),
                    );
                    columns
                }
                Err(e) => {
                    warn!(
                        "Column lookup for {}.{} failed: {}",
                        entry.schema, entry.table, e
                    );
                    return;
                }
            },
        };

        if self.tables.apply_catalog(entry.table_id, &columns) {
            if let Some(named) = self.tables.lookup(entry.table_id) {
                *entry = named.clone();
            }
        } else {
            warn!(
                "Catalog lists {} columns for {}.{}, binlog maps {}; using positional names",
                columns.len(),
                entry.schema,
                entry.table,
                entry.columns.len()
            );
            self.schema_cache.invalidate(&entry.schema, &entry.table);
        }
    }

    /// Release the connection and forget table maps. Idempotent; a closed
    /// stream cannot be reconnected.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        self.release_transport().await;
        self.tables.clear();
        self.decoder.reset(false);
        self.state = StreamState::Closed;
        info!(
            "Binlog stream closed at {}",
            self.position
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        );
        Ok(())
    }
}
