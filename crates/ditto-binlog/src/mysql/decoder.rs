//! MySQL binlog event decoder
//!
//! Decodes MySQL binary log events:
//! - FORMAT_DESCRIPTION_EVENT (checksum negotiation only)
//! - ROTATE_EVENT
//! - TABLE_MAP_EVENT
//! - WRITE_ROWS_EVENT (v1 and v2)
//! - UPDATE_ROWS_EVENT (v1 and v2)
//! - DELETE_ROWS_EVENT (v1 and v2)
//! - QUERY_EVENT
//!
//! Everything else (XID, GTID, heartbeats, ...) is consumed as a skip so the
//! caller can still advance its position past it.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::{debug, trace};

use super::error::DecodeError;
use super::reader::{is_bit_set, PayloadReader};
use super::table_map::{ColumnDescriptor, ColumnType, TableMapCache, TableMapEntry, TableRef};
use super::value::{decode_value, ColumnValue};

/// Binlog event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0,
    StartEventV3 = 1,
    QueryEvent = 2,
    StopEvent = 3,
    RotateEvent = 4,
    IntvarEvent = 5,
    RandEvent = 13,
    UserVarEvent = 14,
    FormatDescriptionEvent = 15,
    XidEvent = 16,
    TableMapEvent = 19,
    WriteRowsEventV1 = 23,
    UpdateRowsEventV1 = 24,
    DeleteRowsEventV1 = 25,
    IncidentEvent = 26,
    HeartbeatLogEvent = 27,
    IgnorableLogEvent = 28,
    RowsQueryLogEvent = 29,
    WriteRowsEventV2 = 30,
    UpdateRowsEventV2 = 31,
    DeleteRowsEventV2 = 32,
    GtidLogEvent = 33,
    AnonymousGtidLogEvent = 34,
    PreviousGtidsLogEvent = 35,
    TransactionContextEvent = 36,
    ViewChangeEvent = 37,
    XaPrepareLogEvent = 38,
    PartialUpdateRowsEvent = 39,
    TransactionPayloadEvent = 40,
}

impl EventType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => EventType::StartEventV3,
            2 => EventType::QueryEvent,
            3 => EventType::StopEvent,
            4 => EventType::RotateEvent,
            5 => EventType::IntvarEvent,
            13 => EventType::RandEvent,
            14 => EventType::UserVarEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            23 => EventType::WriteRowsEventV1,
            24 => EventType::UpdateRowsEventV1,
            25 => EventType::DeleteRowsEventV1,
            26 => EventType::IncidentEvent,
            27 => EventType::HeartbeatLogEvent,
            28 => EventType::IgnorableLogEvent,
            29 => EventType::RowsQueryLogEvent,
            30 => EventType::WriteRowsEventV2,
            31 => EventType::UpdateRowsEventV2,
            32 => EventType::DeleteRowsEventV2,
            33 => EventType::GtidLogEvent,
            34 => EventType::AnonymousGtidLogEvent,
            35 => EventType::PreviousGtidsLogEvent,
            36 => EventType::TransactionContextEvent,
            37 => EventType::ViewChangeEvent,
            38 => EventType::XaPrepareLogEvent,
            39 => EventType::PartialUpdateRowsEvent,
            40 => EventType::TransactionPayloadEvent,
            _ => EventType::Unknown,
        }
    }

    pub fn is_row_event(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsEventV1
                | EventType::WriteRowsEventV2
                | EventType::UpdateRowsEventV1
                | EventType::UpdateRowsEventV2
                | EventType::DeleteRowsEventV1
                | EventType::DeleteRowsEventV2
        )
    }

    /// v2 rows events carry an extra-data block after the flags.
    fn has_extra_data(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsEventV2
                | EventType::UpdateRowsEventV2
                | EventType::DeleteRowsEventV2
        )
    }
}

/// Binlog event header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    /// Raw type code; see [`EventHeader::event_type`]
    pub type_code: u8,
    pub server_id: u32,
    pub event_length: u32,
    /// Offset of the next event in the current file (0 for artificial events)
    pub next_position: u32,
    pub flags: u16,
}

impl EventHeader {
    pub const SIZE: usize = 19;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::HeaderTooShort(data.len()));
        }

        let mut reader = PayloadReader::new(data);
        Ok(Self {
            timestamp: reader.u32_le()?,
            type_code: reader.u8()?,
            server_id: reader.u32_le()?,
            event_length: reader.u32_le()?,
            next_position: reader.u32_le()?,
            flags: reader.u16_le()?,
        })
    }

    pub fn event_type(&self) -> EventType {
        EventType::from_u8(self.type_code)
    }
}

/// Kinds of events that can reach the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Query,
    TableMap,
    WriteRows,
    UpdateRows,
    DeleteRows,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Query => "query",
            EventKind::TableMap => "table_map",
            EventKind::WriteRows => "write_rows",
            EventKind::UpdateRows => "update_rows",
            EventKind::DeleteRows => "delete_rows",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row image, in table column order.
///
/// Columns missing from the event's present-columns bitmap are omitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowImage {
    columns: Vec<(String, ColumnValue)>,
}

impl RowImage {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: ColumnValue) {
        self.columns.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `{column: value}` object.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

/// Inserted or deleted rows
#[derive(Debug, Clone, PartialEq)]
pub struct RowsEvent {
    pub table: TableRef,
    pub flags: u16,
    pub rows: Vec<RowImage>,
}

/// Before and after images of one updated row
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedRow {
    pub before: RowImage,
    pub after: RowImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRowsEvent {
    pub table: TableRef,
    pub flags: u16,
    pub rows: Vec<UpdatedRow>,
}

/// Statement event (DDL and statement-based DML)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    /// Default schema of the session that ran the statement
    pub schema: String,
    pub statement: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotateEvent {
    pub position: u64,
    pub next_file: String,
}

/// Format description event
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    /// 0 = NONE, 1 = CRC32
    pub checksum_alg: u8,
}

/// Decoded binlog event
#[derive(Debug, Clone, PartialEq)]
pub enum BinlogEvent {
    Query(QueryEvent),
    TableMap(TableMapEntry),
    WriteRows(RowsEvent),
    UpdateRows(UpdateRowsEvent),
    DeleteRows(RowsEvent),
}

impl BinlogEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BinlogEvent::Query(_) => EventKind::Query,
            BinlogEvent::TableMap(_) => EventKind::TableMap,
            BinlogEvent::WriteRows(_) => EventKind::WriteRows,
            BinlogEvent::UpdateRows(_) => EventKind::UpdateRows,
            BinlogEvent::DeleteRows(_) => EventKind::DeleteRows,
        }
    }

    /// Schema the event belongs to.
    pub fn schema(&self) -> &str {
        match self {
            BinlogEvent::Query(event) => &event.schema,
            BinlogEvent::TableMap(entry) => &entry.schema,
            BinlogEvent::WriteRows(event) | BinlogEvent::DeleteRows(event) => &event.table.schema,
            BinlogEvent::UpdateRows(event) => &event.table.schema,
        }
    }

    /// Number of row images carried (0 for non-row events).
    pub fn row_count(&self) -> usize {
        match self {
            BinlogEvent::WriteRows(event) | BinlogEvent::DeleteRows(event) => event.rows.len(),
            BinlogEvent::UpdateRows(event) => event.rows.len(),
            _ => 0,
        }
    }
}

/// A decoded event together with its header
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub header: EventHeader,
    pub event: BinlogEvent,
}

/// Result of decoding one event payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Event for the filter and, if accepted, the consumer
    Event(DecodedEvent),
    /// Switch to another binlog file
    Rotate(EventHeader, RotateEvent),
    /// Valid event with nothing to surface
    Skip(EventHeader),
}

/// Fixed part of the FORMAT_DESCRIPTION body:
/// binlog_version(2) + server_version(50) + create_timestamp(4) + header_length(1)
const FDE_FIXED_LEN: usize = 57;
const SERVER_VERSION_LEN: usize = 50;
const CHECKSUM_LEN: usize = 4;
const CHECKSUM_ALG_CRC32: u8 = 1;

/// Stateful event decoder.
///
/// Holds the checksum setting announced by the last FORMAT_DESCRIPTION event;
/// table layouts live in the caller's [`TableMapCache`].
#[derive(Debug, Default)]
pub struct BinlogDecoder {
    format: Option<FormatDescription>,
    /// Checksum setting negotiated for the session, used until the first
    /// FORMAT_DESCRIPTION arrives
    negotiated_checksum: bool,
}

impl BinlogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder for a session that negotiated CRC32 checksums (or not).
    pub fn with_negotiated_checksum(checksum: bool) -> Self {
        Self {
            format: None,
            negotiated_checksum: checksum,
        }
    }

    /// Last FORMAT_DESCRIPTION seen on this connection
    pub fn format(&self) -> Option<&FormatDescription> {
        self.format.as_ref()
    }

    pub fn checksum_enabled(&self) -> bool {
        match &self.format {
            Some(format) => format.checksum_alg == CHECKSUM_ALG_CRC32,
            None => self.negotiated_checksum,
        }
    }

    /// Forget connection state for a new dump. The server re-sends
    /// FORMAT_DESCRIPTION after its artificial ROTATE, which is already
    /// checksummed when the session negotiated CRC32.
    pub fn reset(&mut self, negotiated_checksum: bool) {
        self.format = None;
        self.negotiated_checksum = negotiated_checksum;
    }

    /// Decode one event payload (header + body, without the packet marker).
    ///
    /// TABLE_MAP events are stored in `tables` before being returned, so a
    /// rows event can only decode after its map was seen.
    pub fn decode(
        &mut self,
        payload: &[u8],
        tables: &mut TableMapCache,
    ) -> Result<DecodeOutcome, DecodeError> {
        let header = EventHeader::parse(payload)?;
        let event_type = header.event_type();
        let body = &payload[EventHeader::SIZE..];

        if event_type == EventType::FormatDescriptionEvent {
            let format = decode_format_description(body)?;
            debug!(
                "FDE: binlog_version={}, server={}, checksum_alg={}",
                format.binlog_version, format.server_version, format.checksum_alg
            );
            self.format = Some(format);
            return Ok(DecodeOutcome::Skip(header));
        }

        // CRC32 is stripped, not verified
        let body = if self.checksum_enabled() {
            let end = body.len().checked_sub(CHECKSUM_LEN).ok_or(DecodeError::Truncated {
                offset: EventHeader::SIZE,
                needed: CHECKSUM_LEN,
                remaining: body.len(),
            })?;
            &body[..end]
        } else {
            body
        };

        trace!(
            "Decoding {:?} event, {} bytes total, {} bytes body",
            event_type,
            payload.len(),
            body.len()
        );

        let event = match event_type {
            EventType::RotateEvent => {
                let rotate = decode_rotate(body)?;
                return Ok(DecodeOutcome::Rotate(header, rotate));
            }
            EventType::TableMapEvent => {
                let entry = decode_table_map(body)?;
                BinlogEvent::TableMap(tables.insert(entry).clone())
            }
            EventType::QueryEvent => BinlogEvent::Query(decode_query(body)?),
            EventType::WriteRowsEventV1 | EventType::WriteRowsEventV2 => {
                let (table, flags, rows) = decode_rows(body, event_type, tables)?;
                BinlogEvent::WriteRows(RowsEvent {
                    table,
                    flags,
                    rows: rows.into_iter().map(|(image, _)| image).collect(),
                })
            }
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEventV2 => {
                let (table, flags, rows) = decode_rows(body, event_type, tables)?;
                BinlogEvent::DeleteRows(RowsEvent {
                    table,
                    flags,
                    rows: rows.into_iter().map(|(image, _)| image).collect(),
                })
            }
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2 => {
                let (table, flags, rows) = decode_rows(body, event_type, tables)?;
                let rows = rows
                    .into_iter()
                    .map(|(before, after)| UpdatedRow {
                        before,
                        after: after.unwrap_or_default(),
                    })
                    .collect();
                BinlogEvent::UpdateRows(UpdateRowsEvent { table, flags, rows })
            }
            other => {
                trace!("Skipping {:?} event", other);
                return Ok(DecodeOutcome::Skip(header));
            }
        };

        Ok(DecodeOutcome::Event(DecodedEvent { header, event }))
    }
}

/// Decode a FORMAT_DESCRIPTION body and detect its checksum algorithm.
///
/// ```text
/// [binlog_version: 2] [server_version: 50] [create_timestamp: 4]
/// [header_length: 1] [post_header_lengths: N] [checksum_alg: 1] [crc32: 4]
/// ```
///
/// The trailing `checksum_alg` + CRC slot exists only on servers that
/// support checksums, which is decided from the server version.
fn decode_format_description(body: &[u8]) -> Result<FormatDescription, DecodeError> {
    let mut reader = PayloadReader::new(body);

    let binlog_version = reader.u16_le()?;
    let server_version = String::from_utf8_lossy(reader.bytes(SERVER_VERSION_LEN)?)
        .trim_end_matches('\0')
        .to_string();
    let create_timestamp = reader.u32_le()?;
    let header_length = reader.u8()?;

    let checksum_alg = if version_has_checksum(&server_version)
        && body.len() >= FDE_FIXED_LEN + 1 + CHECKSUM_LEN
    {
        body[body.len() - CHECKSUM_LEN - 1]
    } else {
        0
    };

    Ok(FormatDescription {
        binlog_version,
        server_version,
        create_timestamp,
        header_length,
        checksum_alg,
    })
}

/// Checksums exist since MySQL 5.6.1 and MariaDB 5.3.
fn version_has_checksum(version: &str) -> bool {
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let mut next = || parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    let (major, minor, patch) = (next(), next(), next());

    if version.contains("MariaDB") {
        return (major, minor) >= (5, 3);
    }
    (major, minor, patch) >= (5, 6, 1)
}

fn decode_rotate(body: &[u8]) -> Result<RotateEvent, DecodeError> {
    let mut reader = PayloadReader::new(body);
    let position = reader.u64_le()?;
    let next_file = String::from_utf8_lossy(reader.rest())
        .trim_end_matches('\0')
        .to_string();
    if next_file.is_empty() {
        return Err(DecodeError::malformed("rotate", "empty file name"));
    }
    Ok(RotateEvent {
        position,
        next_file,
    })
}

fn decode_query(body: &[u8]) -> Result<QueryEvent, DecodeError> {
    let mut reader = PayloadReader::new(body);

    let thread_id = reader.u32_le()?;
    let exec_time = reader.u32_le()?;
    let schema_len = reader.u8()? as usize;
    let error_code = reader.u16_le()?;
    let status_vars_len = reader.u16_le()? as usize;
    reader.skip(status_vars_len)?;

    let schema = String::from_utf8_lossy(reader.bytes(schema_len)?).into_owned();
    reader.skip(1)?; // null terminator
    let statement = String::from_utf8_lossy(reader.rest()).into_owned();

    Ok(QueryEvent {
        thread_id,
        exec_time,
        error_code,
        schema,
        statement,
    })
}

fn read_name(reader: &mut PayloadReader<'_>) -> Result<String, DecodeError> {
    let len = reader.u8()? as usize;
    let name = String::from_utf8_lossy(reader.bytes(len)?).into_owned();
    reader.skip(1)?; // null terminator
    Ok(name)
}

fn decode_table_map(body: &[u8]) -> Result<TableMapEntry, DecodeError> {
    let mut reader = PayloadReader::new(body);

    let table_id = reader.u48_le()?;
    let flags = reader.u16_le()?;
    let schema = read_name(&mut reader)?;
    let table = read_name(&mut reader)?;

    let column_count = reader.lenenc_len()?;
    let column_types = reader
        .bytes(column_count)?
        .iter()
        .map(|code| ColumnType::try_from(*code))
        .collect::<Result<Vec<_>, _>>()?;

    let metadata_len = reader.lenenc_len()?;
    let mut metadata = PayloadReader::new(reader.bytes(metadata_len)?);
    let metadata = column_types
        .iter()
        .map(|column_type| read_column_metadata(&mut metadata, *column_type))
        .collect::<Result<Vec<_>, _>>()?;

    let nullable = reader.bytes(column_count.div_ceil(8))?;

    let columns = column_types
        .into_iter()
        .zip(metadata)
        .enumerate()
        .map(|(idx, (column_type, meta))| {
            ColumnDescriptor::new(column_type, meta, is_bit_set(nullable, idx))
        })
        .collect();

    Ok(TableMapEntry {
        table_id,
        flags,
        schema,
        table,
        columns,
    })
}

/// Per-column metadata, normalized to the layouts documented on
/// [`ColumnDescriptor::metadata`].
fn read_column_metadata(
    reader: &mut PayloadReader<'_>,
    column_type: ColumnType,
) -> Result<u16, DecodeError> {
    match column_type.metadata_len() {
        0 => Ok(0),
        1 => Ok(reader.u8()? as u16),
        _ => match column_type {
            // real_type then length, and precision then scale
            ColumnType::String | ColumnType::Enum | ColumnType::Set | ColumnType::NewDecimal => {
                let high = reader.u8()? as u16;
                let low = reader.u8()? as u16;
                Ok((high << 8) | low)
            }
            _ => reader.u16_le(),
        },
    }
}

type DecodedRows = (TableRef, u16, Vec<(RowImage, Option<RowImage>)>);

fn decode_rows(
    body: &[u8],
    event_type: EventType,
    tables: &TableMapCache,
) -> Result<DecodedRows, DecodeError> {
    let mut reader = PayloadReader::new(body);

    let table_id = reader.u48_le()?;
    let flags = reader.u16_le()?;

    if event_type.has_extra_data() {
        // Length includes its own two bytes
        let extra_len = reader.u16_le()? as usize;
        let extra = extra_len.checked_sub(2).ok_or_else(|| {
            DecodeError::malformed("rows", format!("extra data length {}", extra_len))
        })?;
        reader.skip(extra)?;
    }

    let entry = tables
        .lookup(table_id)
        .ok_or(DecodeError::UnknownTable(table_id))?;

    let column_count = reader.lenenc_len()?;
    if column_count != entry.columns.len() {
        return Err(DecodeError::ColumnCountMismatch {
            table_id,
            expected: entry.columns.len(),
            actual: column_count,
        });
    }

    let bitmap_len = column_count.div_ceil(8);
    let present = reader.bytes(bitmap_len)?;
    let is_update = matches!(
        event_type,
        EventType::UpdateRowsEventV1 | EventType::UpdateRowsEventV2
    );
    let present_after = if is_update {
        Some(reader.bytes(bitmap_len)?)
    } else {
        None
    };

    let mut rows = Vec::new();
    while reader.has_remaining() {
        let image = read_row(&mut reader, entry, present)?;
        let after = match present_after {
            Some(bitmap) => Some(read_row(&mut reader, entry, bitmap)?),
            None => None,
        };
        rows.push((image, after));
    }

    trace!(
        "Rows event: table={}.{} ({}), rows={}",
        entry.schema,
        entry.table,
        table_id,
        rows.len()
    );

    Ok((entry.table_ref(), flags, rows))
}

/// One row image: a null bitmap over the present columns, then the
/// non-null values in column order.
fn read_row(
    reader: &mut PayloadReader<'_>,
    entry: &TableMapEntry,
    present: &[u8],
) -> Result<RowImage, DecodeError> {
    let present_count = (0..entry.columns.len())
        .filter(|idx| is_bit_set(present, *idx))
        .count();
    let nulls = reader.bytes(present_count.div_ceil(8))?;

    let mut row = RowImage::with_capacity(present_count);
    let mut null_idx = 0;
    for (idx, column) in entry.columns.iter().enumerate() {
        if !is_bit_set(present, idx) {
            continue;
        }
        let value = if is_bit_set(nulls, null_idx) {
            ColumnValue::Null
        } else {
            decode_value(reader, column)?
        };
        null_idx += 1;
        row.push(entry.column_name(idx), value);
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mysql::schema::CatalogColumn;
    use pretty_assertions::assert_eq;

    const TS: u32 = 1_700_000_000;

    fn event(type_code: u8, next_position: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(EventHeader::SIZE + body.len());
        out.extend_from_slice(&TS.to_le_bytes());
        out.push(type_code);
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&((EventHeader::SIZE + body.len()) as u32).to_le_bytes());
        out.extend_from_slice(&next_position.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn with_crc(mut event: Vec<u8>) -> Vec<u8> {
        event.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        event
    }

    fn fde_body(version: &str, checksum_alg: Option<u8>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_le_bytes());
        let mut server_version = [0u8; SERVER_VERSION_LEN];
        server_version[..version.len()].copy_from_slice(version.as_bytes());
        body.extend_from_slice(&server_version);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(19);
        body.extend_from_slice(&[0u8; 40]); // post-header lengths
        if let Some(alg) = checksum_alg {
            body.push(alg);
            body.extend_from_slice(&[0u8; 4]);
        }
        body
    }

    /// TABLE_MAP for `shop.orders (id INT NOT NULL, name VARCHAR(255) NULL)`
    fn orders_table_map(table_id: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[..6]);
        body.extend_from_slice(&1u16.to_le_bytes());
        body.push(4);
        body.extend_from_slice(b"shop\0");
        body.push(6);
        body.extend_from_slice(b"orders\0");
        body.push(2); // column count
        body.extend_from_slice(&[ColumnType::Long.code(), ColumnType::Varchar.code()]);
        body.push(2); // metadata length
        body.extend_from_slice(&255u16.to_le_bytes());
        body.push(0b10); // nullable bitmap
        body
    }

    fn orders_row(id: i32, name: &str) -> Vec<u8> {
        let mut row = vec![0x00]; // null bitmap
        row.extend_from_slice(&id.to_le_bytes());
        row.push(name.len() as u8);
        row.extend_from_slice(name.as_bytes());
        row
    }

    fn rows_body(table_id: u64, v2: bool, bitmaps: usize, rows: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[..6]);
        body.extend_from_slice(&1u16.to_le_bytes());
        if v2 {
            body.extend_from_slice(&2u16.to_le_bytes());
        }
        body.push(2);
        for _ in 0..bitmaps {
            body.push(0b11);
        }
        for row in rows {
            body.extend_from_slice(row);
        }
        body
    }

    fn decode_one(
        decoder: &mut BinlogDecoder,
        cache: &mut TableMapCache,
        payload: &[u8],
    ) -> BinlogEvent {
        match decoder.decode(payload, cache).unwrap() {
            DecodeOutcome::Event(decoded) => decoded.event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_event_type_from_u8() {
        assert_eq!(EventType::from_u8(15), EventType::FormatDescriptionEvent);
        assert_eq!(EventType::from_u8(19), EventType::TableMapEvent);
        assert_eq!(EventType::from_u8(30), EventType::WriteRowsEventV2);
        assert_eq!(EventType::from_u8(24), EventType::UpdateRowsEventV1);
        assert_eq!(EventType::from_u8(4), EventType::RotateEvent);
        assert_eq!(EventType::from_u8(255), EventType::Unknown);
    }

    #[test]
    fn test_is_row_event() {
        assert!(EventType::WriteRowsEventV2.is_row_event());
        assert!(EventType::DeleteRowsEventV1.is_row_event());
        assert!(!EventType::QueryEvent.is_row_event());
        assert!(!EventType::TableMapEvent.is_row_event());
    }

    #[test]
    fn test_event_header_parse() {
        let data = event(2, 1234, &[]);
        let header = EventHeader::parse(&data).unwrap();
        assert_eq!(header.timestamp, TS);
        assert_eq!(header.event_type(), EventType::QueryEvent);
        assert_eq!(header.server_id, 1);
        assert_eq!(header.event_length, 19);
        assert_eq!(header.next_position, 1234);

        assert_eq!(
            EventHeader::parse(&[0u8; 10]).unwrap_err(),
            DecodeError::HeaderTooShort(10)
        );
    }

    #[test]
    fn test_version_has_checksum() {
        assert!(version_has_checksum("8.0.35-0ubuntu0.22.04.1-log"));
        assert!(version_has_checksum("5.6.1"));
        assert!(!version_has_checksum("5.6.0"));
        assert!(!version_has_checksum("5.5.62-log"));
        assert!(version_has_checksum("10.11.6-MariaDB-log"));
        assert!(version_has_checksum("5.3.12-MariaDB"));
        assert!(!version_has_checksum("5.2.14-MariaDB"));
    }

    #[test]
    fn test_format_description_enables_checksum() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();

        let fde = event(15, 120, &fde_body("8.0.35", Some(1)));
        let outcome = decoder.decode(&fde, &mut cache).unwrap();
        assert!(matches!(outcome, DecodeOutcome::Skip(ref h) if h.next_position == 120));
        assert!(decoder.checksum_enabled());
        let format = decoder.format().unwrap();
        assert_eq!(format.server_version, "8.0.35");
        assert_eq!(format.binlog_version, 4);

        // Subsequent events have their CRC stripped before parsing
        let table_map = with_crc(event(19, 200, &orders_table_map(7)));
        let event = decode_one(&mut decoder, &mut cache, &table_map);
        assert_eq!(event.kind(), EventKind::TableMap);
        assert!(cache.lookup(7).is_some());

        decoder.reset(false);
        assert!(!decoder.checksum_enabled());
    }

    #[test]
    fn test_negotiated_checksum_covers_rotate_before_fde() {
        let mut decoder = BinlogDecoder::with_negotiated_checksum(true);
        let mut cache = TableMapCache::new();

        let mut body = 4u64.to_le_bytes().to_vec();
        body.extend_from_slice(b"binlog.000001");
        match decoder.decode(&with_crc(event(4, 0, &body)), &mut cache).unwrap() {
            DecodeOutcome::Rotate(_, rotate) => assert_eq!(rotate.next_file, "binlog.000001"),
            other => panic!("expected rotate, got {:?}", other),
        }

        // The format description has the final word
        decoder
            .decode(&event(15, 0, &fde_body("8.0.35", Some(0))), &mut cache)
            .unwrap();
        assert!(!decoder.checksum_enabled());

        decoder.reset(true);
        assert!(decoder.checksum_enabled());
    }

    #[test]
    fn test_format_description_checksum_off() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();

        decoder
            .decode(&event(15, 120, &fde_body("8.0.35", Some(0))), &mut cache)
            .unwrap();
        assert!(!decoder.checksum_enabled());

        decoder
            .decode(&event(15, 120, &fde_body("5.5.62", None)), &mut cache)
            .unwrap();
        assert!(!decoder.checksum_enabled());
        assert_eq!(decoder.format().unwrap().checksum_alg, 0);
    }

    #[test]
    fn test_rotate() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();

        let mut body = 4u64.to_le_bytes().to_vec();
        body.extend_from_slice(b"binlog.000002");
        match decoder.decode(&event(4, 0, &body), &mut cache).unwrap() {
            DecodeOutcome::Rotate(header, rotate) => {
                assert_eq!(header.next_position, 0);
                assert_eq!(rotate.position, 4);
                assert_eq!(rotate.next_file, "binlog.000002");
            }
            other => panic!("expected rotate, got {:?}", other),
        }
    }

    #[test]
    fn test_table_map() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();

        let event = decode_one(&mut decoder, &mut cache, &event(19, 200, &orders_table_map(7)));
        let BinlogEvent::TableMap(entry) = event else {
            panic!("expected table map");
        };
        assert_eq!(entry.table_id, 7);
        assert_eq!(entry.table_ref().to_string(), "shop.orders");
        assert_eq!(entry.columns[0].column_type, ColumnType::Long);
        assert!(!entry.columns[0].nullable);
        assert_eq!(entry.columns[1].column_type, ColumnType::Varchar);
        assert_eq!(entry.columns[1].metadata, 255);
        assert!(entry.columns[1].nullable);
        assert_eq!(cache.lookup(7), Some(&entry));
    }

    #[test]
    fn test_table_map_string_and_decimal_metadata() {
        let mut body = Vec::new();
        body.extend_from_slice(&9u64.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(b"\x01a\0\x01b\0");
        body.push(3);
        body.extend_from_slice(&[
            ColumnType::String.code(),
            ColumnType::NewDecimal.code(),
            ColumnType::Double.code(),
        ]);
        body.push(5);
        body.extend_from_slice(&[0xF7, 0x01, 10, 2, 8]);
        body.push(0);

        let mut cache = TableMapCache::new();
        BinlogDecoder::new()
            .decode(&event(19, 0, &body), &mut cache)
            .unwrap();
        let entry = cache.lookup(9).unwrap();
        assert_eq!(entry.columns[0].metadata, 0xF701);
        assert_eq!(entry.columns[1].metadata, (10 << 8) | 2);
        assert_eq!(entry.columns[2].metadata, 8);
    }

    #[test]
    fn test_write_rows_v2() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();

        let body = rows_body(7, true, 1, &[orders_row(42, "widget")]);
        let BinlogEvent::WriteRows(rows) = decode_one(&mut decoder, &mut cache, &event(30, 300, &body))
        else {
            panic!("expected write rows");
        };
        assert_eq!(rows.table.to_string(), "shop.orders");
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0].get("col0"), Some(&ColumnValue::SignedInt(42)));
        assert_eq!(
            rows.rows[0].get("col1"),
            Some(&ColumnValue::String("widget".to_string()))
        );
        assert_eq!(
            rows.rows[0].to_json(),
            serde_json::json!({"col0": 42, "col1": "widget"})
        );
    }

    #[test]
    fn test_rows_use_catalog_names_and_nulls() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();
        let catalog = [CatalogColumn::new("id"), CatalogColumn::new("name")];
        assert!(cache.apply_catalog(7, &catalog));

        // Second column NULL, two rows, v1 layout
        let mut null_row = vec![0b10];
        null_row.extend_from_slice(&7i32.to_le_bytes());
        let body = rows_body(7, false, 1, &[null_row, orders_row(-1, "x")]);

        let BinlogEvent::DeleteRows(rows) = decode_one(&mut decoder, &mut cache, &event(25, 300, &body))
        else {
            panic!("expected delete rows");
        };
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[0].get("id"), Some(&ColumnValue::SignedInt(7)));
        assert_eq!(rows.rows[0].get("name"), Some(&ColumnValue::Null));
        assert_eq!(rows.rows[1].get("id"), Some(&ColumnValue::SignedInt(-1)));
    }

    #[test]
    fn test_rows_follow_catalog_signedness() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();
        let catalog = [
            CatalogColumn::new("id").unsigned(),
            CatalogColumn::new("name").with_charset("utf8mb4"),
        ];
        assert!(cache.apply_catalog(7, &catalog));

        let body = rows_body(7, true, 1, &[orders_row(-1, "x")]);
        let BinlogEvent::WriteRows(rows) = decode_one(&mut decoder, &mut cache, &event(30, 300, &body))
        else {
            panic!("expected write rows");
        };
        assert_eq!(
            rows.rows[0].get("id"),
            Some(&ColumnValue::UnsignedInt(4_294_967_295))
        );
    }

    #[test]
    fn test_update_rows_before_and_after() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();

        let mut image = orders_row(42, "widget");
        image.extend_from_slice(&orders_row(42, "gadget"));
        let body = rows_body(7, true, 2, &[image]);

        let event = decode_one(&mut decoder, &mut cache, &event(31, 300, &body));
        assert_eq!(event.kind(), EventKind::UpdateRows);
        assert_eq!(event.row_count(), 1);
        let BinlogEvent::UpdateRows(update) = event else {
            unreachable!()
        };
        assert_eq!(
            update.rows[0].before.get("col1"),
            Some(&ColumnValue::String("widget".to_string()))
        );
        assert_eq!(
            update.rows[0].after.get("col1"),
            Some(&ColumnValue::String("gadget".to_string()))
        );
    }

    #[test]
    fn test_partial_present_bitmap() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();

        // Only column 0 present
        let mut body = Vec::new();
        body.extend_from_slice(&7u64.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.push(2);
        body.push(0b01);
        body.push(0x00);
        body.extend_from_slice(&5i32.to_le_bytes());

        let BinlogEvent::WriteRows(rows) = decode_one(&mut decoder, &mut cache, &event(23, 300, &body))
        else {
            panic!("expected write rows");
        };
        assert_eq!(rows.rows[0].len(), 1);
        assert_eq!(rows.rows[0].get("col1"), None);
    }

    #[test]
    fn test_rows_for_unknown_table() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();

        let body = rows_body(99, true, 1, &[orders_row(1, "a")]);
        assert_eq!(
            decoder.decode(&event(30, 300, &body), &mut cache).unwrap_err(),
            DecodeError::UnknownTable(99)
        );
    }

    #[test]
    fn test_rows_column_count_mismatch() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();

        let mut body = rows_body(7, true, 1, &[]);
        body[10] = 3; // column count after table id, flags, extra data
        assert_eq!(
            decoder.decode(&event(30, 300, &body), &mut cache).unwrap_err(),
            DecodeError::ColumnCountMismatch {
                table_id: 7,
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_truncated_row_is_error() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();
        decoder
            .decode(&event(19, 200, &orders_table_map(7)), &mut cache)
            .unwrap();

        let mut row = orders_row(42, "widget");
        row.truncate(row.len() - 2);
        let body = rows_body(7, true, 1, &[row]);
        assert!(matches!(
            decoder.decode(&event(30, 300, &body), &mut cache),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_query() {
        let mut body = Vec::new();
        body.extend_from_slice(&11u32.to_le_bytes()); // thread id
        body.extend_from_slice(&0u32.to_le_bytes()); // exec time
        body.push(4); // schema length
        body.extend_from_slice(&0u16.to_le_bytes()); // error code
        body.extend_from_slice(&3u16.to_le_bytes()); // status vars length
        body.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        body.extend_from_slice(b"shop\0");
        body.extend_from_slice(b"CREATE TABLE t (id INT)");

        let mut cache = TableMapCache::new();
        let event = decode_one(&mut BinlogDecoder::new(), &mut cache, &event(2, 500, &body));
        let BinlogEvent::Query(query) = event else {
            panic!("expected query");
        };
        assert_eq!(query.thread_id, 11);
        assert_eq!(query.schema, "shop");
        assert_eq!(query.statement, "CREATE TABLE t (id INT)");
    }

    #[test]
    fn test_other_events_are_skipped() {
        let mut decoder = BinlogDecoder::new();
        let mut cache = TableMapCache::new();

        // XID
        let outcome = decoder
            .decode(&event(16, 800, &77u64.to_le_bytes()), &mut cache)
            .unwrap();
        assert!(matches!(outcome, DecodeOutcome::Skip(ref h) if h.next_position == 800));

        // Unknown type code
        let outcome = decoder.decode(&event(200, 900, &[]), &mut cache).unwrap();
        assert!(matches!(outcome, DecodeOutcome::Skip(_)));
    }

    #[test]
    fn test_event_kind_serde() {
        assert_eq!(
            serde_json::to_string(&EventKind::WriteRows).unwrap(),
            "\"write_rows\""
        );
        let kind: EventKind = serde_json::from_str("\"table_map\"").unwrap();
        assert_eq!(kind, EventKind::TableMap);
        assert_eq!(EventKind::DeleteRows.to_string(), "delete_rows");
    }
}
