//! Raw binlog event and packet builders
//!
//! Events are built without checksums unless wrapped in [`with_crc`]; the
//! format description announces which.

use bytes::Bytes;
use ditto_binlog::mysql::codec::encode_frame;
use ditto_binlog::mysql::{ColumnType, EventHeader};

pub const TIMESTAMP: u32 = 1_700_000_000;
pub const SERVER_ID: u32 = 1;

const QUERY_EVENT: u8 = 2;
const ROTATE_EVENT: u8 = 4;
const FORMAT_DESCRIPTION_EVENT: u8 = 15;
const XID_EVENT: u8 = 16;
const TABLE_MAP_EVENT: u8 = 19;
const WRITE_ROWS_EVENT_V2: u8 = 30;
const UPDATE_ROWS_EVENT_V2: u8 = 31;
const DELETE_ROWS_EVENT_V2: u8 = 32;

/// Header + body
pub fn event(type_code: u8, next_position: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(EventHeader::SIZE + body.len());
    out.extend_from_slice(&TIMESTAMP.to_le_bytes());
    out.push(type_code);
    out.extend_from_slice(&SERVER_ID.to_le_bytes());
    out.extend_from_slice(&((EventHeader::SIZE + body.len()) as u32).to_le_bytes());
    out.extend_from_slice(&next_position.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(body);
    out
}

pub fn with_crc(mut event: Vec<u8>) -> Vec<u8> {
    event.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    event
}

/// FORMAT_DESCRIPTION from a MySQL 8 server; `crc32` selects the checksum
/// algorithm it announces.
pub fn format_description(next_position: u32, crc32: bool) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&4u16.to_le_bytes());
    let mut server_version = [0u8; 50];
    server_version[..6].copy_from_slice(b"8.0.35");
    body.extend_from_slice(&server_version);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(EventHeader::SIZE as u8);
    body.extend_from_slice(&[0u8; 40]); // post-header lengths
    body.push(u8::from(crc32));
    body.extend_from_slice(&[0u8; 4]);
    event(FORMAT_DESCRIPTION_EVENT, next_position, &body)
}

/// ROTATE; the one sent right after a dump request has `next_position` 0.
pub fn rotate(file: &str, position: u64, next_position: u32) -> Vec<u8> {
    let mut body = position.to_le_bytes().to_vec();
    body.extend_from_slice(file.as_bytes());
    event(ROTATE_EVENT, next_position, &body)
}

/// TABLE_MAP for `schema.table (id INT NOT NULL, name VARCHAR(255) NULL)`
pub fn table_map(table_id: u64, schema: &str, table: &str, next_position: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_id.to_le_bytes()[..6]);
    body.extend_from_slice(&1u16.to_le_bytes());
    body.push(schema.len() as u8);
    body.extend_from_slice(schema.as_bytes());
    body.push(0);
    body.push(table.len() as u8);
    body.extend_from_slice(table.as_bytes());
    body.push(0);
    body.push(2); // column count
    body.extend_from_slice(&[ColumnType::Long.code(), ColumnType::Varchar.code()]);
    body.push(2); // metadata length
    body.extend_from_slice(&255u16.to_le_bytes());
    body.push(0b10); // nullable bitmap
    event(TABLE_MAP_EVENT, next_position, &body)
}

fn row(id: i32, name: &str) -> Vec<u8> {
    let mut out = vec![0]; // null bitmap
    out.extend_from_slice(&id.to_le_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out
}

fn rows_body(table_id: u64, bitmaps: usize, rows: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_id.to_le_bytes()[..6]);
    body.extend_from_slice(&1u16.to_le_bytes()); // STMT_END_F
    body.extend_from_slice(&2u16.to_le_bytes()); // extra data length, no payload
    body.push(2); // column count
    for _ in 0..bitmaps {
        body.push(0b11);
    }
    body.extend_from_slice(rows);
    body
}

/// WRITE_ROWS_V2 with one `(id, name)` row against the [`table_map`] layout.
pub fn write_rows(table_id: u64, id: i32, name: &str, next_position: u32) -> Vec<u8> {
    event(
        WRITE_ROWS_EVENT_V2,
        next_position,
        &rows_body(table_id, 1, &row(id, name)),
    )
}

pub fn update_rows(
    table_id: u64,
    before: (i32, &str),
    after: (i32, &str),
    next_position: u32,
) -> Vec<u8> {
    let mut rows = row(before.0, before.1);
    rows.extend_from_slice(&row(after.0, after.1));
    event(
        UPDATE_ROWS_EVENT_V2,
        next_position,
        &rows_body(table_id, 2, &rows),
    )
}

pub fn delete_rows(table_id: u64, id: i32, name: &str, next_position: u32) -> Vec<u8> {
    event(
        DELETE_ROWS_EVENT_V2,
        next_position,
        &rows_body(table_id, 1, &row(id, name)),
    )
}

pub fn query(schema: &str, statement: &str, next_position: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&7u32.to_le_bytes()); // thread id
    body.extend_from_slice(&0u32.to_le_bytes()); // exec time
    body.push(schema.len() as u8);
    body.extend_from_slice(&0u16.to_le_bytes()); // error code
    body.extend_from_slice(&0u16.to_le_bytes()); // status vars
    body.extend_from_slice(schema.as_bytes());
    body.push(0);
    body.extend_from_slice(statement.as_bytes());
    event(QUERY_EVENT, next_position, &body)
}

pub fn xid(xid: u64, next_position: u32) -> Vec<u8> {
    event(XID_EVENT, next_position, &xid.to_le_bytes())
}

/// Framed OK-marked event packet
pub fn event_packet(event: &[u8]) -> Bytes {
    let mut payload = vec![0x00];
    payload.extend_from_slice(event);
    encode_frame(&payload, 1).unwrap()
}

pub fn eof_packet() -> Bytes {
    encode_frame(&[0xFE, 0x00, 0x00, 0x02, 0x00], 1).unwrap()
}

pub fn error_packet(code: u16, sql_state: &str, message: &str) -> Bytes {
    let mut payload = vec![0xFF];
    payload.extend_from_slice(&code.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(sql_state.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    encode_frame(&payload, 1).unwrap()
}
