//! MySQL packet framing
//!
//! Every packet on the wire is a 4-byte envelope (3-byte little-endian
//! payload length, 1-byte sequence id) followed by the payload. Once a dump
//! is running, each payload is one of:
//!
//! - `0x00` + event bytes
//! - `0xFE` (short) - end of log in non-blocking mode
//! - `0xFF` + error code, SQL state and message
//!
//! Payloads of `0xFFFFFF` bytes or more are split into several envelopes;
//! [`decode_packet`] accepts a frame whose declared length is `0xFFFFFF`
//! followed by the already merged remainder.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::CodecError;
use crate::common::BinlogPosition;

/// MySQL packet header size (4 bytes: 3 for length + 1 for sequence)
pub const PACKET_HEADER_SIZE: usize = 4;

/// Maximum payload carried by a single envelope
pub const MAX_PAYLOAD_SIZE: usize = 0xFF_FFFF;

/// COM_QUERY command byte
pub const COM_QUERY: u8 = 0x03;

/// COM_BINLOG_DUMP command byte
pub const COM_BINLOG_DUMP: u8 = 0x12;

/// COM_REGISTER_SLAVE command byte
pub const COM_REGISTER_SLAVE: u8 = 0x15;

/// Dump flag: return EOF at the end of the log instead of waiting
pub const BINLOG_DUMP_NON_BLOCK: u16 = 0x01;

const OK_MARKER: u8 = 0x00;
const EOF_MARKER: u8 = 0xFE;
const ERR_MARKER: u8 = 0xFF;

/// EOF payloads are shorter than this; longer 0xFE payloads are not EOF
const EOF_MAX_PAYLOAD: usize = 9;

/// Packet envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length declared by the envelope
    pub length: usize,
    /// Sequence id
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Parse the first four bytes of `raw`.
    pub fn parse(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < PACKET_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: PACKET_HEADER_SIZE,
                available: raw.len(),
            });
        }
        let length = (raw[0] as usize) | ((raw[1] as usize) << 8) | ((raw[2] as usize) << 16);
        Ok(Self {
            length,
            sequence_id: raw[3],
        })
    }

    /// Serialize the envelope.
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        [
            (self.length & 0xFF) as u8,
            ((self.length >> 8) & 0xFF) as u8,
            ((self.length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Classified server packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Binlog event bytes (OK marker stripped)
    Event(Bytes),
    /// End of log
    Eof,
    /// Server error
    Error {
        code: u16,
        sql_state: String,
        message: String,
    },
}

/// Wrap `payload` in an envelope with the given sequence id.
pub fn encode_frame(payload: &[u8], sequence_id: u8) -> Result<Bytes, CodecError> {
    if payload.len() >= MAX_PAYLOAD_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    let header = PacketHeader {
        length: payload.len(),
        sequence_id,
    };
    let mut frame = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
    frame.put_slice(&header.encode());
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Build the COM_BINLOG_DUMP frame for `start`.
///
/// Layout after the envelope: command byte, 4-byte offset, 2-byte flags,
/// 4-byte server id, file name (no terminator). The dump command always
/// opens a new command phase, so the sequence id is 0.
pub fn encode_dump_request(
    start: &BinlogPosition,
    server_id: u32,
    blocking: bool,
) -> Result<Bytes, CodecError> {
    let offset =
        u32::try_from(start.offset).map_err(|_| CodecError::OffsetOutOfRange(start.offset))?;
    let flags = if blocking { 0 } else { BINLOG_DUMP_NON_BLOCK };

    let mut payload = BytesMut::with_capacity(11 + start.file.len());
    payload.put_u8(COM_BINLOG_DUMP);
    payload.put_u32_le(offset);
    payload.put_u16_le(flags);
    payload.put_u32_le(server_id);
    payload.put_slice(start.file.as_bytes());

    encode_frame(&payload, 0)
}

/// Decode one framed packet and classify its payload.
pub fn decode_packet(raw: &[u8]) -> Result<Packet, CodecError> {
    let header = PacketHeader::parse(raw)?;
    let body = &raw[PACKET_HEADER_SIZE..];

    let payload = if header.length == MAX_PAYLOAD_SIZE {
        // Multi-envelope payload, continuation already merged in
        if body.len() < header.length {
            return Err(CodecError::Truncated {
                needed: PACKET_HEADER_SIZE + header.length,
                available: raw.len(),
            });
        }
        body
    } else {
        body.get(..header.length).ok_or(CodecError::Truncated {
            needed: PACKET_HEADER_SIZE + header.length,
            available: raw.len(),
        })?
    };

    classify_payload(payload)
}

/// Classify a bare payload (envelope already removed).
pub fn classify_payload(payload: &[u8]) -> Result<Packet, CodecError> {
    match payload.first() {
        None => Err(CodecError::EmptyPayload),
        Some(&OK_MARKER) => Ok(Packet::Event(Bytes::copy_from_slice(&payload[1..]))),
        Some(&EOF_MARKER) if payload.len() < EOF_MAX_PAYLOAD => Ok(Packet::Eof),
        Some(&ERR_MARKER) => {
            let (code, sql_state, message) = parse_error_payload(payload)?;
            Ok(Packet::Error {
                code,
                sql_state,
                message,
            })
        }
        Some(&other) => Err(CodecError::UnexpectedMarker(other)),
    }
}

/// Split an ERR payload into `(code, sql_state, message)`.
///
/// The SQL state block (`#` + 5 bytes) is optional on the wire; when it is
/// missing the generic state `HY000` is reported.
pub fn parse_error_payload(payload: &[u8]) -> Result<(u16, String, String), CodecError> {
    if payload.len() < 3 {
        return Err(CodecError::Truncated {
            needed: 3,
            available: payload.len(),
        });
    }
    let code = u16::from_le_bytes([payload[1], payload[2]]);
    let rest = &payload[3..];

    let (sql_state, message) = match rest.first() {
        Some(b'#') if rest.len() >= 6 => (
            String::from_utf8_lossy(&rest[1..6]).into_owned(),
            &rest[6..],
        ),
        _ => ("HY000".to_string(), rest),
    };

    Ok((
        code,
        sql_state,
        String::from_utf8_lossy(message).into_owned(),
    ))
}
