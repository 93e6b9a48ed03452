//! Row value decoding
//!
//! Decodes one column of a row image according to the column's type and
//! TABLE_MAP metadata. Encodings follow the server's binary row format:
//! little-endian integers, big-endian packed temporal types, the
//! sign-flipped binary DECIMAL layout and MySQL's binary JSON.

use base64::Engine;
use serde_json::Value as JsonValue;

use super::error::DecodeError;
use super::reader::PayloadReader;
use super::table_map::{ColumnDescriptor, ColumnType};

/// Decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    SignedInt(i64),
    /// Integer column declared `UNSIGNED`
    UnsignedInt(u64),
    Float(f32),
    Double(f64),
    /// Exact decimal text, e.g. `-1234.56`
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        negative: bool,
        hours: u16,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microsecond: u32,
    },
    /// Seconds since the Unix epoch (UTC)
    Timestamp {
        seconds: u32,
        microsecond: u32,
    },
    Year(u16),
    Json(JsonValue),
    /// 1-based index into the column's enum values
    Enum(u16),
    /// Bitmask over the column's set members
    Set(u64),
    /// Big-endian bit string
    Bit(Vec<u8>),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// JSON rendering for downstream consumers.
    ///
    /// Binary values are base64 encoded; temporal values use ISO-8601 style
    /// text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            ColumnValue::Null => JsonValue::Null,
            ColumnValue::SignedInt(v) => serde_json::json!(*v),
            ColumnValue::UnsignedInt(v) => serde_json::json!(*v),
            ColumnValue::Float(v) => serde_json::json!(*v),
            ColumnValue::Double(v) => serde_json::json!(*v),
            ColumnValue::Decimal(v) => serde_json::json!(v),
            ColumnValue::String(v) => serde_json::json!(v),
            ColumnValue::Bytes(v) | ColumnValue::Bit(v) => {
                serde_json::json!(base64::engine::general_purpose::STANDARD.encode(v))
            }
            ColumnValue::Date { year, month, day } => {
                serde_json::json!(format!("{:04}-{:02}-{:02}", year, month, day))
            }
            ColumnValue::Time {
                negative,
                hours,
                minutes,
                seconds,
                microseconds,
            } => {
                let sign = if *negative { "-" } else { "" };
                if *microseconds > 0 {
                    serde_json::json!(format!(
                        "{}{:02}:{:02}:{:02}.{:06}",
                        sign, hours, minutes, seconds, microseconds
                    ))
                } else {
                    serde_json::json!(format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds))
                }
            }
            ColumnValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                microsecond,
            } => {
                if *microsecond > 0 {
                    serde_json::json!(format!(
                        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
                        year, month, day, hour, minute, second, microsecond
                    ))
                } else {
                    serde_json::json!(format!(
                        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))
                }
            }
            ColumnValue::Timestamp {
                seconds,
                microsecond,
            } => {
                if *microsecond > 0 {
                    serde_json::json!(*seconds as f64 + *microsecond as f64 / 1_000_000.0)
                } else {
                    serde_json::json!(*seconds)
                }
            }
            ColumnValue::Year(v) => serde_json::json!(*v),
            ColumnValue::Json(v) => v.clone(),
            ColumnValue::Enum(v) => serde_json::json!(*v),
            ColumnValue::Set(v) => serde_json::json!(*v),
        }
    }
}

/// Decode the next non-NULL value of `column` from a row image.
///
/// Signedness and the text/binary split of BLOB types come from the
/// catalog; without it integers decode as signed and BLOBs as bytes.
pub fn decode_value(
    reader: &mut PayloadReader<'_>,
    column: &ColumnDescriptor,
) -> Result<ColumnValue, DecodeError> {
    let metadata = column.metadata;

    match column.column_type {
        ColumnType::Tiny if column.unsigned => Ok(ColumnValue::UnsignedInt(reader.u8()? as u64)),
        ColumnType::Short if column.unsigned => {
            Ok(ColumnValue::UnsignedInt(reader.u16_le()? as u64))
        }
        ColumnType::Int24 if column.unsigned => {
            Ok(ColumnValue::UnsignedInt(reader.u24_le()? as u64))
        }
        ColumnType::Long if column.unsigned => Ok(ColumnValue::UnsignedInt(reader.u32_le()? as u64)),
        ColumnType::LongLong if column.unsigned => Ok(ColumnValue::UnsignedInt(reader.u64_le()?)),
        ColumnType::Tiny => Ok(ColumnValue::SignedInt(reader.i8()? as i64)),
        ColumnType::Short => Ok(ColumnValue::SignedInt(reader.i16_le()? as i64)),
        ColumnType::Int24 => {
            let val = reader.u24_le()?;
            let signed = if val & 0x800000 != 0 {
                (val | 0xFF000000) as i32
            } else {
                val as i32
            };
            Ok(ColumnValue::SignedInt(signed as i64))
        }
        ColumnType::Long => Ok(ColumnValue::SignedInt(reader.i32_le()? as i64)),
        ColumnType::LongLong => Ok(ColumnValue::SignedInt(reader.i64_le()?)),
        ColumnType::Float => Ok(ColumnValue::Float(reader.f32_le()?)),
        ColumnType::Double => Ok(ColumnValue::Double(reader.f64_le()?)),
        ColumnType::Year => {
            let raw = reader.u8()? as u16;
            Ok(ColumnValue::Year(if raw == 0 { 0 } else { raw + 1900 }))
        }
        ColumnType::Date => {
            let packed = reader.u24_le()?;
            Ok(ColumnValue::Date {
                year: ((packed >> 9) & 0x7FFF) as u16,
                month: ((packed >> 5) & 0x0F) as u8,
                day: (packed & 0x1F) as u8,
            })
        }
        ColumnType::Time => {
            let raw = reader.u24_le()?;
            let signed = if raw & 0x800000 != 0 {
                (raw | 0xFF000000) as i32
            } else {
                raw as i32
            };
            let abs = signed.unsigned_abs();
            Ok(ColumnValue::Time {
                negative: signed < 0,
                hours: (abs / 10000) as u16,
                minutes: ((abs / 100) % 100) as u8,
                seconds: (abs % 100) as u8,
                microseconds: 0,
            })
        }
        ColumnType::DateTime => {
            let packed = reader.u64_le()?;
            Ok(ColumnValue::DateTime {
                year: (packed / 10_000_000_000) as u16,
                month: ((packed / 100_000_000) % 100) as u8,
                day: ((packed / 1_000_000) % 100) as u8,
                hour: ((packed / 10_000) % 100) as u8,
                minute: ((packed / 100) % 100) as u8,
                second: (packed % 100) as u8,
                microsecond: 0,
            })
        }
        ColumnType::Timestamp => Ok(ColumnValue::Timestamp {
            seconds: reader.u32_le()?,
            microsecond: 0,
        }),
        ColumnType::Timestamp2 => {
            let seconds = reader.uint_be(4)? as u32;
            let microsecond = read_fraction(reader, metadata)?;
            Ok(ColumnValue::Timestamp {
                seconds,
                microsecond,
            })
        }
        ColumnType::DateTime2 => decode_datetime2(reader, metadata),
        ColumnType::Time2 => decode_time2(reader, metadata),
        ColumnType::Varchar | ColumnType::VarString => {
            let len = if metadata < 256 {
                reader.u8()? as usize
            } else {
                reader.u16_le()? as usize
            };
            Ok(ColumnValue::String(read_text(reader, len)?))
        }
        ColumnType::String => decode_string(reader, metadata),
        ColumnType::Enum => decode_enum(reader, metadata & 0xFF),
        ColumnType::Set => Ok(ColumnValue::Set(reader.uint_le(set_width(metadata & 0xFF)?)?)),
        // TEXT columns travel as BLOBs
        ColumnType::Blob | ColumnType::TinyBlob | ColumnType::MediumBlob | ColumnType::LongBlob
            if column.is_text() =>
        {
            let len = read_blob_len(reader, metadata)?;
            Ok(ColumnValue::String(read_text(reader, len)?))
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry => {
            let len = read_blob_len(reader, metadata)?;
            Ok(ColumnValue::Bytes(reader.bytes(len)?.to_vec()))
        }
        ColumnType::Json => {
            let len = read_blob_len(reader, metadata)?;
            let bytes = reader.bytes(len)?;
            Ok(ColumnValue::Json(decode_json_binary(bytes)))
        }
        ColumnType::NewDecimal => {
            let precision = (metadata >> 8) as usize;
            let scale = (metadata & 0xFF) as usize;
            Ok(ColumnValue::Decimal(decode_decimal(reader, precision, scale)?))
        }
        ColumnType::Bit => {
            let nbits = ((metadata >> 8) * 8 + (metadata & 0xFF)) as usize;
            Ok(ColumnValue::Bit(reader.bytes(nbits.div_ceil(8))?.to_vec()))
        }
        ColumnType::Null => Ok(ColumnValue::Null),
        other @ (ColumnType::Decimal | ColumnType::NewDate | ColumnType::TypedArray) => {
            Err(DecodeError::UnsupportedColumnType(other.code()))
        }
    }
}

fn read_text(reader: &mut PayloadReader<'_>, len: usize) -> Result<String, DecodeError> {
    Ok(String::from_utf8_lossy(reader.bytes(len)?).into_owned())
}

fn read_blob_len(reader: &mut PayloadReader<'_>, width: u16) -> Result<usize, DecodeError> {
    match width {
        1..=4 => Ok(reader.uint_le(width as usize)? as usize),
        other => Err(DecodeError::malformed(
            "blob",
            format!("invalid length prefix width {}", other),
        )),
    }
}

/// STRING covers CHAR/BINARY and, through the real type in the metadata,
/// ENUM and SET.
fn decode_string(reader: &mut PayloadReader<'_>, metadata: u16) -> Result<ColumnValue, DecodeError> {
    let real_type = (metadata >> 8) as u8;
    let size = metadata & 0xFF;

    if real_type == ColumnType::Enum.code() {
        decode_enum(reader, size)
    } else if real_type == ColumnType::Set.code() {
        Ok(ColumnValue::Set(reader.uint_le(set_width(size)?)?))
    } else {
        // Lengths above 255 borrow two bits from the real type byte
        let max_len = (((metadata >> 4) & 0x300) ^ 0x300) + size;
        let len = if max_len < 256 {
            reader.u8()? as usize
        } else {
            reader.u16_le()? as usize
        };
        Ok(ColumnValue::String(read_text(reader, len)?))
    }
}

fn decode_enum(reader: &mut PayloadReader<'_>, size: u16) -> Result<ColumnValue, DecodeError> {
    match size {
        1 => Ok(ColumnValue::Enum(reader.u8()? as u16)),
        2 => Ok(ColumnValue::Enum(reader.u16_le()?)),
        other => Err(DecodeError::malformed(
            "enum",
            format!("invalid storage size {}", other),
        )),
    }
}

fn set_width(size: u16) -> Result<usize, DecodeError> {
    match size {
        1..=8 => Ok(size as usize),
        other => Err(DecodeError::malformed(
            "set",
            format!("invalid storage size {}", other),
        )),
    }
}

/// Fractional seconds of TIMESTAMP2 / DATETIME2, in microseconds.
fn read_fraction(reader: &mut PayloadReader<'_>, fsp: u16) -> Result<u32, DecodeError> {
    match fsp {
        0 => Ok(0),
        1 | 2 => Ok(reader.u8()? as u32 * 10_000),
        3 | 4 => Ok(reader.uint_be(2)? as u32 * 100),
        5 | 6 => Ok(reader.uint_be(3)? as u32),
        other => Err(DecodeError::malformed(
            "temporal",
            format!("invalid fractional precision {}", other),
        )),
    }
}

fn decode_datetime2(reader: &mut PayloadReader<'_>, fsp: u16) -> Result<ColumnValue, DecodeError> {
    const DATETIMEF_INT_OFS: i64 = 0x80_0000_0000;

    let packed = reader.uint_be(5)? as i64 - DATETIMEF_INT_OFS;
    let microsecond = read_fraction(reader, fsp)?;
    let packed = packed.unsigned_abs();

    let ymd = packed >> 17;
    let year_month = ymd >> 5;
    let hms = packed & 0x1FFFF;

    Ok(ColumnValue::DateTime {
        year: (year_month / 13) as u16,
        month: (year_month % 13) as u8,
        day: (ymd & 0x1F) as u8,
        hour: (hms >> 12) as u8,
        minute: ((hms >> 6) & 0x3F) as u8,
        second: (hms & 0x3F) as u8,
        microsecond,
    })
}

fn decode_time2(reader: &mut PayloadReader<'_>, fsp: u16) -> Result<ColumnValue, DecodeError> {
    const TIMEF_INT_OFS: i64 = 0x80_0000;
    const TIMEF_OFS: i64 = 0x8000_0000_0000;

    // Negative values with a fraction borrow one second from the integer
    // part, so the two halves are recombined before splitting into fields.
    let packed: i64 = match fsp {
        0 => (reader.uint_be(3)? as i64 - TIMEF_INT_OFS) << 24,
        1 | 2 => {
            let mut intpart = reader.uint_be(3)? as i64 - TIMEF_INT_OFS;
            let mut frac = reader.i8()? as i64;
            if intpart < 0 && frac != 0 {
                intpart += 1;
                frac -= 0x100;
            }
            (intpart << 24) + frac * 10_000
        }
        3 | 4 => {
            let mut intpart = reader.uint_be(3)? as i64 - TIMEF_INT_OFS;
            let mut frac = reader.uint_be(2)? as u16 as i16 as i64;
            if intpart < 0 && frac != 0 {
                intpart += 1;
                frac -= 0x10000;
            }
            (intpart << 24) + frac * 100
        }
        5 | 6 => reader.uint_be(6)? as i64 - TIMEF_OFS,
        other => {
            return Err(DecodeError::malformed(
                "time2",
                format!("invalid fractional precision {}", other),
            ))
        }
    };

    let negative = packed < 0;
    let abs = packed.unsigned_abs();
    let hms = abs >> 24;

    Ok(ColumnValue::Time {
        negative,
        hours: ((hms >> 12) & 0x3FF) as u16,
        minutes: ((hms >> 6) & 0x3F) as u8,
        seconds: (hms & 0x3F) as u8,
        microseconds: (abs & 0xFF_FFFF) as u32,
    })
}

/// Bytes used by a group of `n` (< 9) decimal digits
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

fn decode_decimal(
    reader: &mut PayloadReader<'_>,
    precision: usize,
    scale: usize,
) -> Result<String, DecodeError> {
    if precision == 0 || scale > precision {
        return Err(DecodeError::malformed(
            "decimal",
            format!("invalid precision/scale {}/{}", precision, scale),
        ));
    }

    let int_digits = precision - scale;
    let int_words = int_digits / 9;
    let int_leftover_bytes = DIG_TO_BYTES[int_digits % 9];
    let frac_words = scale / 9;
    let frac_leftover = scale % 9;
    let frac_leftover_bytes = DIG_TO_BYTES[frac_leftover];

    let total = int_leftover_bytes + int_words * 4 + frac_words * 4 + frac_leftover_bytes;
    let mut bytes = reader.bytes(total)?.to_vec();

    // Sign bit is stored inverted; negative values are stored as complement
    let negative = (bytes[0] & 0x80) == 0;
    bytes[0] ^= 0x80;
    if negative {
        for b in bytes.iter_mut() {
            *b = !*b;
        }
    }

    let mut digits = PayloadReader::new(&bytes);
    let mut int_part = String::new();

    if int_leftover_bytes > 0 {
        let val = digits.uint_be(int_leftover_bytes)?;
        if val > 0 {
            int_part.push_str(&val.to_string());
        }
    }
    for _ in 0..int_words {
        let val = digits.uint_be(4)?;
        if int_part.is_empty() {
            if val > 0 {
                int_part.push_str(&val.to_string());
            }
        } else {
            int_part.push_str(&format!("{:09}", val));
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut result = String::with_capacity(precision + 2);
    if negative {
        result.push('-');
    }
    result.push_str(&int_part);

    if scale > 0 {
        result.push('.');
        for _ in 0..frac_words {
            result.push_str(&format!("{:09}", digits.uint_be(4)?));
        }
        if frac_leftover_bytes > 0 {
            let val = digits.uint_be(frac_leftover_bytes)?;
            result.push_str(&format!("{:0width$}", val, width = frac_leftover));
        }
    }

    Ok(result)
}

// ── MySQL binary JSON ───────────────────────────────────────────────────────
//
// Type tags:
//   0x00/0x01 small/large object   0x02/0x03 small/large array
//   0x04 literal (null/true/false) 0x05/0x06 int16/uint16
//   0x07/0x08 int32/uint32         0x09/0x0a int64/uint64
//   0x0b double                    0x0c utf8 string
//   0x0f opaque (custom MySQL type)
// ────────────────────────────────────────────────────────────────────────────

/// Nesting limit for binary JSON documents
const MAX_JSON_DEPTH: usize = 100;

/// Decode a JSON column.
///
/// Falls back to parsing the bytes as JSON text (some servers log text), and
/// finally to a plain string, so a JSON column never fails the row.
pub fn decode_json_binary(data: &[u8]) -> JsonValue {
    if data.is_empty() {
        return JsonValue::Null;
    }
    match json_parse_typed(data[0], &data[1..], 0) {
        Ok(v) => v,
        Err(_) => serde_json::from_slice(data)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(data).into_owned())),
    }
}

fn json_error(detail: impl Into<String>) -> DecodeError {
    DecodeError::malformed("json", detail)
}

fn json_slice(data: &[u8], start: usize, len: usize) -> Result<&[u8], DecodeError> {
    data.get(start..start.saturating_add(len))
        .ok_or_else(|| json_error(format!("{} bytes at offset {} out of bounds", len, start)))
}

fn json_uint(data: &[u8], start: usize, len: usize) -> Result<u64, DecodeError> {
    Ok(json_slice(data, start, len)?
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | ((*b as u64) << (8 * i))))
}

fn json_parse_typed(type_byte: u8, data: &[u8], depth: usize) -> Result<JsonValue, DecodeError> {
    if depth > MAX_JSON_DEPTH {
        return Err(json_error("document nested too deeply"));
    }

    match type_byte {
        0x00 => json_parse_container(data, false, true, depth),
        0x01 => json_parse_container(data, true, true, depth),
        0x02 => json_parse_container(data, false, false, depth),
        0x03 => json_parse_container(data, true, false, depth),
        0x04 => Ok(json_literal(data.first().copied().unwrap_or(0) as u16)),
        0x05 => Ok(serde_json::json!(json_uint(data, 0, 2)? as u16 as i16)),
        0x06 => Ok(serde_json::json!(json_uint(data, 0, 2)? as u16)),
        0x07 => Ok(serde_json::json!(json_uint(data, 0, 4)? as u32 as i32)),
        0x08 => Ok(serde_json::json!(json_uint(data, 0, 4)? as u32)),
        0x09 => Ok(serde_json::json!(json_uint(data, 0, 8)? as i64)),
        0x0a => Ok(serde_json::json!(json_uint(data, 0, 8)?)),
        0x0b => Ok(serde_json::json!(f64::from_bits(json_uint(data, 0, 8)?))),
        0x0c => {
            let (len, prefix) = json_variable_length(data)?;
            let bytes = json_slice(data, prefix, len)?;
            Ok(JsonValue::String(String::from_utf8_lossy(bytes).into_owned()))
        }
        0x0f => {
            // Field type byte, then a length-prefixed blob
            let rest = data.get(1..).unwrap_or_default();
            let (len, prefix) = json_variable_length(rest)?;
            let bytes = json_slice(rest, prefix, len)?;
            Ok(match std::str::from_utf8(bytes) {
                Ok(s) => JsonValue::String(s.to_string()),
                Err(_) => JsonValue::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
            })
        }
        other => Err(json_error(format!("unknown type 0x{:02x}", other))),
    }
}

fn json_literal(code: u16) -> JsonValue {
    match code {
        0x01 => JsonValue::Bool(true),
        0x02 => JsonValue::Bool(false),
        _ => JsonValue::Null,
    }
}

/// Objects and arrays share a layout: element count, total size, then (for
/// objects) key entries, then value entries. `large` switches offsets and
/// counts from 2 to 4 bytes.
fn json_parse_container(
    data: &[u8],
    large: bool,
    is_object: bool,
    depth: usize,
) -> Result<JsonValue, DecodeError> {
    let offset_size: usize = if large { 4 } else { 2 };
    let element_count = json_uint(data, 0, offset_size)? as usize;

    let header_size = offset_size * 2;
    let key_entry_size = offset_size + 2;
    let value_entry_size = offset_size + 1;

    let value_entries_start = if is_object {
        header_size + element_count.saturating_mul(key_entry_size)
    } else {
        header_size
    };
    if value_entries_start.saturating_add(element_count.saturating_mul(value_entry_size)) > data.len() {
        return Err(json_error("container entries out of bounds"));
    }

    let mut object = serde_json::Map::new();
    let mut array = Vec::new();

    for i in 0..element_count {
        let ve_offset = value_entries_start + i * value_entry_size;
        let value_type = data[ve_offset];
        let value = json_resolve_value(data, value_type, ve_offset + 1, large, depth)?;

        if is_object {
            let ke_offset = header_size + i * key_entry_size;
            let key_offset = json_uint(data, ke_offset, offset_size)? as usize;
            let key_len = json_uint(data, ke_offset + offset_size, 2)? as usize;
            let key = String::from_utf8_lossy(json_slice(data, key_offset, key_len)?).into_owned();
            object.insert(key, value);
        } else {
            array.push(value);
        }
    }

    Ok(if is_object {
        JsonValue::Object(object)
    } else {
        JsonValue::Array(array)
    })
}

/// Small scalars (literals, 16-bit ints, and 32-bit ints in the large
/// format) are stored inline in the value entry; everything else is an
/// offset from the start of the container.
fn json_resolve_value(
    data: &[u8],
    type_byte: u8,
    entry_offset: usize,
    large: bool,
    depth: usize,
) -> Result<JsonValue, DecodeError> {
    match (type_byte, large) {
        (0x04, _) => return Ok(json_literal(json_uint(data, entry_offset, 2)? as u16)),
        (0x05, _) => return Ok(serde_json::json!(json_uint(data, entry_offset, 2)? as u16 as i16)),
        (0x06, _) => return Ok(serde_json::json!(json_uint(data, entry_offset, 2)? as u16)),
        (0x07, true) => {
            return Ok(serde_json::json!(json_uint(data, entry_offset, 4)? as u32 as i32))
        }
        (0x08, true) => return Ok(serde_json::json!(json_uint(data, entry_offset, 4)? as u32)),
        _ => {}
    }

    let offset_size = if large { 4 } else { 2 };
    let value_offset = json_uint(data, entry_offset, offset_size)? as usize;
    let nested = data
        .get(value_offset..)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| json_error("value offset out of bounds"))?;
    json_parse_typed(type_byte, nested, depth + 1)
}

/// Variable-length integer for string/opaque lengths: 7 bits per byte, high
/// bit = continuation, at most 5 bytes.
fn json_variable_length(data: &[u8]) -> Result<(usize, usize), DecodeError> {
    let mut length: usize = 0;
    for i in 0..5 {
        let b = *data
            .get(i)
            .ok_or_else(|| json_error("truncated variable-length integer"))? as usize;
        length |= (b & 0x7F) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((length, i + 1));
        }
    }
    Err(json_error("variable-length integer too long"))
}
