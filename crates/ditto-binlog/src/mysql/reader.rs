//! Bounds-checked cursor over an event payload
//!
//! Every read either returns the value or a [`DecodeError::Truncated`]
//! carrying the offset at which the buffer ran out. Nothing here panics on
//! short input.

use super::error::DecodeError;

/// Little-endian cursor over a borrowed payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Borrow the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Borrow everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.bytes(len).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn i16_le(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub fn u24_le(&mut self) -> Result<u32, DecodeError> {
        self.uint_le(3).map(|v| v as u32)
    }

    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32_le(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// 6-byte table id
    pub fn u48_le(&mut self) -> Result<u64, DecodeError> {
        self.uint_le(6)
    }

    pub fn u64_le(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64_le(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn f32_le(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn f64_le(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Unsigned little-endian integer of `len` bytes (at most 8).
    pub fn uint_le(&mut self, len: usize) -> Result<u64, DecodeError> {
        let bytes = self.bytes(len)?;
        Ok(bytes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | ((*b as u64) << (8 * i))))
    }

    /// Unsigned big-endian integer of `len` bytes (at most 8).
    pub fn uint_be(&mut self, len: usize) -> Result<u64, DecodeError> {
        let bytes = self.bytes(len)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    /// Length-encoded integer.
    ///
    /// `0xFB` (SQL NULL) and `0xFF` are not valid in event bodies.
    pub fn lenenc_int(&mut self) -> Result<u64, DecodeError> {
        let first = self.u8()?;
        match first {
            0..=250 => Ok(first as u64),
            252 => self.uint_le(2),
            253 => self.uint_le(3),
            254 => self.u64_le(),
            other => Err(DecodeError::InvalidLengthPrefix(other)),
        }
    }

    /// Length-encoded integer used as a count or size.
    pub fn lenenc_len(&mut self) -> Result<usize, DecodeError> {
        let value = self.lenenc_int()?;
        usize::try_from(value)
            .map_err(|_| DecodeError::malformed("length", format!("{} is out of range", value)))
    }
}

/// Bit `idx` of a little-endian bitmap.
pub fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    let byte_idx = idx / 8;
    let bit_idx = idx % 8;
    byte_idx < bitmap.len() && (bitmap[byte_idx] & (1 << bit_idx)) != 0
}
