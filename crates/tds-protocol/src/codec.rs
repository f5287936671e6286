//! Low-level reading and writing primitives shared by every decoder.
//!
//! Reading goes through [`WireReader`], a bounds-checked cursor that knows
//! the absolute offset of the slice it walks. Writing uses plain `BufMut`
//! helpers for the string encodings TDS uses.

use bytes::BufMut;

use crate::error::ProtocolError;

/// Bounds-checked little-endian cursor over a byte slice.
///
/// Every failed read reports a [`ProtocolError::Truncated`] whose offset is
/// `base + position`, so errors point into the original message even when
/// the reader only sees a window of it.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader whose first byte is at offset 0.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_base_offset(buf, 0)
    }

    /// Create a reader whose first byte is at offset `base` of a larger message.
    #[must_use]
    pub fn with_base_offset(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    /// Absolute offset of the next byte to be read.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Check whether all input has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.remaining() < needed {
            return Err(ProtocolError::Truncated {
                offset: self.offset(),
                expected: needed,
                actual: self.remaining(),
            });
        }
        Ok(())
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf[self.pos])
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.ensure(len)?;
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.read_bytes(len).map(|_| ())
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> Result<u16, ProtocolError> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Read a big-endian `u16`.
    pub fn read_u16_be(&mut self) -> Result<u16, ProtocolError> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read a big-endian `u32`.
    pub fn read_u32_be(&mut self) -> Result<u32, ProtocolError> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Read a little-endian `i32`.
    pub fn read_i32_le(&mut self) -> Result<i32, ProtocolError> {
        self.read_array().map(i32::from_le_bytes)
    }

    /// Read a little-endian `u64`.
    pub fn read_u64_le(&mut self) -> Result<u64, ProtocolError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read `char_count` UTF-16LE code units as a string.
    pub fn read_utf16(&mut self, char_count: usize) -> Result<String, ProtocolError> {
        let offset = self.offset();
        let bytes = self.read_bytes(char_count * 2)?;
        decode_utf16_le(bytes).ok_or(ProtocolError::StringEncoding { offset })
    }

    /// Read a B_VARCHAR: 1-byte length in characters, then UTF-16LE.
    pub fn read_b_varchar(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u8()? as usize;
        self.read_utf16(len)
    }

    /// Read a US_VARCHAR: 2-byte length in characters, then UTF-16LE.
    pub fn read_us_varchar(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u16_le()? as usize;
        self.read_utf16(len)
    }
}

/// Decode a UTF-16LE byte slice. Returns `None` for odd lengths or unpaired
/// surrogates.
#[must_use]
pub fn decode_utf16_le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Write a B_VARCHAR (1-byte character count), truncating at 255 units.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units = truncate_utf16(s, u8::MAX as usize);
    dst.put_u8(units.len() as u8);
    put_utf16_units(dst, &units);
}

/// Write a US_VARCHAR (2-byte character count), truncating at 65535 units.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units = truncate_utf16(s, u16::MAX as usize);
    dst.put_u16_le(units.len() as u16);
    put_utf16_units(dst, &units);
}

/// Write a UTF-16LE string without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Encode `s` as UTF-16 and cut it to at most `max_units` code units.
///
/// A surrogate pair straddling the limit is dropped as a whole.
#[must_use]
pub fn truncate_utf16(s: &str, max_units: usize) -> Vec<u16> {
    let mut units = Vec::with_capacity(s.len().min(max_units));
    for ch in s.chars() {
        let mut pair = [0u16; 2];
        let encoded = ch.encode_utf16(&mut pair);
        if units.len() + encoded.len() > max_units {
            break;
        }
        units.extend_from_slice(encoded);
    }
    units
}

/// Write raw UTF-16 code units little-endian.
pub fn put_utf16_units(dst: &mut impl BufMut, units: &[u16]) {
    for &unit in units {
        dst.put_u16_le(unit);
    }
}

/// Byte length of a string once encoded as UTF-16.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}
