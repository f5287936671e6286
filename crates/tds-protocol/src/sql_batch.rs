//! SQL batch request payloads (packet type 0x01).
//!
//! A batch is the ALL_HEADERS block followed by the SQL text as UTF-16LE.
//! The only header sent is the transaction descriptor header, with a zero
//! descriptor (auto-commit) and one outstanding request.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{WireReader, decode_utf16_le, write_utf16_string};
use crate::error::ProtocolError;

/// Size of the ALL_HEADERS block this crate writes.
pub const ALL_HEADERS_SIZE: usize = 22;

const TRANSACTION_DESCRIPTOR_HEADER: u16 = 0x0002;

/// Encode a SQL batch payload in auto-commit mode.
///
/// ```
/// use tds_protocol::encode_sql_batch;
///
/// let payload = encode_sql_batch("SELECT 1");
/// assert_eq!(payload.len(), 22 + 16);
/// ```
#[must_use]
pub fn encode_sql_batch(sql: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_SIZE + sql.len() * 2);

    buf.put_u32_le(ALL_HEADERS_SIZE as u32);
    buf.put_u32_le(18); // header length
    buf.put_u16_le(TRANSACTION_DESCRIPTOR_HEADER);
    buf.put_u64_le(0); // transaction descriptor
    buf.put_u32_le(1); // outstanding requests

    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

/// Decode a SQL batch payload back into its SQL text.
///
/// Accepts payloads with or without an ALL_HEADERS block: pre-7.2 clients
/// send the bare text.
pub fn decode_sql_batch(payload: &[u8]) -> Result<String, ProtocolError> {
    let mut src = WireReader::new(payload);
    let mut text_start = 0;

    if payload.len() >= 4 {
        let total = src.read_u32_le()? as usize;
        if total >= 4 && total <= payload.len() && looks_like_all_headers(payload, total) {
            text_start = total;
        }
    }

    decode_utf16_le(&payload[text_start..])
        .ok_or(ProtocolError::StringEncoding { offset: text_start })
}

/// Walk the header list and check it exactly fills `total` bytes.
fn looks_like_all_headers(payload: &[u8], total: usize) -> bool {
    let mut pos = 4;
    while pos < total {
        let Some(len) = payload
            .get(pos..pos + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        else {
            return false;
        };
        if len < 6 {
            return false;
        }
        pos += len;
    }
    pos == total
}

/// A SQL batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    sql: String,
}

impl SqlBatch {
    /// Create a new SQL batch.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Encode the batch payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        encode_sql_batch(&self.sql)
    }

    /// Decode a batch payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        decode_sql_batch(payload).map(Self::new)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_sql_batch_layout() {
        let payload = encode_sql_batch("SELECT 1");
        assert_eq!(payload.len(), 38);
        assert_eq!(&payload[0..4], &[22, 0, 0, 0]);
        assert_eq!(&payload[4..8], &[18, 0, 0, 0]);
        assert_eq!(&payload[8..10], &[0x02, 0x00]);
        assert_eq!(&payload[10..18], &[0; 8]);
        assert_eq!(&payload[18..22], &[1, 0, 0, 0]);
        assert_eq!(&payload[22..24], &[b'S', 0]);
    }

    #[test]
    fn test_decode_with_and_without_headers() {
        let sql = "SELECT name FROM sys.databases -- ü";
        assert_eq!(decode_sql_batch(&encode_sql_batch(sql)).unwrap(), sql);

        let bare: Vec<u8> = "SELECT 2".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(decode_sql_batch(&bare).unwrap(), "SELECT 2");
    }

    #[test]
    fn test_empty_batch() {
        let payload = encode_sql_batch("");
        assert_eq!(payload.len(), ALL_HEADERS_SIZE);
        assert_eq!(SqlBatch::decode(&payload).unwrap().sql(), "");
    }

    #[test]
    fn test_odd_length_text_is_rejected() {
        let mut payload = BytesMut::from(&encode_sql_batch("x")[..]);
        payload.put_u8(0x41);
        assert_eq!(
            decode_sql_batch(&payload),
            Err(ProtocolError::StringEncoding { offset: 22 })
        );
    }
}
