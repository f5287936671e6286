//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS data.
///
/// Decoding errors carry the absolute byte offset (within the message being
/// decoded) at which the input was found to be malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Input ended before a field could be read completely.
    #[error("truncated input at offset {offset}: expected {expected} bytes, found {actual}")]
    Truncated {
        /// Offset of the field that could not be read.
        offset: usize,
        /// Number of bytes the field needs.
        expected: usize,
        /// Number of bytes that were available.
        actual: usize,
    },

    /// Unknown packet type byte in a packet header.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Undefined bits set in a packet status byte.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Packet header announces a length shorter than the header itself.
    #[error("invalid packet length: {0}")]
    InvalidPacketLength(usize),

    /// Unknown token type in the response stream.
    #[error("invalid token type 0x{token:02X} at offset {offset}")]
    InvalidTokenType {
        /// Offset of the token type byte.
        offset: usize,
        /// The offending byte.
        token: u8,
    },

    /// Column metadata declares a type this decoder cannot frame.
    #[error("unsupported column type 0x{type_id:02X} at offset {offset}")]
    UnsupportedType {
        /// Offset of the type byte.
        offset: usize,
        /// The offending type id.
        type_id: u8,
    },

    /// A value length is impossible for its declared type.
    #[error("invalid length {length} for type 0x{type_id:02X} at offset {offset}")]
    InvalidLength {
        /// Offset of the length prefix.
        offset: usize,
        /// Declared type id.
        type_id: u8,
        /// The length that was read.
        length: usize,
    },

    /// A ROW or NBCROW token arrived before any COLMETADATA.
    #[error("row token at offset {offset} has no preceding column metadata")]
    RowWithoutMetadata {
        /// Offset of the row token.
        offset: usize,
    },

    /// UTF-16 data that does not decode to a valid string.
    #[error("invalid UTF-16 string at offset {offset}")]
    StringEncoding {
        /// Offset of the first byte of the string.
        offset: usize,
    },

    /// Unknown option in a PRELOGIN record.
    #[error("invalid pre-login option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Malformed LOGIN7 record (offsets pointing outside the record).
    #[error("invalid login record: {0}")]
    InvalidLogin(&'static str),
}

impl ProtocolError {
    /// Check whether this error means "more bytes are needed".
    ///
    /// Streaming decoders use this to tell an incomplete buffer apart from
    /// genuinely malformed input.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }

    /// Byte offset the error refers to, when known.
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Truncated { offset, .. }
            | Self::InvalidTokenType { offset, .. }
            | Self::UnsupportedType { offset, .. }
            | Self::InvalidLength { offset, .. }
            | Self::RowWithoutMetadata { offset }
            | Self::StringEncoding { offset } => Some(*offset),
            _ => None,
        }
    }
}
