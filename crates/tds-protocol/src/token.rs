//! TDS token stream definitions.
//!
//! Tokens are the units of a tabular response. The server sends a stream of
//! tokens that describe result-set metadata, rows, completion, messages and
//! session changes.
//!
//! ## Token Structure
//!
//! Each token begins with a 1-byte type identifier followed by token-specific
//! data. Message-like tokens (ERROR, INFO, LOGINACK, ENVCHANGE) carry a
//! 2-byte length; DONE tokens have a fixed size; COLMETADATA and row tokens
//! are self-describing and need the active column metadata to be framed.
//!
//! ## Incremental Parsing
//!
//! [`TokenParser`] accepts input in pieces. A token whose bytes are not all
//! present yet fails with [`ProtocolError::Truncated`] and leaves the parser
//! untouched, so the caller can [`push`](TokenParser::push) the next packet
//! and try again.
//!
//! ```rust,ignore
//! let mut parser = TokenParser::empty();
//! let mut metadata = None;
//!
//! parser.push(&packet_payload);
//! while let Some(token) = parser.next_token(metadata.as_ref())? {
//!     match token {
//!         Token::ColMetaData(meta) => metadata = Some(meta),
//!         Token::Row(row) => { /* one row, one value per column */ }
//!         Token::Done(done) if done.is_final() => break,
//!         _ => {}
//!     }
//! }
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::WireReader;
use crate::error::ProtocolError;
use crate::types::{ColumnFlags, LengthClass, TypeId};
use crate::version::TdsVersion;

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Return status of a stored procedure.
    ReturnStatus = 0x79,
    /// Column metadata.
    ColMetaData = 0x81,
    /// Table names (browse mode).
    TabName = 0xA4,
    /// Column info (browse mode).
    ColInfo = 0xA5,
    /// ORDER BY column list.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Login acknowledgement.
    LoginAck = 0xAD,
    /// Feature extension acknowledgement.
    FeatureExtAck = 0xAE,
    /// Data row.
    Row = 0xD1,
    /// Data row with null bitmap.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Session state (connection resiliency).
    SessionState = 0xE4,
    /// SSPI negotiation.
    Sspi = 0xED,
    /// Statement completion.
    Done = 0xFD,
    /// Stored procedure completion.
    DoneProc = 0xFE,
    /// Statement-within-procedure completion.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        let token = match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xE4 => Self::SessionState,
            0xED => Self::Sspi,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return None,
        };
        Some(token)
    }
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Column metadata opening a new result set.
    ColMetaData(ColMetaData),
    /// One data row (ROW and NBCROW both decode to this).
    Row(RawRow),
    /// Statement completion.
    Done(Done),
    /// Stored procedure completion.
    DoneProc(Done),
    /// Completion of a statement inside a procedure.
    DoneInProc(Done),
    /// Error message.
    Error(ServerMessage),
    /// Informational message.
    Info(ServerMessage),
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// Environment change.
    EnvChange(EnvChange),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// ORDER BY column list.
    Order(Order),
    /// A token that was framed and skipped because nothing consumes it.
    Ignored(TokenType),
}

/// Column metadata token (COLMETADATA).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColMetaData {
    /// Column descriptions in ordinal order.
    pub columns: Vec<ColumnData>,
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnData {
    /// Column name (may be empty).
    pub name: String,
    /// Declared type.
    pub type_id: TypeId,
    /// User type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Type-specific metadata.
    pub type_info: TypeInfo,
}

/// Type-specific column metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// Declared maximum length in bytes, for variable-length types.
    pub max_length: Option<u32>,
    /// Decimal precision.
    pub precision: Option<u8>,
    /// Decimal or fractional-second scale.
    pub scale: Option<u8>,
    /// Collation of character data.
    pub collation: Option<Collation>,
}

/// Raw 5-byte collation descriptor.
///
/// Carried through unchanged; no code-page conversion is performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Collation {
    /// LCID and comparison flags.
    pub info: u32,
    /// SQL sort id.
    pub sort_id: u8,
}

/// One data row: one slot per column, `None` for NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// Raw value bytes in column order.
    pub values: Vec<Option<Bytes>>,
}

bitflags! {
    /// DONE token status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// `row_count` is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention signal.
        const ATTN = 0x0020;
        /// Severe server error; results are unusable.
        const SRVERROR = 0x0100;
    }
}

/// Completion token body (DONE, DONEPROC, DONEINPROC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Token of the completed command.
    pub cur_cmd: u16,
    /// Affected rows, valid when `status` contains `COUNT`.
    pub row_count: u64,
}

/// ERROR or INFO token body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Message state.
    pub state: u8,
    /// Severity class (0-25).
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Name of the server that produced the message.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number within the batch or procedure.
    pub line: i32,
}

/// LOGINACK token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface type (1 = SQL_TSQL).
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version (major, minor, build high, build low).
    pub prog_version: u32,
}

/// ENVCHANGE types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvChangeType {
    /// Current database.
    Database,
    /// Session language.
    Language,
    /// Character set.
    CharacterSet,
    /// Negotiated packet size.
    PacketSize,
    /// Unicode sorting locale id.
    UnicodeSortingLocalId,
    /// Unicode comparison flags.
    UnicodeComparisonFlags,
    /// SQL collation.
    SqlCollation,
    /// Any other change; the value is kept as raw bytes.
    Other(u8),
}

impl EnvChangeType {
    /// Create from raw byte value.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharacterSet,
            4 => Self::PacketSize,
            5 => Self::UnicodeSortingLocalId,
            6 => Self::UnicodeComparisonFlags,
            7 => Self::SqlCollation,
            other => Self::Other(other),
        }
    }

    /// Raw byte value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Language => 2,
            Self::CharacterSet => 3,
            Self::PacketSize => 4,
            Self::UnicodeSortingLocalId => 5,
            Self::UnicodeComparisonFlags => 6,
            Self::SqlCollation => 7,
            Self::Other(other) => other,
        }
    }

    fn is_textual(self) -> bool {
        !matches!(self, Self::SqlCollation | Self::Other(_))
    }
}

/// Value carried by an ENVCHANGE token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// B_VARCHAR text value.
    Text(String),
    /// Raw bytes (collations, transaction descriptors, routing data).
    Binary(Bytes),
}

/// ENVCHANGE token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// What changed.
    pub env_type: EnvChangeType,
    /// New value.
    pub new_value: EnvValue,
    /// Previous value.
    pub old_value: EnvValue,
}

/// ORDER token body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    /// 1-based column numbers the result is ordered by.
    pub columns: Vec<u16>,
}

// =============================================================================
// ColMetaData Parsing
// =============================================================================

impl ColMetaData {
    /// Column count announcing "no metadata".
    pub const NO_METADATA: u16 = 0xFFFF;

    /// Decode a COLMETADATA body (after the token type byte).
    pub fn decode(src: &mut WireReader<'_>, version: TdsVersion) -> Result<Self, ProtocolError> {
        let column_count = src.read_u16_le()?;
        if column_count == Self::NO_METADATA {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            columns.push(ColumnData::decode(src, version)?);
        }
        Ok(Self { columns })
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Check whether the token described no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl ColumnData {
    fn decode(src: &mut WireReader<'_>, version: TdsVersion) -> Result<Self, ProtocolError> {
        // TDS 7.2+ widened the user type from 2 to 4 bytes
        let user_type = if version.requires_all_headers() {
            src.read_u32_le()?
        } else {
            u32::from(src.read_u16_le()?)
        };
        let flags = ColumnFlags::from_bits_truncate(src.read_u16_le()?);

        let type_offset = src.offset();
        let raw_type = src.read_u8()?;
        let type_id = TypeId::from_u8(raw_type)
            .filter(|t| t.length_class() != LengthClass::Unsupported)
            .ok_or(ProtocolError::UnsupportedType {
                offset: type_offset,
                type_id: raw_type,
            })?;

        let type_info = TypeInfo::decode(src, type_id, version)?;
        let name = src.read_b_varchar()?;

        Ok(Self {
            name,
            type_id,
            user_type,
            flags,
            type_info,
        })
    }

    /// Check if this column is nullable.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    /// Check whether values of this column use PLP framing.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.type_id.length_class() == LengthClass::Plp
            || (self.type_id.is_plp_capable()
                && self.type_info.max_length == Some(u32::from(u16::MAX)))
    }
}

impl TypeInfo {
    fn decode(
        src: &mut WireReader<'_>,
        type_id: TypeId,
        version: TdsVersion,
    ) -> Result<Self, ProtocolError> {
        let mut info = Self::default();
        match type_id {
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                info.max_length = Some(u32::from(src.read_u8()?));
                info.precision = Some(src.read_u8()?);
                info.scale = Some(src.read_u8()?);
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                info.scale = Some(src.read_u8()?);
            }
            TypeId::Date => {}
            TypeId::Xml => {
                // Schema-bound XML names its database, owning schema and collection
                if src.read_u8()? != 0 {
                    src.read_b_varchar()?;
                    src.read_b_varchar()?;
                    src.read_us_varchar()?;
                }
            }
            TypeId::Udt => {
                info.max_length = Some(u32::from(src.read_u16_le()?));
                src.read_b_varchar()?; // database
                src.read_b_varchar()?; // schema
                src.read_b_varchar()?; // type
                src.read_us_varchar()?; // assembly-qualified name
            }
            _ => match type_id.length_class() {
                LengthClass::Fixed(_) | LengthClass::Plp | LengthClass::Unsupported => {}
                LengthClass::Byte => info.max_length = Some(u32::from(src.read_u8()?)),
                LengthClass::UShort => info.max_length = Some(u32::from(src.read_u16_le()?)),
                LengthClass::TextPtr | LengthClass::Long => {
                    info.max_length = Some(src.read_u32_le()?);
                }
            },
        }

        if type_id.has_collation() {
            info.collation = Some(Collation {
                info: src.read_u32_le()?,
                sort_id: src.read_u8()?,
            });
        }

        if type_id.length_class() == LengthClass::TextPtr {
            // Table name: multi-part from TDS 7.2, a single US_VARCHAR before
            let parts = if version.requires_all_headers() {
                src.read_u8()?
            } else {
                1
            };
            for _ in 0..parts {
                src.read_us_varchar()?;
            }
        }

        Ok(info)
    }
}

// =============================================================================
// Row Parsing
// =============================================================================

impl RawRow {
    /// PLP total length announcing NULL.
    pub const PLP_NULL: u64 = u64::MAX;

    /// Decode a ROW body (after the token type byte).
    pub fn decode(src: &mut WireReader<'_>, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let mut values = Vec::with_capacity(metadata.columns.len());
        for column in &metadata.columns {
            values.push(Self::decode_value(src, column)?);
        }
        Ok(Self { values })
    }

    /// Decode an NBCROW body: a null bitmap followed by the non-null values.
    pub fn decode_nbc(
        src: &mut WireReader<'_>,
        metadata: &ColMetaData,
    ) -> Result<Self, ProtocolError> {
        let bitmap = src.read_bytes(metadata.columns.len().div_ceil(8))?;
        let mut values = Vec::with_capacity(metadata.columns.len());
        for (i, column) in metadata.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(None);
            } else {
                values.push(Self::decode_value(src, column)?);
            }
        }
        Ok(Self { values })
    }

    fn decode_value(
        src: &mut WireReader<'_>,
        column: &ColumnData,
    ) -> Result<Option<Bytes>, ProtocolError> {
        if column.is_plp() {
            return Self::decode_plp(src);
        }

        let type_id = column.type_id;
        if type_id == TypeId::Null {
            return Ok(None);
        }
        match type_id.length_class() {
            LengthClass::Fixed(size) => Ok(Some(Bytes::copy_from_slice(src.read_bytes(size)?))),
            LengthClass::Byte => {
                let offset = src.offset();
                let len = src.read_u8()? as usize;
                if len == 0 {
                    return Ok(None);
                }
                if !accepts_length(type_id, len) {
                    return Err(ProtocolError::InvalidLength {
                        offset,
                        type_id: type_id as u8,
                        length: len,
                    });
                }
                Ok(Some(Bytes::copy_from_slice(src.read_bytes(len)?)))
            }
            LengthClass::UShort => {
                let len = src.read_u16_le()?;
                if len == u16::MAX {
                    return Ok(None);
                }
                Ok(Some(Bytes::copy_from_slice(src.read_bytes(len as usize)?)))
            }
            LengthClass::TextPtr => {
                let ptr_len = src.read_u8()? as usize;
                if ptr_len == 0 {
                    return Ok(None);
                }
                src.skip(ptr_len)?;
                src.skip(8)?; // timestamp
                let len = src.read_u32_le()? as usize;
                Ok(Some(Bytes::copy_from_slice(src.read_bytes(len)?)))
            }
            LengthClass::Long => {
                let len = src.read_u32_le()? as usize;
                if len == 0 {
                    return Ok(None);
                }
                Ok(Some(Bytes::copy_from_slice(src.read_bytes(len)?)))
            }
            // Plp columns returned above
            LengthClass::Plp | LengthClass::Unsupported => Err(ProtocolError::UnsupportedType {
                offset: src.offset(),
                type_id: type_id as u8,
            }),
        }
    }

    /// PLP framing: u64 total length, then u32-prefixed chunks up to a zero chunk.
    fn decode_plp(src: &mut WireReader<'_>) -> Result<Option<Bytes>, ProtocolError> {
        let total = src.read_u64_le()?;
        if total == Self::PLP_NULL {
            return Ok(None);
        }

        let mut data = BytesMut::new();
        loop {
            let chunk_len = src.read_u32_le()? as usize;
            if chunk_len == 0 {
                break;
            }
            data.extend_from_slice(src.read_bytes(chunk_len)?);
        }
        Ok(Some(data.freeze()))
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Valid data lengths for byte-length types.
fn accepts_length(type_id: TypeId, len: usize) -> bool {
    match type_id {
        TypeId::IntN => matches!(len, 1 | 2 | 4 | 8),
        TypeId::BitN => len == 1,
        TypeId::FloatN | TypeId::MoneyN | TypeId::DateTimeN => matches!(len, 4 | 8),
        TypeId::Guid => len == 16,
        TypeId::Date => len == 3,
        TypeId::Time => (3..=5).contains(&len),
        TypeId::DateTime2 => (6..=8).contains(&len),
        TypeId::DateTimeOffset => (8..=10).contains(&len),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            (2..=17).contains(&len)
        }
        _ => true,
    }
}

// =============================================================================
// Completion and Message Tokens
// =============================================================================

impl Done {
    /// Body size for TDS 7.2+ (status, command, 64-bit row count).
    pub const SIZE: usize = 12;

    /// Decode a DONE/DONEPROC/DONEINPROC body.
    ///
    /// Servers speaking TDS 7.0/7.1 send a 32-bit row count.
    pub fn decode(src: &mut WireReader<'_>, version: TdsVersion) -> Result<Self, ProtocolError> {
        let status = DoneStatus::from_bits_truncate(src.read_u16_le()?);
        let cur_cmd = src.read_u16_le()?;
        let row_count = if version.requires_all_headers() {
            src.read_u64_le()?
        } else {
            u64::from(src.read_u32_le()?)
        };
        Ok(Self {
            status,
            cur_cmd,
            row_count,
        })
    }

    /// Encode as a token of the given completion type (TDS 7.2+ layout).
    pub fn encode(&self, token_type: TokenType, dst: &mut impl BufMut) {
        dst.put_u8(token_type as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }

    /// Check if more results follow.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Check if the statement failed.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR) || self.status.contains(DoneStatus::SRVERROR)
    }

    /// Check if the row count is valid.
    #[must_use]
    pub const fn has_count(&self) -> bool {
        self.status.contains(DoneStatus::COUNT)
    }

    /// Check if this token ends the response.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !self.has_more()
    }
}

impl ServerMessage {
    /// Decode an ERROR/INFO body (after the length prefix).
    pub fn decode(src: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            number: src.read_i32_le()?,
            state: src.read_u8()?,
            class: src.read_u8()?,
            message: src.read_us_varchar()?,
            server: src.read_b_varchar()?,
            procedure: src.read_b_varchar()?,
            line: src.read_i32_le()?,
        })
    }

    /// Check if this message ends the connection (severity 20 and above).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.class >= 20
    }
}

impl LoginAck {
    /// Decode a LOGINACK body (after the length prefix).
    pub fn decode(src: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            interface: src.read_u8()?,
            // Sent in network byte order, unlike the LOGIN7 field
            tds_version: TdsVersion::new(src.read_u32_be()?),
            prog_name: src.read_b_varchar()?,
            prog_version: src.read_u32_be()?,
        })
    }

    /// Server program version as `major.minor.build`.
    #[must_use]
    pub fn server_version(&self) -> String {
        let [major, minor, build_hi, build_lo] = self.prog_version.to_be_bytes();
        format!("{major}.{minor}.{}", u16::from_be_bytes([build_hi, build_lo]))
    }
}

impl EnvChange {
    /// Decode an ENVCHANGE body (after the length prefix).
    pub fn decode(src: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let env_type = EnvChangeType::from_u8(src.read_u8()?);

        if env_type.is_textual() {
            let new_value = EnvValue::Text(src.read_b_varchar()?);
            let old_value = EnvValue::Text(src.read_b_varchar()?);
            return Ok(Self {
                env_type,
                new_value,
                old_value,
            });
        }

        // Binary payloads vary by type; keep whatever the token carries.
        let rest = src.read_bytes(src.remaining())?;
        Ok(Self {
            env_type,
            new_value: EnvValue::Binary(Bytes::copy_from_slice(rest)),
            old_value: EnvValue::Binary(Bytes::new()),
        })
    }

    /// New database name, when this is a database change.
    #[must_use]
    pub fn new_database(&self) -> Option<&str> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::Database, EnvValue::Text(name)) => Some(name),
            _ => None,
        }
    }

    /// New packet size, when this is a packet size change.
    #[must_use]
    pub fn new_packet_size(&self) -> Option<usize> {
        match (&self.env_type, &self.new_value) {
            (EnvChangeType::PacketSize, EnvValue::Text(size)) => size.parse().ok(),
            _ => None,
        }
    }
}

impl Order {
    fn decode(src: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let mut columns = Vec::with_capacity(src.remaining() / 2);
        while src.remaining() >= 2 {
            columns.push(src.read_u16_le()?);
        }
        Ok(Self { columns })
    }
}

// =============================================================================
// Token Parser
// =============================================================================

/// Incremental token stream parser.
///
/// Input is appended with [`push`](Self::push) as packets arrive. Offsets in
/// errors are absolute positions within the whole response message.
#[derive(Debug, Default)]
pub struct TokenParser {
    buf: BytesMut,
    consumed: usize,
    version: TdsVersion,
}

impl TokenParser {
    /// Create a parser over a complete buffer.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        let mut parser = Self::empty();
        parser.push(&data);
        parser
    }

    /// Create a parser with no input yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set the protocol version that decides DONE and metadata layouts.
    #[must_use]
    pub fn with_version(mut self, version: TdsVersion) -> Self {
        self.version = version;
        self
    }

    /// Change the protocol version mid-stream (after LOGINACK).
    pub fn set_version(&mut self, version: TdsVersion) {
        self.version = version;
    }

    /// Append more input.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of unparsed bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Check if there are unparsed bytes.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Absolute offset of the next token.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.consumed
    }

    /// Peek at the next token type without consuming it.
    #[must_use]
    pub fn peek_token_type(&self) -> Option<TokenType> {
        self.buf.first().copied().and_then(TokenType::from_u8)
    }

    /// Parse the next token.
    ///
    /// `metadata` is the column metadata of the active result set; row tokens
    /// cannot be framed without it. Returns `Ok(None)` when the buffer is
    /// empty. On any error the buffer is left as it was.
    pub fn next_token(
        &mut self,
        metadata: Option<&ColMetaData>,
    ) -> Result<Option<Token>, ProtocolError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut src = WireReader::with_base_offset(&self.buf, self.consumed);
        let token = decode_token(&mut src, metadata, self.version)?;
        let used = src.position();

        self.buf.advance(used);
        self.consumed += used;
        Ok(Some(token))
    }
}

fn decode_token(
    src: &mut WireReader<'_>,
    metadata: Option<&ColMetaData>,
    version: TdsVersion,
) -> Result<Token, ProtocolError> {
    let token_offset = src.offset();
    let raw = src.read_u8()?;
    let token_type = TokenType::from_u8(raw).ok_or(ProtocolError::InvalidTokenType {
        offset: token_offset,
        token: raw,
    })?;

    let token = match token_type {
        TokenType::ColMetaData => Token::ColMetaData(ColMetaData::decode(src, version)?),
        TokenType::Row | TokenType::NbcRow => {
            let metadata = metadata.ok_or(ProtocolError::RowWithoutMetadata {
                offset: token_offset,
            })?;
            if token_type == TokenType::Row {
                Token::Row(RawRow::decode(src, metadata)?)
            } else {
                Token::Row(RawRow::decode_nbc(src, metadata)?)
            }
        }
        TokenType::Done => Token::Done(Done::decode(src, version)?),
        TokenType::DoneProc => Token::DoneProc(Done::decode(src, version)?),
        TokenType::DoneInProc => Token::DoneInProc(Done::decode(src, version)?),
        TokenType::ReturnStatus => Token::ReturnStatus(src.read_i32_le()?),
        TokenType::Error => Token::Error(ServerMessage::decode(&mut length_prefixed(src)?)?),
        TokenType::Info => Token::Info(ServerMessage::decode(&mut length_prefixed(src)?)?),
        TokenType::LoginAck => Token::LoginAck(LoginAck::decode(&mut length_prefixed(src)?)?),
        TokenType::EnvChange => Token::EnvChange(EnvChange::decode(&mut length_prefixed(src)?)?),
        TokenType::Order => Token::Order(Order::decode(&mut length_prefixed(src)?)?),
        TokenType::TabName | TokenType::ColInfo | TokenType::Sspi => {
            length_prefixed(src)?;
            Token::Ignored(token_type)
        }
        TokenType::SessionState => {
            let len = src.read_u32_le()? as usize;
            src.skip(len)?;
            Token::Ignored(token_type)
        }
        TokenType::FeatureExtAck => {
            // Sequence of (id, u32 length, data) closed by 0xFF
            while src.read_u8()? != 0xFF {
                let len = src.read_u32_le()? as usize;
                src.skip(len)?;
            }
            Token::Ignored(token_type)
        }
    };
    Ok(token)
}

/// Read a 2-byte length and return a reader over exactly that many bytes.
fn length_prefixed<'a>(src: &mut WireReader<'a>) -> Result<WireReader<'a>, ProtocolError> {
    let len = src.read_u16_le()? as usize;
    let base = src.offset();
    Ok(WireReader::with_base_offset(src.read_bytes(len)?, base))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn int_column(name: &str) -> ColumnData {
        ColumnData {
            name: name.to_string(),
            type_id: TypeId::Int4,
            user_type: 0,
            flags: ColumnFlags::empty(),
            type_info: TypeInfo::default(),
        }
    }

    fn nvarchar_column(name: &str, max_length: u32) -> ColumnData {
        ColumnData {
            name: name.to_string(),
            type_id: TypeId::NVarChar,
            user_type: 0,
            flags: ColumnFlags::NULLABLE,
            type_info: TypeInfo {
                max_length: Some(max_length),
                collation: Some(Collation::default()),
                ..Default::default()
            },
        }
    }

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn test_done_encode_decode() {
        let done = Done {
            status: DoneStatus::COUNT | DoneStatus::MORE,
            cur_cmd: 193,
            row_count: 42,
        };

        let mut buf = BytesMut::new();
        done.encode(TokenType::Done, &mut buf);
        assert_eq!(buf.len(), 1 + Done::SIZE);

        let mut parser = TokenParser::new(buf.freeze());
        match parser.next_token(None).unwrap().unwrap() {
            Token::Done(decoded) => {
                assert_eq!(decoded, done);
                assert!(decoded.has_more());
                assert!(!decoded.is_final());
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(parser.next_token(None).unwrap().is_none());
    }

    #[test]
    fn test_done_with_legacy_row_count() {
        let data = Bytes::from_static(&[
            0xFD, // DONE
            0x10, 0x00, // status: COUNT
            0xC1, 0x00, // cur_cmd: 193
            0x07, 0x00, 0x00, 0x00, // 32-bit row count
        ]);
        let mut parser = TokenParser::new(data).with_version(TdsVersion::V7_1);
        match parser.next_token(None).unwrap().unwrap() {
            Token::Done(done) => assert_eq!(done.row_count, 7),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn test_colmetadata_no_columns() {
        let data = Bytes::from_static(&[0x81, 0xFF, 0xFF]);
        let mut parser = TokenParser::new(data);
        match parser.next_token(None).unwrap().unwrap() {
            Token::ColMetaData(meta) => assert!(meta.is_empty()),
            other => panic!("expected ColMetaData, got {other:?}"),
        }
    }

    #[test]
    fn test_colmetadata_int_and_nvarchar() {
        let mut data = vec![0x81, 0x02, 0x00]; // COLMETADATA, 2 columns
        // Column 1: INT "id"
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // user_type
        data.extend_from_slice(&[0x00, 0x00]); // flags
        data.push(0x38); // INT4
        data.push(0x02);
        data.extend(utf16("id"));
        // Column 2: NVARCHAR(50) "name", nullable
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x01, 0x00]);
        data.push(0xE7);
        data.extend_from_slice(&[0x64, 0x00]); // max length 100 bytes
        data.extend_from_slice(&[0x09, 0x04, 0xD0, 0x00, 0x34]); // collation
        data.push(0x04);
        data.extend(utf16("name"));

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::ColMetaData(meta) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected ColMetaData");
        };

        assert_eq!(meta.column_count(), 2);
        assert_eq!(meta.columns[0].name, "id");
        assert_eq!(meta.columns[0].type_id, TypeId::Int4);
        assert!(!meta.columns[0].is_nullable());
        assert_eq!(meta.columns[1].name, "name");
        assert_eq!(meta.columns[1].type_info.max_length, Some(100));
        assert_eq!(
            meta.columns[1].type_info.collation,
            Some(Collation {
                info: 0x00D0_0409,
                sort_id: 0x34
            })
        );
        assert!(meta.columns[1].is_nullable());
    }

    #[test]
    fn test_colmetadata_rejects_unsupported_type() {
        let mut data = vec![0x81, 0x01, 0x00];
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        data.push(0xF3); // table-valued parameter

        let mut parser = TokenParser::new(Bytes::from(data));
        assert_eq!(
            parser.next_token(None).unwrap_err(),
            ProtocolError::UnsupportedType {
                offset: 9,
                type_id: 0xF3
            }
        );
    }

    #[test]
    fn test_xml_column_and_row() {
        // COLMETADATA: one XML column without schema, named "x"
        let mut data = vec![0x81, 0x01, 0x00, 0, 0, 0, 0, 0x01, 0x00, 0xF1, 0x00, 0x01];
        data.extend(utf16("x"));

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::ColMetaData(meta) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected ColMetaData");
        };
        assert_eq!(meta.columns[0].type_id, TypeId::Xml);
        assert!(meta.columns[0].is_plp());

        let body = utf16("<a/>");
        let mut data = vec![0xD1];
        data.extend_from_slice(&(body.len() as u64).to_le_bytes());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&body);
        data.extend_from_slice(&0u32.to_le_bytes());
        // second row: NULL
        data.push(0xD1);
        data.extend_from_slice(&RawRow::PLP_NULL.to_le_bytes());

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::Row(row) = parser.next_token(Some(&meta)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values[0].as_deref(), Some(&body[..]));
        let Token::Row(row) = parser.next_token(Some(&meta)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values[0], None);
    }

    #[test]
    fn test_schema_bound_xml_metadata() {
        let mut data = vec![0x81, 0x01, 0x00, 0, 0, 0, 0, 0x01, 0x00, 0xF1, 0x01];
        data.push(2);
        data.extend(utf16("db"));
        data.push(3);
        data.extend(utf16("dbo"));
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend(utf16("docs"));
        data.push(1);
        data.extend(utf16("x"));

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::ColMetaData(meta) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected ColMetaData");
        };
        assert_eq!(meta.columns[0].name, "x");
        assert!(parser.next_token(None).unwrap().is_none());
    }

    #[test]
    fn test_udt_and_variant_columns() {
        let mut data = vec![0x81, 0x02, 0x00];
        // UDT column "g"
        data.extend_from_slice(&[0, 0, 0, 0, 0x01, 0x00, 0xF0]);
        data.extend_from_slice(&0xFFFFu16.to_le_bytes());
        data.push(0);
        data.push(3);
        data.extend(utf16("sys"));
        data.push(9);
        data.extend(utf16("geography"));
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend(utf16("Sq"));
        data.push(1);
        data.extend(utf16("g"));
        // sql_variant column "v"
        data.extend_from_slice(&[0, 0, 0, 0, 0x01, 0x00, 0x62]);
        data.extend_from_slice(&8016u32.to_le_bytes());
        data.push(1);
        data.extend(utf16("v"));

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::ColMetaData(meta) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected ColMetaData");
        };
        assert_eq!(meta.columns[0].type_id, TypeId::Udt);
        assert_eq!(meta.columns[0].type_info.max_length, Some(0xFFFF));
        assert_eq!(meta.columns[1].type_id, TypeId::Variant);
        assert_eq!(meta.columns[1].type_info.max_length, Some(8016));
        assert!(!meta.columns[1].is_plp());

        // UDT bytes as one PLP chunk, variant as int4 base type
        let variant = [0x38, 0x00, 7, 0, 0, 0];
        let mut data = vec![0xD1];
        data.extend_from_slice(&3u64.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[0xE6, 0x10, 0x00]);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&(variant.len() as u32).to_le_bytes());
        data.extend_from_slice(&variant);
        // NULL variant
        data.push(0xD1);
        data.extend_from_slice(&RawRow::PLP_NULL.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::Row(row) = parser.next_token(Some(&meta)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values[0].as_deref(), Some(&[0xE6, 0x10, 0x00][..]));
        assert_eq!(row.values[1].as_deref(), Some(&variant[..]));
        let Token::Row(row) = parser.next_token(Some(&meta)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values, vec![None, None]);
    }

    #[test]
    fn test_row_int_and_nvarchar() {
        let metadata = ColMetaData {
            columns: vec![int_column("id"), nvarchar_column("name", 100)],
        };

        let mut data = vec![0xD1];
        data.extend_from_slice(&42i32.to_le_bytes());
        data.extend_from_slice(&[0x0A, 0x00]);
        data.extend(utf16("Alice"));

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::Row(row) = parser.next_token(Some(&metadata)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.len(), 2);
        assert_eq!(row.values[0].as_deref(), Some(&42i32.to_le_bytes()[..]));
        assert_eq!(row.values[1].as_deref(), Some(&utf16("Alice")[..]));
    }

    #[test]
    fn test_row_null_and_empty_strings() {
        let metadata = ColMetaData {
            columns: vec![nvarchar_column("a", 20), nvarchar_column("b", 20)],
        };
        let data = Bytes::from_static(&[
            0xD1, // ROW
            0xFF, 0xFF, // NULL
            0x00, 0x00, // empty string
        ]);

        let mut parser = TokenParser::new(data);
        let Token::Row(row) = parser.next_token(Some(&metadata)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values[0], None);
        assert_eq!(row.values[1], Some(Bytes::new()));
    }

    #[test]
    fn test_nbcrow_null_bitmap() {
        let metadata = ColMetaData {
            columns: vec![int_column("a"), nvarchar_column("b", 20), int_column("c")],
        };
        let mut data = vec![0xD2, 0b0000_0010]; // column 1 is NULL
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&3i32.to_le_bytes());

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::Row(row) = parser.next_token(Some(&metadata)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values[0].as_deref(), Some(&1i32.to_le_bytes()[..]));
        assert_eq!(row.values[1], None);
        assert_eq!(row.values[2].as_deref(), Some(&3i32.to_le_bytes()[..]));
    }

    #[test]
    fn test_plp_value_reassembles_chunks() {
        let metadata = ColMetaData {
            columns: vec![nvarchar_column("body", 0xFFFF)],
        };
        let mut data = vec![0xD1];
        data.extend_from_slice(&6u64.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend(utf16("a"));
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend(utf16("bc"));
        data.extend_from_slice(&0u32.to_le_bytes());

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::Row(row) = parser.next_token(Some(&metadata)).unwrap().unwrap() else {
            panic!("expected Row");
        };
        assert_eq!(row.values[0].as_deref(), Some(&utf16("abc")[..]));
    }

    #[test]
    fn test_intn_rejects_impossible_length() {
        let metadata = ColMetaData {
            columns: vec![ColumnData {
                type_id: TypeId::IntN,
                type_info: TypeInfo {
                    max_length: Some(4),
                    ..Default::default()
                },
                ..int_column("n")
            }],
        };
        let data = Bytes::from_static(&[0xD1, 0x03, 0x01, 0x02, 0x03]);
        let mut parser = TokenParser::new(data);
        assert_eq!(
            parser.next_token(Some(&metadata)).unwrap_err(),
            ProtocolError::InvalidLength {
                offset: 1,
                type_id: 0x26,
                length: 3
            }
        );
    }

    #[test]
    fn test_truncated_row_leaves_parser_intact() {
        let metadata = ColMetaData {
            columns: vec![int_column("a"), int_column("b")],
        };
        let mut parser = TokenParser::empty();
        parser.push(&[0xD1, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00]);

        let err = parser.next_token(Some(&metadata)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                offset: 5,
                expected: 4,
                actual: 2
            }
        );
        assert_eq!(parser.remaining(), 7);
        assert_eq!(parser.offset(), 0);

        parser.push(&[0x00, 0x00]);
        assert!(matches!(
            parser.next_token(Some(&metadata)).unwrap(),
            Some(Token::Row(_))
        ));
        assert_eq!(parser.offset(), 9);
        assert!(!parser.has_remaining());
    }

    #[test]
    fn test_row_without_metadata_fails() {
        let mut parser = TokenParser::new(Bytes::from_static(&[0xD1, 0x2A, 0x00, 0x00, 0x00]));
        assert_eq!(
            parser.next_token(None).unwrap_err(),
            ProtocolError::RowWithoutMetadata { offset: 0 }
        );
    }

    #[test]
    fn test_error_token() {
        let mut body = Vec::new();
        body.extend_from_slice(&208i32.to_le_bytes());
        body.push(1); // state
        body.push(16); // class
        let message = "Invalid object name 'nope'.";
        body.extend_from_slice(&(message.encode_utf16().count() as u16).to_le_bytes());
        body.extend(utf16(message));
        body.push(3);
        body.extend(utf16("srv"));
        body.push(0);
        body.extend_from_slice(&1i32.to_le_bytes());

        let mut data = vec![0xAA];
        data.extend_from_slice(&(body.len() as u16).to_le_bytes());
        data.extend(body);

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::Error(err) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected Error");
        };
        assert_eq!(err.number, 208);
        assert_eq!(err.class, 16);
        assert_eq!(err.message, message);
        assert_eq!(err.server, "srv");
        assert_eq!(err.procedure, "");
        assert_eq!(err.line, 1);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_login_ack_token() {
        let mut body = vec![0x01, 0x74, 0x00, 0x00, 0x04];
        body.push(4);
        body.extend(utf16("Mock"));
        body.extend_from_slice(&[0x10, 0x00, 0x11, 0x94]);

        let mut data = vec![0xAD];
        data.extend_from_slice(&(body.len() as u16).to_le_bytes());
        data.extend(body);

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::LoginAck(ack) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected LoginAck");
        };
        assert_eq!(ack.tds_version, TdsVersion::V7_4);
        assert_eq!(ack.prog_name, "Mock");
        assert_eq!(ack.server_version(), "16.0.4500");
    }

    #[test]
    fn test_env_change_database_and_packet_size() {
        let mut data = Vec::new();
        for (kind, new, old) in [(1u8, "sales", "master"), (4, "8192", "4096")] {
            let mut body = vec![kind];
            body.push(new.len() as u8);
            body.extend(utf16(new));
            body.push(old.len() as u8);
            body.extend(utf16(old));
            data.push(0xE3);
            data.extend_from_slice(&(body.len() as u16).to_le_bytes());
            data.extend(body);
        }

        let mut parser = TokenParser::new(Bytes::from(data));
        let Token::EnvChange(db) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected EnvChange");
        };
        assert_eq!(db.new_database(), Some("sales"));
        assert_eq!(db.old_value, EnvValue::Text("master".into()));

        let Token::EnvChange(size) = parser.next_token(None).unwrap().unwrap() else {
            panic!("expected EnvChange");
        };
        assert_eq!(size.new_packet_size(), Some(8192));
        assert_eq!(size.new_database(), None);
    }

    #[test]
    fn test_unknown_token_type() {
        let mut parser = TokenParser::new(Bytes::from_static(&[0x42]));
        assert_eq!(
            parser.next_token(None).unwrap_err(),
            ProtocolError::InvalidTokenType {
                offset: 0,
                token: 0x42
            }
        );
    }

    #[test]
    fn test_peek_token_type() {
        let parser = TokenParser::new(Bytes::from_static(&[0xFD]));
        assert_eq!(parser.peek_token_type(), Some(TokenType::Done));
        assert_eq!(TokenParser::empty().peek_token_type(), None);
    }
}
