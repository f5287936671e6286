//! Server-side token encoding.
//!
//! [`TokenWriter`] builds the payload of a tabular result message the way a
//! server lays it out. The mock server uses it for every reply; tests use it
//! directly to hand-craft malformed or unusual streams.
//!
//! ```rust
//! use tds_protocol::DoneStatus;
//! use tds_testing::tokens::TokenWriter;
//!
//! let payload = TokenWriter::new()
//!     .info(5701, "Changed database context to 'sales'.")
//!     .done(DoneStatus::empty(), 0)
//!     .finish();
//! assert!(!payload.is_empty());
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::codec::{write_b_varchar, write_us_varchar};
use tds_protocol::{
    ColumnFlags, DoneStatus, EncryptionLevel, EnvChangeType, LengthClass, PreLogin, TdsVersion,
    TokenType, TypeId,
};

use crate::responses::{MockColumn, ScalarValue};

/// Name the mock reports as the origin of its messages.
pub const SERVER_NAME: &str = "MockServer";

/// Default collation: Latin1_General_CI_AS.
const COLLATION_INFO: u32 = 0x00D0_0409;
const COLLATION_SORT_ID: u8 = 0x34;

/// Product version the mock reports in PRELOGIN and LOGINACK (16.0.1000).
pub const PROGRAM_VERSION: u32 = 0x1000_03E8;

/// Builder for a token stream.
#[derive(Debug, Clone)]
pub struct TokenWriter {
    buf: BytesMut,
    version: TdsVersion,
}

impl Default for TokenWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenWriter {
    /// Create a writer producing the TDS 7.2+ layout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_version(TdsVersion::V7_4)
    }

    /// Create a writer for a negotiated version.
    ///
    /// Before 7.2 the user type is two bytes and row counts are 32-bit.
    #[must_use]
    pub fn with_version(version: TdsVersion) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            version,
        }
    }

    /// LOGINACK for the given version and program name.
    pub fn login_ack(&mut self, tds_version: TdsVersion, prog_name: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u8(1); // SQL_TSQL
        body.put_u32(tds_version.raw());
        write_b_varchar(&mut body, prog_name);
        body.put_u32(PROGRAM_VERSION);
        self.framed(TokenType::LoginAck, &body)
    }

    /// Textual ENVCHANGE.
    pub fn env_change(&mut self, env_type: EnvChangeType, new: &str, old: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u8(env_type.as_u8());
        write_b_varchar(&mut body, new);
        write_b_varchar(&mut body, old);
        self.framed(TokenType::EnvChange, &body)
    }

    /// ENVCHANGE with an arbitrary binary body after the type byte.
    pub fn env_change_raw(&mut self, env_type: u8, body: &[u8]) -> &mut Self {
        let mut framed = BytesMut::with_capacity(body.len() + 1);
        framed.put_u8(env_type);
        framed.put_slice(body);
        self.framed(TokenType::EnvChange, &framed)
    }

    /// ERROR token.
    pub fn error(&mut self, number: i32, class: u8, message: &str) -> &mut Self {
        self.message(TokenType::Error, number, class, message)
    }

    /// INFO token (severity 0).
    pub fn info(&mut self, number: i32, message: &str) -> &mut Self {
        self.message(TokenType::Info, number, 0, message)
    }

    fn message(&mut self, token: TokenType, number: i32, class: u8, message: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_i32_le(number);
        body.put_u8(1); // state
        body.put_u8(class);
        write_us_varchar(&mut body, message);
        write_b_varchar(&mut body, SERVER_NAME);
        write_b_varchar(&mut body, "");
        body.put_i32_le(1); // line
        self.framed(token, &body)
    }

    /// COLMETADATA for `columns`.
    pub fn col_metadata(&mut self, columns: &[MockColumn]) -> &mut Self {
        self.buf.put_u8(TokenType::ColMetaData as u8);
        self.buf.put_u16_le(columns.len() as u16);
        for column in columns {
            self.column(column);
        }
        self
    }

    fn column(&mut self, column: &MockColumn) {
        if self.version.requires_all_headers() {
            self.buf.put_u32_le(0);
        } else {
            self.buf.put_u16_le(0);
        }
        let flags = if column.nullable {
            ColumnFlags::NULLABLE
        } else {
            ColumnFlags::empty()
        };
        self.buf.put_u16_le(flags.bits());

        let type_id = column.type_id;
        self.buf.put_u8(type_id as u8);
        match type_id {
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                self.buf.put_u8(column.max_length as u8);
                self.buf.put_u8(column.precision);
                self.buf.put_u8(column.scale);
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                self.buf.put_u8(column.scale);
            }
            TypeId::Date => {}
            TypeId::Xml => self.buf.put_u8(0), // no schema collection
            TypeId::Udt => {
                self.buf.put_u16_le(column.max_length as u16);
                write_b_varchar(&mut self.buf, "mock");
                write_b_varchar(&mut self.buf, "dbo");
                write_b_varchar(&mut self.buf, "mock_type");
                write_us_varchar(&mut self.buf, "Mock.Types, Version=1.0.0.0");
            }
            _ => match type_id.length_class() {
                LengthClass::Fixed(_) | LengthClass::Plp | LengthClass::Unsupported => {}
                LengthClass::Byte => self.buf.put_u8(column.max_length as u8),
                LengthClass::UShort => self.buf.put_u16_le(column.max_length as u16),
                LengthClass::TextPtr | LengthClass::Long => self.buf.put_u32_le(column.max_length),
            },
        }

        if type_id.has_collation() {
            self.buf.put_u32_le(COLLATION_INFO);
            self.buf.put_u8(COLLATION_SORT_ID);
        }

        if type_id.length_class() == LengthClass::TextPtr {
            if self.version.requires_all_headers() {
                self.buf.put_u8(1);
            }
            write_us_varchar(&mut self.buf, "mock_table");
        }

        write_b_varchar(&mut self.buf, &column.name);
    }

    /// ROW with one value per column.
    ///
    /// Missing values are written as NULL; extra values are ignored.
    pub fn row(&mut self, columns: &[MockColumn], values: &[ScalarValue]) -> &mut Self {
        self.buf.put_u8(TokenType::Row as u8);
        for (i, column) in columns.iter().enumerate() {
            let value = values.get(i).unwrap_or(&ScalarValue::Null);
            encode_value(column, value, &mut self.buf);
        }
        self
    }

    /// DONE token.
    pub fn done(&mut self, status: DoneStatus, row_count: u64) -> &mut Self {
        self.completion(TokenType::Done, status, row_count)
    }

    /// DONEPROC token.
    pub fn done_proc(&mut self, status: DoneStatus, row_count: u64) -> &mut Self {
        self.completion(TokenType::DoneProc, status, row_count)
    }

    /// DONEINPROC token.
    pub fn done_in_proc(&mut self, status: DoneStatus, row_count: u64) -> &mut Self {
        self.completion(TokenType::DoneInProc, status, row_count)
    }

    fn completion(&mut self, token: TokenType, status: DoneStatus, row_count: u64) -> &mut Self {
        self.buf.put_u8(token as u8);
        self.buf.put_u16_le(status.bits());
        self.buf.put_u16_le(0xC1); // SELECT
        if self.version.requires_all_headers() {
            self.buf.put_u64_le(row_count);
        } else {
            self.buf.put_u32_le(row_count as u32);
        }
        self
    }

    /// RETURNSTATUS token.
    pub fn return_status(&mut self, status: i32) -> &mut Self {
        self.buf.put_u8(TokenType::ReturnStatus as u8);
        self.buf.put_i32_le(status);
        self
    }

    /// Append bytes verbatim.
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    fn framed(&mut self, token: TokenType, body: &[u8]) -> &mut Self {
        self.buf.put_u8(token as u8);
        self.buf.put_u16_le(body.len() as u16);
        self.buf.put_slice(body);
        self
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the payload, leaving the writer empty.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// PRELOGIN reply announcing `encryption`.
#[must_use]
pub fn prelogin_response(encryption: EncryptionLevel) -> Bytes {
    PreLogin {
        version: PROGRAM_VERSION,
        encryption,
        ..PreLogin::default()
    }
    .encode()
}

/// Write one column value with the framing its type requires.
fn encode_value(column: &MockColumn, value: &ScalarValue, dst: &mut BytesMut) {
    let unicode = column.type_id.is_unicode() || column.type_id == TypeId::Xml;
    let data = value.wire_bytes(unicode);

    if column.is_plp() {
        match data {
            None => dst.put_u64_le(u64::MAX),
            Some(data) => {
                dst.put_u64_le(data.len() as u64);
                if !data.is_empty() {
                    dst.put_u32_le(data.len() as u32);
                    dst.put_slice(&data);
                }
                dst.put_u32_le(0);
            }
        }
        return;
    }

    match column.type_id.length_class() {
        LengthClass::Fixed(size) => match data {
            Some(data) => dst.put_slice(&data),
            // Fixed-length columns have no NULL marker
            None => dst.put_bytes(0, size),
        },
        LengthClass::Byte => match data {
            Some(data) => {
                dst.put_u8(data.len() as u8);
                dst.put_slice(&data);
            }
            None => dst.put_u8(0),
        },
        LengthClass::UShort => match data {
            Some(data) => {
                dst.put_u16_le(data.len() as u16);
                dst.put_slice(&data);
            }
            None => dst.put_u16_le(u16::MAX),
        },
        LengthClass::TextPtr => match data {
            Some(data) => {
                dst.put_u8(16);
                dst.put_bytes(0xAB, 16); // text pointer
                dst.put_bytes(0, 8); // timestamp
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(&data);
            }
            None => dst.put_u8(0),
        },
        LengthClass::Long => match data {
            Some(data) => {
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(&data);
            }
            None => dst.put_u32_le(0),
        },
        LengthClass::Plp | LengthClass::Unsupported => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::{Token, TokenParser};

    #[test]
    fn test_written_stream_parses() {
        let columns = vec![MockColumn::int("id"), MockColumn::nvarchar("name", 20)];
        let payload = TokenWriter::new()
            .col_metadata(&columns)
            .row(&columns, &[ScalarValue::Int(7), ScalarValue::from("seven")])
            .done(DoneStatus::COUNT, 1)
            .finish();

        let mut parser = TokenParser::new(payload);
        let Some(Token::ColMetaData(meta)) = parser.next_token(None).unwrap() else {
            panic!("expected metadata");
        };
        assert_eq!(meta.columns.len(), 2);
        assert_eq!(meta.columns[1].name, "name");

        let Some(Token::Row(row)) = parser.next_token(Some(&meta)).unwrap() else {
            panic!("expected row");
        };
        assert_eq!(row.values[0].as_deref(), Some(&7i32.to_le_bytes()[..]));

        let Some(Token::Done(done)) = parser.next_token(Some(&meta)).unwrap() else {
            panic!("expected done");
        };
        assert_eq!(done.row_count, 1);
        assert!(!parser.has_remaining());
    }

    #[test]
    fn test_null_and_plp_values() {
        let columns = vec![
            MockColumn::int("a"),
            MockColumn::nvarchar_max("b"),
            MockColumn::nvarchar_max("c"),
        ];
        let payload = TokenWriter::new()
            .col_metadata(&columns)
            .row(&columns, &[ScalarValue::Null, ScalarValue::Null, ScalarValue::from("")])
            .finish();

        let mut parser = TokenParser::new(payload);
        let Some(Token::ColMetaData(meta)) = parser.next_token(None).unwrap() else {
            panic!("expected metadata");
        };
        let Some(Token::Row(row)) = parser.next_token(Some(&meta)).unwrap() else {
            panic!("expected row");
        };
        assert_eq!(row.values[0], None);
        assert_eq!(row.values[1], None);
        assert_eq!(row.values[2].as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_messages_and_env_changes() {
        let payload = TokenWriter::new()
            .env_change(EnvChangeType::Database, "sales", "master")
            .error(208, 16, "Invalid object name 'nope'.")
            .finish();

        let mut parser = TokenParser::new(payload);
        let Some(Token::EnvChange(env)) = parser.next_token(None).unwrap() else {
            panic!("expected envchange");
        };
        assert_eq!(env.new_database(), Some("sales"));
        let Some(Token::Error(msg)) = parser.next_token(None).unwrap() else {
            panic!("expected error");
        };
        assert_eq!(msg.number, 208);
        assert_eq!(msg.class, 16);
        assert_eq!(msg.server, SERVER_NAME);
    }

    #[test]
    fn test_legacy_layout() {
        let payload = TokenWriter::with_version(TdsVersion::V7_1)
            .done(DoneStatus::COUNT, 3)
            .finish();
        assert_eq!(payload.len(), 1 + 2 + 2 + 4);
    }

    #[test]
    fn test_prelogin_response_decodes() {
        let reply = PreLogin::decode(&prelogin_response(EncryptionLevel::NotSupported)).unwrap();
        assert_eq!(reply.encryption, EncryptionLevel::NotSupported);
        assert_eq!(reply.version_string(), "16.0.1000");
    }
}
