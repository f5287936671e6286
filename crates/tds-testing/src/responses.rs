//! Canned replies for SQL batches.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tds_protocol::{DoneStatus, LengthClass, TypeId};

use crate::tokens::TokenWriter;

/// Reply to one SQL batch.
#[derive(Clone)]
pub enum MockResponse {
    /// One unnamed column, one row.
    Scalar(ScalarValue),

    /// A result set.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data.
        rows: Vec<Vec<ScalarValue>>,
    },

    /// The batch fails with a server error.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// An informational message (a `PRINT`).
    Info {
        /// Message number.
        number: i32,
        /// Message text.
        message: String,
    },

    /// Affected-row count of a DML statement.
    RowsAffected(u64),

    /// One statement per entry, answered in order.
    Sequence(Vec<MockResponse>),

    /// Pre-encoded token stream sent as the whole reply.
    Raw(Bytes),

    /// Wait before answering.
    Delayed(Duration, Box<MockResponse>),

    /// Send only the first `keep` bytes of the encoded reply, then hang up.
    Hangup {
        /// Reply to cut short.
        response: Box<MockResponse>,
        /// Bytes of the packetized reply to send.
        keep: usize,
    },

    /// Build the reply from the SQL text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::Error {
                number,
                message,
                severity,
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .field("severity", severity)
                .finish(),
            Self::Info { number, message } => f
                .debug_struct("Info")
                .field("number", number)
                .field("message", message)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Sequence(parts) => f.debug_tuple("Sequence").field(parts).finish(),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Delayed(delay, inner) => {
                f.debug_tuple("Delayed").field(delay).field(inner).finish()
            }
            Self::Hangup { response, keep } => f
                .debug_struct("Hangup")
                .field("response", response)
                .field("keep", keep)
                .finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Single integer.
    #[must_use]
    pub fn scalar_int(value: i32) -> Self {
        Self::Scalar(ScalarValue::Int(value))
    }

    /// Single string.
    #[must_use]
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::Scalar(ScalarValue::String(value.into()))
    }

    /// Bare completion.
    #[must_use]
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Affected-row count.
    #[must_use]
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Severity 16 error.
    #[must_use]
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// Informational message.
    #[must_use]
    pub fn info(number: i32, message: impl Into<String>) -> Self {
        Self::Info {
            number,
            message: message.into(),
        }
    }

    /// Result set.
    #[must_use]
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<ScalarValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Several statements in one batch.
    #[must_use]
    pub fn sequence(parts: impl IntoIterator<Item = MockResponse>) -> Self {
        Self::Sequence(parts.into_iter().collect())
    }

    /// Answer after `delay`.
    #[must_use]
    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    /// Cut the reply after `keep` bytes and drop the connection.
    #[must_use]
    pub fn hangup_after(self, keep: usize) -> Self {
        Self::Hangup {
            response: Box::new(self),
            keep,
        }
    }

    /// Reply computed from the SQL text.
    #[must_use]
    pub fn custom(f: impl Fn(&str) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Append the token stream of this reply.
    ///
    /// `more` marks the final DONE as not final. `Delayed` and `Hangup`
    /// contribute their inner tokens; the caller applies the effect.
    pub(crate) fn write_tokens(&self, sql: &str, out: &mut TokenWriter, more: bool) {
        let base = if more {
            DoneStatus::MORE
        } else {
            DoneStatus::empty()
        };

        match self {
            Self::Scalar(value) => {
                let columns = [MockColumn::new("", value.type_id())];
                out.col_metadata(&columns)
                    .row(&columns, std::slice::from_ref(value))
                    .done(base | DoneStatus::COUNT, 1);
            }
            Self::Rows { columns, rows } => {
                out.col_metadata(columns);
                for row in rows {
                    out.row(columns, row);
                }
                out.done(base | DoneStatus::COUNT, rows.len() as u64);
            }
            Self::Error {
                number,
                message,
                severity,
            } => {
                out.error(*number, *severity, message)
                    .done(base | DoneStatus::ERROR, 0);
            }
            Self::Info { number, message } => {
                out.info(*number, message).done(base, 0);
            }
            Self::RowsAffected(count) => {
                out.done(base | DoneStatus::COUNT, *count);
            }
            Self::Sequence(parts) => {
                let last = parts.len().saturating_sub(1);
                for (i, part) in parts.iter().enumerate() {
                    part.write_tokens(sql, out, more || i < last);
                }
                if parts.is_empty() {
                    out.done(base, 0);
                }
            }
            Self::Raw(data) => {
                out.raw(data);
            }
            Self::Delayed(_, inner) => inner.write_tokens(sql, out, more),
            Self::Hangup { response, .. } => response.write_tokens(sql, out, more),
            Self::Custom(f) => f(sql).write_tokens(sql, out, more),
        }
    }
}

/// A value in a mock row.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// NULL.
    Null,
    /// Bit.
    Bool(bool),
    /// 8-bit unsigned integer.
    TinyInt(u8),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Text, encoded to match the column (UTF-16 for N-types).
    String(String),
    /// Binary data, or the exact wire bytes of a type without its own
    /// variant (dates, decimals, GUIDs, money).
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// Column type used when the value stands alone.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        match self {
            Self::Null | Self::Int(_) | Self::TinyInt(_) | Self::SmallInt(_) | Self::BigInt(_) => {
                TypeId::IntN
            }
            Self::Bool(_) => TypeId::BitN,
            Self::Float(_) | Self::Double(_) => TypeId::FloatN,
            Self::String(_) => TypeId::NVarChar,
            Self::Binary(_) => TypeId::BigVarBinary,
        }
    }

    /// Value bytes without framing; `None` for NULL.
    pub(crate) fn wire_bytes(&self, unicode: bool) -> Option<Vec<u8>> {
        let bytes = match self {
            Self::Null => return None,
            Self::Bool(v) => vec![u8::from(*v)],
            Self::TinyInt(v) => vec![*v],
            Self::SmallInt(v) => v.to_le_bytes().to_vec(),
            Self::Int(v) => v.to_le_bytes().to_vec(),
            Self::BigInt(v) => v.to_le_bytes().to_vec(),
            Self::Float(v) => v.to_le_bytes().to_vec(),
            Self::Double(v) => v.to_le_bytes().to_vec(),
            Self::String(s) if unicode => s.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Binary(data) => data.clone(),
        };
        Some(bytes)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Column of a mock result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub type_id: TypeId,
    /// Declared maximum length in bytes; `0xFFFF` selects PLP framing for
    /// the MAX types.
    pub max_length: u32,
    /// Decimal precision.
    pub precision: u8,
    /// Decimal or fractional-second scale.
    pub scale: u8,
    /// Column accepts NULL.
    pub nullable: bool,
}

impl MockColumn {
    /// Column with the natural maximum length of `type_id`.
    #[must_use]
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        let max_length = match type_id {
            TypeId::IntN | TypeId::FloatN | TypeId::MoneyN | TypeId::DateTimeN => 8,
            TypeId::BitN => 1,
            TypeId::Guid => 16,
            TypeId::DecimalN | TypeId::NumericN | TypeId::Decimal | TypeId::Numeric => 17,
            TypeId::Text | TypeId::NText | TypeId::Image => i32::MAX as u32,
            TypeId::Xml | TypeId::Udt => u32::from(u16::MAX),
            TypeId::Variant => 8016,
            _ => 8000,
        };
        Self {
            name: name.into(),
            type_id,
            max_length,
            precision: 0,
            scale: 0,
            nullable: true,
        }
    }

    /// INT.
    #[must_use]
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(4)
    }

    /// BIGINT.
    #[must_use]
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(8)
    }

    /// SMALLINT.
    #[must_use]
    pub fn smallint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(2)
    }

    /// TINYINT.
    #[must_use]
    pub fn tinyint(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::IntN).with_max_length(1)
    }

    /// BIT.
    #[must_use]
    pub fn bit(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::BitN)
    }

    /// FLOAT.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::FloatN)
    }

    /// DATETIME; values are 8 raw bytes.
    #[must_use]
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::DateTimeN)
    }

    /// UNIQUEIDENTIFIER; values are 16 raw bytes.
    #[must_use]
    pub fn guid(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::Guid)
    }

    /// DECIMAL(p, s); values are the sign byte plus magnitude.
    #[must_use]
    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        let mut column = Self::new(name, TypeId::DecimalN);
        column.precision = precision;
        column.scale = scale;
        column
    }

    /// NVARCHAR(n).
    #[must_use]
    pub fn nvarchar(name: impl Into<String>, max_chars: u32) -> Self {
        Self::new(name, TypeId::NVarChar).with_max_length(max_chars * 2)
    }

    /// NVARCHAR(MAX).
    #[must_use]
    pub fn nvarchar_max(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::NVarChar).with_max_length(u32::from(u16::MAX))
    }

    /// VARCHAR(n).
    #[must_use]
    pub fn varchar(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, TypeId::BigVarChar).with_max_length(max_len)
    }

    /// VARBINARY(n).
    #[must_use]
    pub fn varbinary(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, TypeId::BigVarBinary).with_max_length(max_len)
    }

    /// XML without a schema collection; string values are sent as UTF-16.
    #[must_use]
    pub fn xml(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::Xml)
    }

    /// CLR user-defined type; values are the serialized bytes.
    #[must_use]
    pub fn udt(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::Udt)
    }

    /// SQL_VARIANT; values are the base type, property bytes and data.
    #[must_use]
    pub fn variant(name: impl Into<String>) -> Self {
        Self::new(name, TypeId::Variant)
    }

    /// Override the declared maximum length.
    #[must_use]
    pub fn with_max_length(mut self, len: u32) -> Self {
        self.max_length = len;
        self
    }

    /// Set the scale of time-based types.
    #[must_use]
    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// Set whether the column accepts NULL.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub(crate) fn is_plp(&self) -> bool {
        self.type_id.length_class() == LengthClass::Plp
            || (self.type_id.is_plp_capable() && self.max_length == u32::from(u16::MAX))
    }
}
