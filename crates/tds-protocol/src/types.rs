//! TDS data type definitions.
//!
//! Each column in a COLMETADATA token carries a one-byte type id. The type id
//! decides both how much type-specific metadata follows and how every value
//! of that column is framed inside ROW tokens.

use bitflags::bitflags;

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    // Fixed-length types
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer (TINYINT).
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,
    /// 32-bit floating point.
    Float4 = 0x3B,
    /// 8-byte money.
    Money = 0x3C,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 64-bit floating point.
    Float8 = 0x3E,
    /// 4-byte money.
    Money4 = 0x7A,

    // Byte-length types
    /// Unique identifier.
    Guid = 0x24,
    /// Nullable integer (1, 2, 4 or 8 bytes).
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float (4 or 8 bytes).
    FloatN = 0x6D,
    /// Nullable money (4 or 8 bytes).
    MoneyN = 0x6E,
    /// Nullable datetime (4 or 8 bytes).
    DateTimeN = 0x6F,
    /// Date (3 bytes).
    Date = 0x28,
    /// Time with scale.
    Time = 0x29,
    /// DateTime2 with scale.
    DateTime2 = 0x2A,
    /// DateTimeOffset with scale.
    DateTimeOffset = 0x2B,
    /// Legacy fixed-length character.
    Char = 0x2F,
    /// Legacy variable-length character.
    VarChar = 0x27,
    /// Legacy fixed-length binary.
    Binary = 0x2D,
    /// Legacy variable-length binary.
    VarBinary = 0x25,

    // Ushort-length types
    /// Variable-length character.
    BigVarChar = 0xA7,
    /// Variable-length binary.
    BigVarBinary = 0xA5,
    /// Fixed-length character.
    BigChar = 0xAF,
    /// Fixed-length binary.
    BigBinary = 0xAD,
    /// Fixed-length Unicode character.
    NChar = 0xEF,
    /// Variable-length Unicode character.
    NVarChar = 0xE7,

    // Long types (text pointer framing)
    /// Text.
    Text = 0x23,
    /// Image.
    Image = 0x22,
    /// Unicode text.
    NText = 0x63,

    // Types this decoder recognizes but cannot frame
    /// SQL variant.
    Variant = 0x62,
    /// User-defined CLR type.
    Udt = 0xF0,
    /// XML.
    Xml = 0xF1,
    /// Table-valued parameter.
    Tvp = 0xF3,
}

/// How values of a type are framed inside a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthClass {
    /// Always exactly this many bytes, never NULL.
    Fixed(usize),
    /// One-byte length prefix; zero means NULL.
    Byte,
    /// Two-byte length prefix; 0xFFFF means NULL.
    UShort,
    /// Text pointer followed by a timestamp and a four-byte length.
    TextPtr,
    /// Always PLP framed, whatever the declared length.
    Plp,
    /// Four-byte length prefix; zero means NULL.
    Long,
    /// Not supported by this decoder.
    Unsupported,
}

impl TypeId {
    /// Create a type id from a raw byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        let id = match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3A => Self::DateTime4,
            0x3B => Self::Float4,
            0x3C => Self::Money,
            0x3D => Self::DateTime,
            0x3E => Self::Float8,
            0x7A => Self::Money4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            0xF1 => Self::Xml,
            0xF3 => Self::Tvp,
            _ => return None,
        };
        Some(id)
    }

    /// How values of this type are framed inside a row.
    ///
    /// Ushort-length types declared with a maximum length of 0xFFFF
    /// (the `MAX` variants) switch to PLP framing; that decision needs the
    /// column metadata and is made by the row decoder.
    #[must_use]
    pub const fn length_class(self) -> LengthClass {
        match self {
            Self::Null => LengthClass::Fixed(0),
            Self::Int1 | Self::Bit => LengthClass::Fixed(1),
            Self::Int2 => LengthClass::Fixed(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => LengthClass::Fixed(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => LengthClass::Fixed(8),
            Self::Guid
            | Self::IntN
            | Self::Decimal
            | Self::Numeric
            | Self::BitN
            | Self::DecimalN
            | Self::NumericN
            | Self::FloatN
            | Self::MoneyN
            | Self::DateTimeN
            | Self::Date
            | Self::Time
            | Self::DateTime2
            | Self::DateTimeOffset
            | Self::Char
            | Self::VarChar
            | Self::Binary
            | Self::VarBinary => LengthClass::Byte,
            Self::BigVarChar
            | Self::BigVarBinary
            | Self::BigChar
            | Self::BigBinary
            | Self::NChar
            | Self::NVarChar => LengthClass::UShort,
            Self::Text | Self::Image | Self::NText => LengthClass::TextPtr,
            Self::Xml | Self::Udt => LengthClass::Plp,
            Self::Variant => LengthClass::Long,
            Self::Tvp => LengthClass::Unsupported,
        }
    }

    /// Check if this is a fixed-length type.
    #[must_use]
    pub const fn is_fixed_length(self) -> bool {
        matches!(self.length_class(), LengthClass::Fixed(_))
    }

    /// Check if this type may switch to PLP framing when declared `MAX`.
    #[must_use]
    pub const fn is_plp_capable(self) -> bool {
        matches!(self, Self::BigVarChar | Self::BigVarBinary | Self::NVarChar)
    }

    /// Check if this is a Unicode character type.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Check if this is a single-byte character type.
    #[must_use]
    pub const fn is_character(self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::BigChar | Self::BigVarChar | Self::Text
        )
    }

    /// Check if this is a binary type.
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(
            self,
            Self::Binary | Self::VarBinary | Self::BigBinary | Self::BigVarBinary | Self::Image
        )
    }

    /// Check whether COLMETADATA carries a collation for this type.
    #[must_use]
    pub const fn has_collation(self) -> bool {
        matches!(
            self,
            Self::BigChar | Self::BigVarChar | Self::NChar | Self::NVarChar | Self::Text | Self::NText
        )
    }

    /// Check if this is a date/time type.
    #[must_use]
    pub const fn is_datetime(self) -> bool {
        matches!(
            self,
            Self::DateTime
                | Self::DateTime4
                | Self::DateTimeN
                | Self::Date
                | Self::Time
                | Self::DateTime2
                | Self::DateTimeOffset
        )
    }
}

bitflags! {
    /// Column flags from COLMETADATA.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        /// Column accepts NULL.
        const NULLABLE = 0x0001;
        /// Comparisons are case sensitive.
        const CASE_SENSITIVE = 0x0002;
        /// Column is read-write.
        const UPDATEABLE = 0x0004;
        /// Updateability is unknown.
        const UPDATEABLE_UNKNOWN = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR_TYPE = 0x0100;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 0x0200;
        /// Encrypted column.
        const ENCRYPTED = 0x0400;
        /// Hidden column.
        const HIDDEN = 0x2000;
        /// Key column.
        const KEY = 0x4000;
        /// Nullability unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}
