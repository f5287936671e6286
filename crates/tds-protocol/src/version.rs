//! TDS protocol version definitions.

use core::fmt;

/// TDS protocol version.
///
/// The raw value uses the layout of the LOGIN7 `TDSVersion` field: the high
/// byte carries major and minor nibbles (`0x74` for 7.4), the low byte a
/// revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.0 (SQL Server 7.0)
    pub const V7_0: Self = Self(0x7000_0000);

    /// TDS 7.1 (SQL Server 2000)
    pub const V7_1: Self = Self(0x7100_0000);

    /// TDS 7.1 revision 1 (SQL Server 2000 SP1)
    pub const V7_1_REV1: Self = Self(0x7100_0001);

    /// TDS 7.2 (SQL Server 2005)
    pub const V7_2: Self = Self(0x7209_0002);

    /// TDS 7.3A (SQL Server 2008)
    pub const V7_3A: Self = Self(0x730A_0003);

    /// TDS 7.3B (SQL Server 2008 R2)
    pub const V7_3B: Self = Self(0x730B_0003);

    /// TDS 7.4 (SQL Server 2012+)
    pub const V7_4: Self = Self(0x7400_0004);

    /// Create a version from its raw value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Major protocol number (7 for every TDS 7.x version).
    #[must_use]
    pub const fn major(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// Minor protocol number.
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }

    /// Check whether SQL batches must carry the ALL_HEADERS block.
    ///
    /// Required from TDS 7.2 onwards; earlier servers reject it.
    #[must_use]
    pub const fn requires_all_headers(self) -> bool {
        self.0 >= Self::V7_2.0
    }

    /// Check whether DATE, TIME, DATETIME2 and DATETIMEOFFSET may appear.
    #[must_use]
    pub const fn supports_date_time_types(self) -> bool {
        self.0 >= Self::V7_3A.0
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V7_3A => f.write_str("7.3A"),
            Self::V7_3B => f.write_str("7.3B"),
            Self::V7_1_REV1 => f.write_str("7.1 Rev 1"),
            _ => write!(f, "{}.{}", self.major(), self.minor()),
        }
    }
}
