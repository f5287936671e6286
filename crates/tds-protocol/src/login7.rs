//! TDS LOGIN7 record.
//!
//! The LOGIN7 record is sent once per connection, right after PRELOGIN, and
//! carries the client description and SQL credentials.
//!
//! ## Record Structure
//!
//! ```text
//! +----------------------------------+
//! | fixed header (94 bytes)          |  lengths, version, flags, locale
//! |   offset/length pairs            |  one per variable field
//! +----------------------------------+
//! | variable data (UTF-16LE)         |  host, user, password, app, ...
//! +----------------------------------+
//! ```
//!
//! Every text field is cut to [`MAX_FIELD_CHARS`] UTF-16 code units before
//! encoding; a surrogate pair crossing the limit is dropped whole.
//!
//! ## Security Note
//!
//! The password is obfuscated (not encrypted) with a nibble swap and XOR.
//! Anyone observing the connection can recover it.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{WireReader, decode_utf16_le, put_utf16_units, truncate_utf16};
use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed LOGIN7 header.
pub const LOGIN7_HEADER_SIZE: usize = 94;

/// Longest text field, in UTF-16 code units.
pub const MAX_FIELD_CHARS: usize = 128;

bitflags! {
    /// LOGIN7 OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load disabled.
        const DUMP_LOAD_OFF = 0x10;
        /// Warn on database change.
        const USE_DB_NOTIFY = 0x20;
        /// Failure to set the initial database fails the login.
        const DATABASE_FATAL = 0x40;
        /// Warn on language change.
        const SET_LANG_WARN = 0x80;
    }
}

bitflags! {
    /// LOGIN7 OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags2: u8 {
        /// Failure to set the initial language fails the login.
        const LANGUAGE_FATAL = 0x01;
        /// Client is an ODBC driver.
        const ODBC = 0x02;
        /// Integrated (SSPI) security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// LOGIN7 TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// T-SQL dialect.
        const SQL_TSQL = 0x01;
        /// OLE DB client.
        const OLEDB = 0x10;
        /// Read-only application intent.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// LOGIN7 OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags3: u8 {
        /// Password change request.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Accept unknown collations.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
    }
}

/// LOGIN7 record builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process id.
    pub client_pid: u32,
    /// Connection id.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3.
    pub option_flags3: OptionFlags3,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client id (usually a MAC address, zeros here).
    pub client_id: [u8; 6],
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB_NOTIFY | OptionFlags1::DATABASE_FATAL,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::from("tds-client"),
            server_name: String::new(),
            library_name: String::from("tds-client"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
        }
    }
}

impl Login7 {
    /// Create a new LOGIN7 builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TDS version.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set SQL authentication credentials.
    #[must_use]
    pub fn with_sql_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.option_flags2.remove(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Encode the record.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        // Field order is fixed by the header layout.
        let fields: [(&str, bool); 9] = [
            (&self.hostname, false),
            (&self.username, false),
            (&self.password, true),
            (&self.app_name, false),
            (&self.server_name, false),
            ("", false), // unused / extension
            (&self.library_name, false),
            (&self.language, false),
            (&self.database, false),
        ];

        let mut pairs = Vec::with_capacity(fields.len() + 3);
        let mut var_data = BytesMut::new();
        let mut offset = LOGIN7_HEADER_SIZE;

        for (value, obfuscate) in fields {
            let units = truncate_utf16(value, MAX_FIELD_CHARS);
            pairs.push((offset as u16, units.len() as u16));
            if obfuscate {
                write_obfuscated(&mut var_data, &units);
            } else {
                put_utf16_units(&mut var_data, &units);
            }
            offset += units.len() * 2;
        }

        // SSPI, attach-db file and new password are always empty.
        let trailing = [(offset as u16, 0u16); 3];
        let total_length = LOGIN7_HEADER_SIZE + var_data.len();

        let mut buf = BytesMut::with_capacity(total_length);
        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);
        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());
        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        for (field_offset, len) in &pairs {
            buf.put_u16_le(*field_offset);
            buf.put_u16_le(*len);
        }
        buf.put_slice(&self.client_id);
        for (field_offset, len) in trailing {
            buf.put_u16_le(field_offset);
            buf.put_u16_le(len);
        }
        buf.put_u32_le(0); // SSPI long length

        buf.put_slice(&var_data);
        buf.freeze()
    }

    /// Decode a record, reversing the password obfuscation.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = WireReader::new(data);
        let length = src.read_u32_le()? as usize;
        if length > data.len() {
            return Err(ProtocolError::Truncated {
                offset: 0,
                expected: length,
                actual: data.len(),
            });
        }
        let data = &data[..length];

        let tds_version = TdsVersion::new(src.read_u32_le()?);
        let packet_size = src.read_u32_le()?;
        let client_prog_version = src.read_u32_le()?;
        let client_pid = src.read_u32_le()?;
        let connection_id = src.read_u32_le()?;
        let option_flags1 = OptionFlags1::from_bits_retain(src.read_u8()?);
        let option_flags2 = OptionFlags2::from_bits_retain(src.read_u8()?);
        let type_flags = TypeFlags::from_bits_retain(src.read_u8()?);
        let option_flags3 = OptionFlags3::from_bits_retain(src.read_u8()?);
        let client_timezone = src.read_i32_le()?;
        let client_lcid = src.read_u32_le()?;

        let mut texts: Vec<String> = Vec::with_capacity(9);
        for index in 0..9 {
            let field_offset = src.read_u16_le()? as usize;
            let len = src.read_u16_le()? as usize;
            let end = field_offset + len * 2;
            let raw = data
                .get(field_offset..end)
                .ok_or(ProtocolError::InvalidLogin("field outside record"))?;

            let text = if index == 2 {
                let plain: Vec<u8> = raw.iter().map(|b| (b ^ 0xA5).rotate_left(4)).collect();
                decode_utf16_le(&plain)
            } else {
                decode_utf16_le(raw)
            };
            texts.push(text.ok_or(ProtocolError::StringEncoding {
                offset: field_offset,
            })?);
        }

        let mut client_id = [0u8; 6];
        client_id.copy_from_slice(src.read_bytes(6)?);

        let mut texts = texts.into_iter();
        let mut next = || texts.next().unwrap_or_default();
        let hostname = next();
        let username = next();
        let password = next();
        let app_name = next();
        let server_name = next();
        let _unused = next();
        let library_name = next();
        let language = next();
        let database = next();

        Ok(Self {
            tds_version,
            packet_size,
            client_prog_version,
            client_pid,
            connection_id,
            option_flags1,
            option_flags2,
            type_flags,
            option_flags3,
            client_timezone,
            client_lcid,
            hostname,
            username,
            password,
            app_name,
            server_name,
            library_name,
            language,
            database,
            client_id,
        })
    }
}

/// Swap nibbles of every byte, then XOR with 0xA5.
fn write_obfuscated(dst: &mut impl BufMut, units: &[u16]) {
    for unit in units {
        for byte in unit.to_le_bytes() {
            dst.put_u8(byte.rotate_right(4) ^ 0xA5);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_login7_default() {
        let login = Login7::new();
        assert_eq!(login.tds_version, TdsVersion::V7_4);
        assert_eq!(login.packet_size, 4096);
        assert!(login.option_flags2.contains(OptionFlags2::ODBC));
    }

    #[test]
    fn test_login7_header_layout() {
        let encoded = Login7::new()
            .with_hostname("HOST")
            .with_sql_auth("sa", "pw")
            .encode();

        let length = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(length as usize, encoded.len());

        let version = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(version, TdsVersion::V7_4.raw());

        // Hostname starts right after the fixed header
        assert_eq!(u16::from_le_bytes([encoded[36], encoded[37]]), 94);
        assert_eq!(u16::from_le_bytes([encoded[38], encoded[39]]), 4);
        assert_eq!(&encoded[94..96], &[b'H', 0]);
    }

    #[test]
    fn test_password_obfuscation() {
        let mut buf = BytesMut::new();
        write_obfuscated(&mut buf, &[u16::from(b'a')]);

        // 0x61 -> swap 0x16 -> xor 0xB3; 0x00 -> 0x00 -> 0xA5
        assert_eq!(&buf[..], &[0xB3, 0xA5]);
    }

    #[test]
    fn test_encode_decode_restores_fields() {
        let login = Login7::new()
            .with_hostname("client-01")
            .with_sql_auth("reporting", "s3cr3t!")
            .with_app_name("nightly")
            .with_server_name("db.internal")
            .with_database("sales")
            .with_packet_size(8192);

        let decoded = Login7::decode(&login.encode()).unwrap();
        assert_eq!(decoded, login);
    }

    #[test]
    fn test_long_fields_are_truncated() {
        let user = "u".repeat(300);
        let login = Login7::new().with_sql_auth(user, "p");
        let decoded = Login7::decode(&login.encode()).unwrap();
        assert_eq!(decoded.username.len(), MAX_FIELD_CHARS);
    }

    #[test]
    fn test_truncation_never_splits_surrogate_pairs() {
        // 127 ASCII units, then a character needing two units
        let name = format!("{}😀", "a".repeat(MAX_FIELD_CHARS - 1));
        let decoded = Login7::decode(&Login7::new().with_app_name(name).encode()).unwrap();
        assert_eq!(decoded.app_name, "a".repeat(MAX_FIELD_CHARS - 1));
    }

    #[test]
    fn test_decode_rejects_field_outside_record() {
        let mut encoded = BytesMut::from(&Login7::new().encode()[..]);
        // hostname length far beyond the record
        encoded[38] = 0xFF;
        assert_eq!(
            Login7::decode(&encoded),
            Err(ProtocolError::InvalidLogin("field outside record"))
        );
    }

    #[test]
    fn test_option_flag_bytes() {
        let login = Login7::new();
        let encoded = login.encode();
        assert_eq!(encoded[24], 0x60);
        assert_eq!(encoded[25], 0x03);
        assert_eq!(encoded[27], 0x08);
    }
}
