//! TDS pre-login record.
//!
//! PRELOGIN is the first message on a new connection. Client and server
//! exchange option lists describing their versions and encryption
//! capabilities. This client never negotiates TLS: it always offers
//! [`EncryptionLevel::NotSupported`] and the session layer refuses servers
//! that insist on encryption.
//!
//! ```text
//! option list:  [type u8][offset u16 BE][length u16 BE] ... 0xFF
//! option data:  addressed by the offsets above
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::WireReader;
use crate::error::ProtocolError;

/// Pre-login option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name.
    Instance = 0x02,
    /// Client thread id.
    ThreadId = 0x03,
    /// MARS support.
    Mars = 0x04,
    /// Trace id.
    TraceId = 0x05,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Nonce.
    Nonce = 0x07,
    /// End of the option list.
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0x06 => Ok(Self::FedAuthRequired),
            0x07 => Ok(Self::Nonce),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login only.
    Off = 0x00,
    /// Encrypt everything.
    On = 0x01,
    /// No encryption available.
    #[default]
    NotSupported = 0x02,
    /// Encryption mandatory.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value. Unknown values are treated as `Required`.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Off,
            0x01 => Self::On,
            0x02 => Self::NotSupported,
            _ => Self::Required,
        }
    }

    /// Check whether a client without TLS can continue.
    ///
    /// `Off` still asks for an encrypted login, so only `NotSupported` is
    /// acceptable to a client that offered no encryption.
    #[must_use]
    pub const fn allows_plaintext(&self) -> bool {
        matches!(self, Self::NotSupported)
    }
}

/// Pre-login message.
///
/// The VERSION option means different things per direction: the client sends
/// its own library version, the server its product version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLogin {
    /// Raw UL_VERSION (major, minor, build high, build low).
    pub version: u32,
    /// US_SUBBUILD.
    pub sub_build: u16,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name; empty for the default instance.
    pub instance: String,
    /// Client thread id.
    pub thread_id: Option<u32>,
    /// MARS requested or enabled.
    pub mars: bool,
}

impl PreLogin {
    /// Create the client request.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: client_version(),
            thread_id: Some(std::process::id()),
            ..Self::default()
        }
    }

    /// Set the encryption level.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Product version as `major.minor.build`.
    #[must_use]
    pub fn version_string(&self) -> String {
        let [major, minor, build_hi, build_lo] = self.version.to_be_bytes();
        format!("{major}.{minor}.{}", u16::from_be_bytes([build_hi, build_lo]))
    }

    /// Encode the message.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, Vec<u8>)> = Vec::with_capacity(5);

        let mut version = self.version.to_be_bytes().to_vec();
        version.extend_from_slice(&self.sub_build.to_le_bytes());
        options.push((PreLoginOption::Version, version));
        options.push((PreLoginOption::Encryption, vec![self.encryption as u8]));

        let mut instance = self.instance.as_bytes().to_vec();
        instance.push(0);
        options.push((PreLoginOption::Instance, instance));

        if let Some(thread_id) = self.thread_id {
            options.push((PreLoginOption::ThreadId, thread_id.to_be_bytes().to_vec()));
        }
        options.push((PreLoginOption::Mars, vec![u8::from(self.mars)]));

        let header_size = options.len() * 5 + 1;
        let data_size: usize = options.iter().map(|(_, data)| data.len()).sum();
        let mut buf = BytesMut::with_capacity(header_size + data_size);

        let mut offset = header_size;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in &options {
            buf.put_slice(data);
        }

        buf.freeze()
    }

    /// Decode a pre-login message.
    ///
    /// Option offsets are relative to the start of the message. Options
    /// pointing outside the message are reported as truncation.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = WireReader::new(data);
        let mut entries = Vec::new();
        loop {
            let option = PreLoginOption::from_u8(src.read_u8()?)?;
            if option == PreLoginOption::Terminator {
                break;
            }
            let offset = src.read_u16_be()? as usize;
            let length = src.read_u16_be()? as usize;
            entries.push((option, offset, length));
        }

        let mut prelogin = Self::default();
        for (option, offset, length) in entries {
            let mut field = WireReader::with_base_offset(
                data.get(offset..).unwrap_or_default(),
                offset,
            );
            let value = field.read_bytes(length)?;
            let mut value_reader = WireReader::with_base_offset(value, offset);

            match option {
                PreLoginOption::Version if length >= 4 => {
                    prelogin.version = value_reader.read_u32_be()?;
                    if length >= 6 {
                        prelogin.sub_build = value_reader.read_u16_le()?;
                    }
                }
                PreLoginOption::Encryption if length >= 1 => {
                    prelogin.encryption = EncryptionLevel::from_u8(value[0]);
                }
                PreLoginOption::Instance => {
                    let name = value.split(|&b| b == 0).next().unwrap_or_default();
                    prelogin.instance = String::from_utf8_lossy(name).into_owned();
                }
                PreLoginOption::ThreadId if length >= 4 => {
                    prelogin.thread_id = Some(value_reader.read_u32_be()?);
                }
                PreLoginOption::Mars if length >= 1 => {
                    prelogin.mars = value[0] != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

/// Library version in UL_VERSION layout.
fn client_version() -> u32 {
    let major: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    let patch: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
    ((major & 0xFF) << 24) | ((minor & 0xFF) << 16) | (patch & 0xFFFF)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_offers_no_encryption() {
        let encoded = PreLogin::new().encode();
        assert_eq!(encoded[0], PreLoginOption::Version as u8);

        let decoded = PreLogin::decode(&encoded).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::NotSupported);
        assert_eq!(decoded.thread_id, Some(std::process::id()));
        assert!(!decoded.mars);
        assert_eq!(decoded.instance, "");
    }

    #[test]
    fn test_allows_plaintext() {
        assert!(EncryptionLevel::NotSupported.allows_plaintext());
        assert!(!EncryptionLevel::Off.allows_plaintext());
        assert!(!EncryptionLevel::On.allows_plaintext());
        assert!(!EncryptionLevel::Required.allows_plaintext());
    }

    #[test]
    fn test_decode_options_out_of_order() {
        let mut buf = BytesMut::new();
        let header_size: u16 = 11;

        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(header_size);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(header_size + 1);
        buf.put_u16(6);
        buf.put_u8(PreLoginOption::Terminator as u8);

        buf.put_u8(0x02);
        buf.put_slice(&[0x10, 0x00, 0x11, 0x94]); // 16.0.4500
        buf.put_u16_le(7);

        let decoded = PreLogin::decode(&buf).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::NotSupported);
        assert_eq!(decoded.version_string(), "16.0.4500");
        assert_eq!(decoded.sub_build, 7);
    }

    #[test]
    fn test_decode_option_outside_message() {
        let data = [0x01u8, 0x00, 0x40, 0x00, 0x01, 0xFF];
        assert_eq!(
            PreLogin::decode(&data),
            Err(ProtocolError::Truncated {
                offset: 0x40,
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_unknown_option() {
        let data = [0x42u8, 0x00, 0x06, 0x00, 0x00, 0xFF];
        assert_eq!(
            PreLogin::decode(&data),
            Err(ProtocolError::InvalidPreloginOption(0x42))
        );
    }
}
