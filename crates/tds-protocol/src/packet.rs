//! TDS packet header definitions.
//!
//! Every message exchanged with the server is cut into packets. Each packet
//! starts with an 8-byte header; multi-byte header fields are big-endian,
//! unlike almost everything else in the protocol.
//!
//! ```text
//! +------+--------+-----------+-----------+-----------+--------+
//! | type | status | length BE | spid BE   | packet_id | window |
//! | u8   | u8     | u16       | u16       | u8        | u8     |
//! +------+--------+-----------+-----------+-----------+--------+
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest packet size the protocol can describe.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Smallest packet size a server will negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Packet size requested at login unless configured otherwise.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Tabular response from the server.
    TabularResult = 0x04,
    /// Attention (cancel) signal.
    Attention = 0x06,
    /// TDS 7 login record.
    Tds7Login = 0x10,
    /// Pre-login negotiation.
    PreLogin = 0x12,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x10 => Ok(Self::Tds7Login),
            0x12 => Ok(Self::PreLogin),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// Normal packet, more packets to follow.
        const NORMAL = 0x00;
        /// Last packet of the message.
        const END_OF_MESSAGE = 0x01;
        /// Ignore this message (sent with attention acknowledgements).
        const IGNORE_EVENT = 0x02;
        /// Reset the session before processing the request.
        const RESET_CONNECTION = 0x08;
        /// Reset the session but keep the transaction state.
        const RESET_CONNECTION_KEEP_TRANSACTION = 0x10;
    }
}

/// TDS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Server process id; zero on client packets.
    pub spid: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_id: u8,
    /// Window, always zero.
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Read the total packet length out of a buffer that starts with a header.
    ///
    /// Returns `None` until the length field itself is available.
    #[must_use]
    pub fn peek_length(src: &[u8]) -> Option<usize> {
        if src.len() < 4 {
            return None;
        }
        Some(u16::from_be_bytes([src[2], src[3]]) as usize)
    }

    /// Parse a packet header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                offset: 0,
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status_byte = src.get_u8();
        let status = PacketStatus::from_bits(status_byte)
            .ok_or(ProtocolError::InvalidPacketStatus(status_byte))?;
        let length = src.get_u16();
        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength(length as usize));
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid: src.get_u16(),
            packet_id: src.get_u8(),
            window: src.get_u8(),
        })
    }

    /// Encode the packet header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Encode the packet header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the packet id (sequence number).
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }

    /// Set the SPID.
    #[must_use]
    pub const fn with_spid(mut self, spid: u16) -> Self {
        self.spid = spid;
        self
    }
}
