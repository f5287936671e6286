//! Blocking packet stream over a [`Transport`].
//!
//! [`MessageStream`] owns the transport, a read buffer and the packet codec.
//! Outgoing messages are split and sent in one write; incoming data is read
//! packet by packet so callers can start decoding before a large response
//! has fully arrived.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{DEFAULT_PACKET_SIZE, PacketType};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::message::{Message, MessageAssembler, split_message};
use crate::packet_codec::{Packet, TdsCodec};
use crate::transport::Transport;

/// Packet-level reader/writer over a transport.
pub struct MessageStream<T: Transport> {
    transport: T,
    read_codec: TdsCodec,
    write_codec: TdsCodec,
    read_buf: BytesMut,
    packet_size: usize,
}

impl<T: Transport> MessageStream<T> {
    /// Wrap a connected transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            read_codec: TdsCodec::new(),
            write_codec: TdsCodec::new(),
            read_buf: BytesMut::with_capacity(DEFAULT_PACKET_SIZE),
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }

    /// Packet size used when splitting outgoing messages.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Change the outgoing packet size (after an ENVCHANGE).
    pub fn set_packet_size(&mut self, packet_size: usize) {
        self.packet_size = packet_size;
        self.write_codec = TdsCodec::new().with_max_packet_size(packet_size);
        tracing::debug!(packet_size, "packet size changed");
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Unwrap the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a complete message, split to the current packet size.
    pub fn send_message(&mut self, packet_type: PacketType, payload: Bytes) -> Result<(), CodecError> {
        self.write_codec.reset_packet_id();
        let packets = split_message(packet_type, &payload, self.packet_size);
        let count = packets.len();

        let mut out = BytesMut::with_capacity(payload.len() + count * 8);
        for packet in packets {
            self.write_codec.encode(packet, &mut out)?;
        }

        tracing::trace!(
            packet_type = ?packet_type,
            payload_len = payload.len(),
            packets = count,
            "sending message"
        );
        self.transport.send(&out)
    }

    /// Send an ATTENTION signal (header-only packet).
    pub fn send_attention(&mut self) -> Result<(), CodecError> {
        tracing::debug!("sending attention");
        self.send_message(PacketType::Attention, Bytes::new())
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` if the peer closed the connection on a packet
    /// boundary, [`CodecError::UnexpectedEof`] if it closed mid-packet.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        loop {
            if let Some(packet) = self.read_codec.decode(&mut self.read_buf)? {
                return Ok(Some(packet));
            }

            match self.transport.receive()? {
                Some(chunk) => self.read_buf.extend_from_slice(&chunk),
                None if self.read_buf.is_empty() => return Ok(None),
                None => {
                    return Err(CodecError::UnexpectedEof {
                        buffered: self.read_buf.len(),
                    });
                }
            }
        }
    }

    /// Read the next packet, requiring a given type.
    pub fn read_packet_of(&mut self, expected: PacketType) -> Result<Option<Packet>, CodecError> {
        match self.read_packet()? {
            Some(packet) if packet.header.packet_type != expected => {
                Err(CodecError::UnexpectedPacketType {
                    expected,
                    actual: packet.header.packet_type,
                })
            }
            other => Ok(other),
        }
    }

    /// Read a complete message.
    ///
    /// Returns `Ok(None)` if the connection closed before any packet of a
    /// new message arrived.
    pub fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        let mut assembler = MessageAssembler::new();
        loop {
            match self.read_packet()? {
                Some(packet) => {
                    if let Some(message) = assembler.push(packet) {
                        return Ok(Some(message));
                    }
                }
                None if assembler.has_partial() => return Err(CodecError::ConnectionClosed),
                None => return Ok(None),
            }
        }
    }

    /// Drop any buffered input.
    pub fn discard_input(&mut self) {
        self.read_buf.clear();
    }

    /// Close the transport.
    pub fn close(&mut self) -> Result<(), CodecError> {
        self.read_buf.clear();
        self.transport.close()
    }
}

impl<T: Transport> std::fmt::Debug for MessageStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("packet_size", &self.packet_size)
            .field("buffered", &self.read_buf.len())
            .field("closed", &self.transport.is_closed())
            .finish_non_exhaustive()
    }
}
