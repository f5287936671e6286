//! TDS message reassembly and splitting.
//!
//! A message is cut into packets of at most the negotiated packet size; the
//! last one carries `END_OF_MESSAGE`. [`MessageAssembler`] glues incoming
//! packets back together, [`split_message`] cuts outgoing payloads.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::packet_codec::Packet;

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The packet type of this message.
    pub packet_type: PacketType,
    /// The complete message payload (all packets combined).
    pub payload: Bytes,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            packet_type,
            payload,
        }
    }

    /// Get the message payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reassembles packets into complete messages.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create a new message assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet into the assembler.
    ///
    /// Returns `Some(Message)` if this packet completes a message.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);
        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_type = ?packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.is_end_of_message(),
            "assembling message"
        );

        if !packet.is_end_of_message() {
            return None;
        }

        self.packet_type = None;
        self.packet_count = 0;
        Some(Message::new(packet_type, self.buffer.split().freeze()))
    }

    /// Check if the assembler has partial data buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Get the number of packets accumulated so far.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Get the current buffer length.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear any partial message data.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}

/// Cut a payload into packets no larger than `packet_size`.
///
/// An empty payload still yields one (empty) packet. Lengths and packet ids
/// are filled in by the encoder.
#[must_use]
pub fn split_message(packet_type: PacketType, payload: &Bytes, packet_size: usize) -> Vec<Packet> {
    let max_payload = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
    if payload.is_empty() {
        let header = PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, 0);
        return vec![Packet::new(header, Bytes::new())];
    }

    let count = payload.len().div_ceil(max_payload);
    (0..count)
        .map(|i| {
            let start = i * max_payload;
            let end = (start + max_payload).min(payload.len());
            let status = if i + 1 == count {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            Packet::new(
                PacketHeader::new(packet_type, status, 0),
                payload.slice(start..end),
            )
        })
        .collect()
}
