//! Codec error types.

use std::io;

use tds_protocol::{PacketType, ProtocolError};
use thiserror::Error;

/// Errors raised while framing packets or talking to the transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport I/O failure.
    #[error("IO error: {0}")]
    Io(#[source] io::Error),

    /// A transport operation ran out of time.
    #[error("transport operation timed out")]
    Timeout,

    /// Malformed packet header.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Packet larger than the negotiated maximum.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Announced or requested size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The server sent a packet of an unexpected type.
    #[error("unexpected packet type {actual:?}, expected {expected:?}")]
    UnexpectedPacketType {
        /// Packet type the stream was waiting for.
        expected: PacketType,
        /// Packet type that arrived.
        actual: PacketType,
    },

    /// The peer closed the connection between packets.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer closed the connection in the middle of a packet.
    #[error("connection closed mid-packet ({buffered} bytes buffered)")]
    UnexpectedEof {
        /// Bytes of the incomplete packet that had arrived.
        buffered: usize,
    },

    /// Operation attempted on a transport that was already closed.
    #[error("transport is closed")]
    TransportClosed,
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

impl CodecError {
    /// Check whether the connection is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::UnexpectedEof { .. } | Self::TransportClosed
        )
    }

    /// Check whether this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
