//! # tds-codec
//!
//! Blocking framing layer between a byte-stream transport and the TDS
//! protocol types.
//!
//! This crate turns a raw byte stream into TDS packets and messages,
//! handling packet reassembly across read boundaries and packet splitting
//! for large requests.
//!
//! ## Architecture
//!
//! ```text
//! Transport (TCP / in-memory) → TdsCodec (packet framing) → MessageStream → Session
//! ```
//!
//! The transport is a trait so the session can run over a real TCP socket
//! ([`TcpConnector`]) or an in-memory script in tests.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tds_codec::{Connector, MessageStream, TcpConnector};
//!
//! let transport = TcpConnector.open("db.local", 1433, Duration::from_secs(5))?;
//! let mut stream = MessageStream::new(transport);
//! stream.send_message(PacketType::PreLogin, prelogin.encode())?;
//! let reply = stream.read_message()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod message;
pub mod packet_codec;
pub mod stream;
pub mod transport;

pub use error::CodecError;
pub use message::{Message, MessageAssembler, split_message};
pub use packet_codec::{Packet, TdsCodec};
pub use stream::MessageStream;
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};
