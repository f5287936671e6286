//! # tds-protocol
//!
//! Pure implementation of the Tabular Data Stream (TDS) wire format spoken by
//! Sybase and Microsoft SQL Server, as seen from the client side.
//!
//! The crate covers everything needed to turn a logical request into bytes
//! and a byte stream back into typed tokens:
//!
//! - packet headers and their status flags
//! - the PRELOGIN negotiation record
//! - the LOGIN7 record, including password obfuscation and field truncation
//! - SQL batch payloads
//! - the response token stream (column metadata, rows, completion tokens,
//!   server messages, login acknowledgement, environment changes)
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic;
//! every decoder works on byte slices and reports failures with the absolute
//! byte offset at which the input stopped making sense. Framing over a real
//! transport lives in `tds-codec`, session handling in `tds-client`.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use tds_protocol::{Token, TokenParser};
//!
//! // DONE token with the COUNT bit set and a row count of 5
//! let data = Bytes::from_static(&[
//!     0xFD, 0x10, 0x00, 0xC1, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
//! ]);
//! let mut parser = TokenParser::new(data);
//! match parser.next_token(None).unwrap() {
//!     Some(Token::Done(done)) => assert_eq!(done.row_count, 5),
//!     other => panic!("unexpected token: {other:?}"),
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use codec::WireReader;
pub use error::ProtocolError;
pub use login7::{Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags, MAX_FIELD_CHARS};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use sql_batch::{SqlBatch, decode_sql_batch, encode_sql_batch};
pub use token::{
    ColMetaData, ColumnData, Collation, Done, DoneStatus, EnvChange, EnvChangeType, EnvValue, LoginAck,
    Order, RawRow, ServerMessage, Token, TokenParser, TokenType, TypeInfo,
};
pub use types::{ColumnFlags, LengthClass, TypeId};
pub use version::TdsVersion;
