//! # tds-testing
//!
//! Test infrastructure for the TDS client crates.
//!
//! Two ways to put a fake server behind a client, sharing one protocol
//! implementation:
//!
//! - [`MockTdsServer`] listens on a local TCP port and serves each
//!   connection on its own thread.
//! - [`MockConnector`] opens in-memory transports that answer every request
//!   synchronously, with counters and a packet log for assertions.
//!
//! Both answer PRELOGIN and LOGIN7, switch databases on `USE`, reply to SQL
//! batches from configured [`MockResponse`]s and acknowledge ATTENTION.
//!
//! ## Example
//!
//! ```rust
//! use tds_testing::{MockResponse, MockTdsServer};
//!
//! let connector = MockTdsServer::builder()
//!     .with_response("SELECT 1", MockResponse::scalar_int(1))
//!     .with_databases(["sales"])
//!     .connector();
//! let handle = connector.handle();
//! assert_eq!(handle.open_count(), 0);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod handler;
pub mod mock_server;
pub mod mock_transport;
pub mod responses;
pub mod tokens;

use tds_codec::CodecError;
use tds_protocol::ProtocolError;
use thiserror::Error;

pub use handler::{MockServerConfig, Request, RequestLog};
pub use mock_server::{MockServerBuilder, MockTdsServer};
pub use mock_transport::{MockConnector, MockHandle, MockTransport, RecordedPacket};
pub use responses::{MockColumn, MockResponse, ScalarValue};
pub use tokens::TokenWriter;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent something the mock does not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A client message could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(#[from] ProtocolError),

    /// Framing failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;
