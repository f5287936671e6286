//! Client error types.

use tds_codec::CodecError;
use tds_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

use crate::state::SessionState;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport could not be opened or failed during connect.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connecting or logging in took longer than the configured timeout.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The server refused the login or the pre-login negotiation failed.
    #[error("login failed: {0}")]
    Login(String),

    /// The initial database could not be selected.
    #[error("cannot use database '{database}': {message}")]
    DatabaseSelection {
        /// Requested database.
        database: String,
        /// Server message explaining the failure.
        message: String,
    },

    /// The response stream could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Packet framing or transport failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A row did not match its column metadata.
    #[error("row has {actual} values but the result set has {expected} columns")]
    SchemaMismatch {
        /// Column count of the active result set.
        expected: usize,
        /// Value count of the row.
        actual: usize,
    },

    /// No column matches the selector.
    #[error("column {0} not found")]
    ColumnNotFound(String),

    /// A cell could not be parsed into the requested type.
    #[error("cannot convert column {column}: {message}")]
    Conversion {
        /// Column selector.
        column: String,
        /// Parse failure.
        message: String,
    },

    /// The server rejected the batch.
    #[error("server error {number} (severity {class}, state {state}): {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name.
        server: String,
        /// Procedure name, empty outside procedures.
        procedure: String,
        /// Line number in the batch or procedure.
        line: i32,
    },

    /// Another operation is in flight on this connection.
    #[error("connection is busy with another operation")]
    Busy,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation is not valid in the current session state.
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        /// Session state at the time of the call.
        state: SessionState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// The command did not complete within the command timeout.
    #[error("command timed out")]
    CommandTimeout,

    /// Result rows could not be allocated.
    #[error("out of memory while materializing results")]
    OutOfMemory,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error belongs to the connect family.
    #[must_use]
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::ConnectionTimeout
                | Self::Login(_)
                | Self::DatabaseSelection { .. }
        )
    }

    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionTimeout | Self::CommandTimeout | Self::Busy | Self::Connection(_) => {
                true
            }
            Self::Codec(e) => e.is_timeout() || e.is_disconnect(),
            // Deadlock victim, lock timeout
            Self::Server { number, .. } => matches!(number, 1205 | 1222),
            _ => false,
        }
    }

    /// Check if this error indicates malformed server data.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::SchemaMismatch { .. })
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the severity if this is a server error.
    ///
    /// - 0-10: informational
    /// - 11-16: user errors
    /// - 17-19: resource errors
    /// - 20-25: fatal, the connection is terminated
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }
}

impl From<ServerMessage> for Error {
    fn from(msg: ServerMessage) -> Self {
        Self::Server {
            number: msg.number,
            class: msg.class,
            state: msg.state,
            message: msg.message,
            server: msg.server,
            procedure: msg.procedure,
            line: msg.line,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_family() {
        assert!(Error::ConnectionTimeout.is_connect_error());
        assert!(Error::Login("bad password".into()).is_connect_error());
        assert!(!Error::Busy.is_connect_error());
    }

    #[test]
    fn test_server_error_from_message() {
        let err = Error::from(ServerMessage {
            number: 1205,
            class: 13,
            state: 51,
            message: "deadlock victim".into(),
            ..Default::default()
        });
        assert!(err.is_server_error(1205));
        assert!(err.is_transient());
        assert_eq!(err.class(), Some(13));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            state: SessionState::ErrorState,
            operation: "execute",
        };
        assert_eq!(err.to_string(), "cannot execute while the session is ErrorState");
    }
}
