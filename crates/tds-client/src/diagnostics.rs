//! Per-connection message sink.
//!
//! Every ERROR and INFO token the server sends is recorded here, as are
//! client-side failures (transport, decode) so the last thing that went
//! wrong is always retrievable. The sink belongs to one connection; there
//! is no process-wide message buffer.

use std::fmt;

use tds_protocol::ServerMessage;

use crate::error::Error;

/// Origin and weight of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Server ERROR token.
    Error,
    /// Server INFO token (PRINT, database change notices).
    Info,
    /// Failure raised by the client itself.
    Client,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Message kind.
    pub kind: DiagnosticKind,
    /// Message number; 0 for client diagnostics.
    pub number: i32,
    /// Severity class.
    pub severity: u8,
    /// Message state.
    pub state: u8,
    /// Line number in the batch.
    pub line: i32,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
}

impl Diagnostic {
    /// Build from a server ERROR or INFO token.
    #[must_use]
    pub fn from_server(kind: DiagnosticKind, msg: &ServerMessage) -> Self {
        Self {
            kind,
            number: msg.number,
            severity: msg.class,
            state: msg.state,
            line: msg.line,
            message: msg.message.clone(),
            server: msg.server.clone(),
            procedure: msg.procedure.clone(),
        }
    }

    /// Build a client-side diagnostic for `err`.
    #[must_use]
    pub fn from_client(err: &Error) -> Self {
        Self {
            kind: DiagnosticKind::Client,
            number: 0,
            severity: 0,
            state: 0,
            line: 0,
            message: err.to_string(),
            server: String::new(),
            procedure: String::new(),
        }
    }

    /// Check if this is a server error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == DiagnosticKind::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::Client => write!(f, "client: {}", self.message),
            _ => write!(
                f,
                "Msg {}, Level {}, State {}, Line {}: {}",
                self.number, self.severity, self.state, self.line, self.message
            ),
        }
    }
}

/// Accumulator for the diagnostics of one connection.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    last: Option<Diagnostic>,
    history: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic; it becomes [`last`](Self::last).
    pub fn record(&mut self, diagnostic: Diagnostic) {
        match diagnostic.kind {
            DiagnosticKind::Info => tracing::debug!(
                number = diagnostic.number,
                message = %diagnostic.message,
                "server info"
            ),
            DiagnosticKind::Error => tracing::debug!(
                number = diagnostic.number,
                class = diagnostic.severity,
                message = %diagnostic.message,
                "server error"
            ),
            DiagnosticKind::Client => tracing::debug!(message = %diagnostic.message, "client error"),
        }
        self.history.push(diagnostic.clone());
        self.last = Some(diagnostic);
    }

    /// Record a client-side failure.
    pub fn record_error(&mut self, err: &Error) {
        self.record(Diagnostic::from_client(err));
    }

    /// Most recent diagnostic of the connection's lifetime.
    #[must_use]
    pub fn last(&self) -> Option<&Diagnostic> {
        self.last.as_ref()
    }

    /// Diagnostics of the current operation, in arrival order.
    #[must_use]
    pub fn history(&self) -> &[Diagnostic] {
        &self.history
    }

    /// Start a new operation. [`last`](Self::last) survives.
    pub fn begin_operation(&mut self) {
        self.history.clear();
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.history.clear();
        self.last = None;
    }

    /// First server error of the current operation.
    #[must_use]
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.history.iter().find(|d| d.is_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(text: &str) -> Diagnostic {
        Diagnostic::from_server(
            DiagnosticKind::Info,
            &ServerMessage {
                number: 5701,
                message: text.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_last_is_overwritten() {
        let mut sink = DiagnosticSink::new();
        sink.record(info("first"));
        sink.record(info("second"));
        assert_eq!(sink.last().map(|d| d.message.as_str()), Some("second"));
        assert_eq!(sink.history().len(), 2);
    }

    #[test]
    fn test_begin_operation_keeps_last() {
        let mut sink = DiagnosticSink::new();
        sink.record(info("kept"));
        sink.begin_operation();
        assert!(sink.history().is_empty());
        assert_eq!(sink.last().map(|d| d.message.as_str()), Some("kept"));

        sink.clear();
        assert!(sink.last().is_none());
    }

    #[test]
    fn test_client_diagnostic_has_number_zero() {
        let mut sink = DiagnosticSink::new();
        sink.record_error(&Error::CommandTimeout);
        let last = sink.last().cloned().unwrap_or_else(|| info("missing"));
        assert_eq!(last.kind, DiagnosticKind::Client);
        assert_eq!(last.number, 0);
        assert_eq!(last.to_string(), "client: command timed out");
    }

    #[test]
    fn test_first_error_skips_info() {
        let mut sink = DiagnosticSink::new();
        sink.record(info("changed database"));
        sink.record(Diagnostic::from_server(
            DiagnosticKind::Error,
            &ServerMessage {
                number: 208,
                class: 16,
                state: 1,
                line: 1,
                message: "Invalid object name 'nope'.".into(),
                ..Default::default()
            },
        ));
        let err = sink.first_error().map(ToString::to_string);
        assert_eq!(
            err.as_deref(),
            Some("Msg 208, Level 16, State 1, Line 1: Invalid object name 'nope'.")
        );
    }
}
