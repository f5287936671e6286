//! Session state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Disconnected -> LoggingIn        (login starts)
//! LoggingIn -> Ready               (LOGINACK received, database selected)
//! LoggingIn -> Disconnected        (login refused, transport failure)
//! Ready -> Executing               (batch sent)
//! Executing -> FetchingResults     (first response token)
//! FetchingResults -> Ready         (final DONE)
//! Executing | FetchingResults -> ErrorState (decode, transport, cancel)
//! Ready -> ErrorState             (materialization failure)
//! any -> Closed                    (close)
//! ```
//!
//! From `ErrorState` only `close` is valid. `Closed` is terminal.

use std::fmt;

/// Runtime state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No transport.
    #[default]
    Disconnected,
    /// PRELOGIN/LOGIN7 exchange in progress.
    LoggingIn,
    /// Idle and usable.
    Ready,
    /// A batch has been sent, no response token yet.
    Executing,
    /// Response tokens are being consumed.
    FetchingResults,
    /// The session is unusable until closed.
    ErrorState,
    /// Closed for good.
    Closed,
}

impl SessionState {
    /// Check whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, LoggingIn)
            | (LoggingIn, Ready | Disconnected)
            | (Ready, Executing | ErrorState)
            | (Executing, FetchingResults | ErrorState)
            | (FetchingResults, Ready | ErrorState) => true,
            _ => false,
        }
    }

    /// Check if a new operation may start.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Check if an operation is in flight.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::LoggingIn | Self::Executing | Self::FetchingResults)
    }

    /// Check if the session can never be used again without closing.
    #[must_use]
    pub fn is_broken(self) -> bool {
        matches!(self, Self::ErrorState | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Holder that only allows legal transitions.
#[derive(Debug, Default)]
pub(crate) struct StateMachine {
    state: SessionState,
}

impl StateMachine {
    pub(crate) fn current(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. Illegal transitions are logged and ignored; every
    /// caller checks legality up front, so hitting one is an engine bug.
    pub(crate) fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "ignoring illegal state transition");
            return;
        }
        tracing::trace!(from = %self.state, to = %next, "session state change");
        self.state = next;
    }
}
