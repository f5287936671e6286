//! A connection shared between threads.
//!
//! Sharing does not add concurrency: the server handles one request per
//! connection. [`SharedConnection`] makes the exclusivity explicit: a call
//! that finds the connection held by another thread fails with
//! [`Error::Busy`] instead of queueing behind it.

use std::sync::Arc;

use parking_lot::Mutex;
use tds_codec::{TcpTransport, Transport};

use crate::cancel::CancelToken;
use crate::connection::Connection;
use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::materializer::ResultBatch;
use crate::state::SessionState;

/// Cloneable handle to one [`Connection`].
pub struct SharedConnection<T: Transport = TcpTransport> {
    inner: Arc<Mutex<Connection<T>>>,
    cancel: CancelToken,
}

impl<T: Transport> SharedConnection<T> {
    /// Wrap a connection.
    #[must_use]
    pub fn new(connection: Connection<T>) -> Self {
        let cancel = connection.cancel_token();
        Self {
            inner: Arc::new(Mutex::new(connection)),
            cancel,
        }
    }

    /// Run `f` with exclusive access, or fail with [`Error::Busy`].
    pub fn with<R>(&self, f: impl FnOnce(&mut Connection<T>) -> Result<R>) -> Result<R> {
        let mut guard = self.inner.try_lock().ok_or(Error::Busy)?;
        f(&mut guard)
    }

    /// Run a SQL batch. See [`Connection::execute`].
    pub fn execute(&self, sql: &str) -> Result<ResultBatch> {
        self.with(|conn| conn.execute(sql))
    }

    /// Close the connection. See [`Connection::close`].
    pub fn close(&self) -> Result<()> {
        self.with(Connection::close)
    }

    /// Current state, or [`Error::Busy`] while an operation runs.
    pub fn state(&self) -> Result<SessionState> {
        self.with(|conn| Ok(conn.state()))
    }

    /// Copy of the most recent diagnostic.
    pub fn last_diagnostic(&self) -> Result<Option<Diagnostic>> {
        self.with(|conn| Ok(conn.last_diagnostic().cloned()))
    }

    /// Cancel the operation in flight. Never blocks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels the operation in flight.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<T: Transport> Clone for SharedConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for SharedConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}
