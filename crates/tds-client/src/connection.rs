//! Connection facade.

use std::time::Duration;

use tds_codec::{Connector, TcpConnector, TcpTransport, Transport};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{Error, Result};
use crate::materializer::{Materializer, ResultBatch};
use crate::session::{Environment, Session};
use crate::state::SessionState;
use crate::stream::RowStream;

/// A logged-in connection to a TDS server.
///
/// One operation runs at a time; every call blocks until the server has
/// answered. Dropping the connection closes it.
///
/// ```rust,no_run
/// use tds_client::Connection;
///
/// # fn main() -> tds_client::Result<()> {
/// let mut conn = Connection::connect("db.local", "app", "secret", "sales", 5)?;
/// let batch = conn.execute("SELECT id, name FROM customers")?;
/// for row in batch.rows() {
///     println!("{:?}", row.get_by_name("name"));
/// }
/// conn.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Connection<T: Transport = TcpTransport> {
    session: Session<T>,
    config: Config,
}

impl Connection<TcpTransport> {
    /// Connect over TCP and log in.
    ///
    /// `server` accepts `host`, `host:port` or `host,port`. An empty
    /// `database` keeps the login's default database. `timeout_secs` bounds
    /// both the TCP connect and the login exchange.
    pub fn connect(
        server: &str,
        user: &str,
        password: &str,
        database: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let config = Config::new(server)?
            .credentials(user, password)
            .database(database)
            .connect_timeout(Duration::from_secs(timeout_secs));
        Self::connect_with(&config, &TcpConnector)
    }

    /// Connect over TCP using a full configuration.
    pub fn open(config: &Config) -> Result<Self> {
        Self::connect_with(config, &TcpConnector)
    }
}

impl<T: Transport> Connection<T> {
    /// Connect through `connector` and log in.
    ///
    /// Failure at any step leaves no open transport behind.
    pub fn connect_with<C>(config: &Config, connector: &C) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        config.validate()?;
        tracing::info!(host = %config.host, port = config.port, "connecting");

        let transport = connector
            .open(&config.host, config.port, config.timeouts.connect_timeout)
            .map_err(|e| connect_error(e.into()))?;

        let mut session = Session::new(transport, config.tds_version);
        if let Err(e) = session.login(config) {
            if let Err(close_err) = session.close() {
                tracing::debug!(error = %close_err, "error closing after failed login");
            }
            return Err(connect_error(e));
        }

        Ok(Self {
            session,
            config: config.clone(),
        })
    }

    /// Run a SQL batch and materialize every result set.
    ///
    /// A batch the server rejects returns [`Error::Server`] after the whole
    /// response has been read; the connection stays usable. Decode,
    /// transport, timeout and cancellation failures leave the connection in
    /// [`SessionState::ErrorState`].
    pub fn execute(&mut self, sql: &str) -> Result<ResultBatch> {
        self.session
            .begin_batch(sql, self.config.timeouts.command_timeout)?;

        let mut materializer = Materializer::new();
        while let Some(event) = self.session.next_event()? {
            if let Err(e) = materializer.apply(event) {
                return Err(self.session.fail(e));
            }
        }

        let messages = self
            .session
            .diagnostics()
            .history()
            .iter()
            .filter(|d| d.kind == DiagnosticKind::Info)
            .cloned()
            .collect();
        Ok(materializer.finish(messages))
    }

    /// Run a SQL batch and stream its rows.
    ///
    /// Rows of all result sets arrive in order. Dropping the stream early
    /// reads and discards the rest of the response.
    pub fn query(&mut self, sql: &str) -> Result<RowStream<'_, T>> {
        self.session
            .begin_batch(sql, self.config.timeouts.command_timeout)?;
        Ok(RowStream::new(&mut self.session))
    }

    /// Close the connection. Calling it again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Closed {
            return Ok(());
        }
        tracing::debug!(host = %self.config.host, "closing connection");
        self.session.close()
    }

    /// Most recent diagnostic of this connection.
    #[must_use]
    pub fn last_diagnostic(&self) -> Option<&Diagnostic> {
        self.session.diagnostics().last()
    }

    /// Diagnostics of the last operation, in arrival order.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.session.diagnostics().history()
    }

    /// Negotiated protocol version, e.g. `TDS 7.4`.
    #[must_use]
    pub fn protocol_version(&self) -> String {
        format!("TDS {}", self.session.env().tds_version)
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Check whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.session.state() == SessionState::Closed
    }

    /// Current database as last reported by the server.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.session.env().database.as_deref()
    }

    /// Server-reported environment.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        self.session.env()
    }

    /// Token that cancels the operation in flight from another thread.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.session.cancel_token()
    }

    /// Configuration the connection was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Borrow the transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        self.session.transport()
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(error = %e, "error closing connection on drop");
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("session", &self.session)
            .finish()
    }
}

/// Fold transport-level failures during connect into the connect family.
fn connect_error(err: Error) -> Error {
    match err {
        Error::Codec(e) if e.is_timeout() => Error::ConnectionTimeout,
        Error::Codec(e) => Error::Connection(e.to_string()),
        Error::CommandTimeout => Error::ConnectionTimeout,
        other => other,
    }
}
