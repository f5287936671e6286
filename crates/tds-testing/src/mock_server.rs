//! Mock TDS server on a local TCP port.
//!
//! Each accepted connection gets its own thread running a
//! [`ServerSession`]: PRELOGIN, LOGIN7, then SQL batches answered from the
//! configured responses.
//!
//! ```rust,no_run
//! use tds_testing::{MockColumn, MockResponse, MockTdsServer, ScalarValue};
//!
//! let server = MockTdsServer::builder()
//!     .with_response(
//!         "SELECT id, name FROM users",
//!         MockResponse::rows(
//!             vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
//!             vec![vec![ScalarValue::Int(1), ScalarValue::from("Alice")]],
//!         ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let addr = server.addr();
//! // Connect a client to addr...
//! ```

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tds_codec::{MessageStream, TcpTransport, Transport};
use tds_protocol::{EncryptionLevel, TdsVersion};

use crate::handler::{Action, MockServerConfig, RequestLog, ServerSession, normalize};
use crate::mock_transport::MockConnector;
use crate::responses::MockResponse;
use crate::Result;

/// Builder for [`MockTdsServer`] and [`MockConnector`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `response`.
    #[must_use]
    pub fn with_response(mut self, sql: impl AsRef<str>, response: MockResponse) -> Self {
        self.config
            .responses
            .push((normalize(sql.as_ref()), response));
        self
    }

    /// Answer unmatched SQL with `response`.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Program name reported in LOGINACK.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Highest TDS version to accept.
    #[must_use]
    pub fn with_tds_version(mut self, version: TdsVersion) -> Self {
        self.config.tds_version = version;
        self
    }

    /// Database a fresh login lands in.
    #[must_use]
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.config.database = db.into();
        self
    }

    /// Databases `USE` may switch to.
    #[must_use]
    pub fn with_databases<I, S>(mut self, databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .databases
            .extend(databases.into_iter().map(Into::into));
        self
    }

    /// Accept `USE` without reporting the database change.
    #[must_use]
    pub fn without_use_confirmation(mut self) -> Self {
        self.config.confirm_use = false;
        self
    }

    /// Encryption level announced in PRELOGIN.
    #[must_use]
    pub fn with_encryption(mut self, level: EncryptionLevel) -> Self {
        self.config.encryption = level;
        self
    }

    /// Only accept these credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((user.into(), password.into()));
        self
    }

    /// Packet size to confirm regardless of the request.
    #[must_use]
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.config.packet_size = Some(size);
        self
    }

    /// Stall before answering LOGIN7.
    #[must_use]
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.config.login_delay = Some(delay);
        self
    }

    /// Finished configuration.
    #[must_use]
    pub fn config(self) -> MockServerConfig {
        self.config
    }

    /// In-memory connector with this configuration.
    #[must_use]
    pub fn connector(self) -> MockConnector {
        MockConnector::new(self.config)
    }

    /// Bind `127.0.0.1` on a free port and start accepting.
    pub fn build(self) -> Result<MockTdsServer> {
        MockTdsServer::start(self.config)
    }
}

/// Mock server listening on a local port.
///
/// Stops when dropped.
#[derive(Debug)]
pub struct MockTdsServer {
    addr: SocketAddr,
    log: Arc<RequestLog>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MockTdsServer {
    /// Start configuring a server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let config = Arc::new(config);
        let log = Arc::new(RequestLog::default());
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        tracing::debug!(%addr, "mock server listening");

        let accept_thread = {
            let log = Arc::clone(&log);
            let connections = Arc::clone(&connections);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("mock-tds-accept".into())
                .spawn(move || accept_loop(&listener, &config, &log, &connections, &shutdown))?
        };

        Ok(Self {
            addr,
            log,
            connections,
            shutdown,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    /// Listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening host.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Listening port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `host,port` for a client configuration.
    #[must_use]
    pub fn server(&self) -> String {
        format!("{},{}", self.host(), self.port())
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Requests received on all connections.
    #[must_use]
    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    /// Stop accepting connections. Open connections run to completion.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept.
        if let Err(e) = TcpStream::connect(self.addr) {
            tracing::debug!(error = %e, "mock server wake-up connect failed");
        }
        if let Some(handle) = self.accept_thread.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("mock server accept thread panicked");
            }
        }
    }

    /// Check whether [`stop`](Self::stop) has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &TcpListener,
    config: &Arc<MockServerConfig>,
    log: &Arc<RequestLog>,
    connections: &AtomicUsize,
    shutdown: &AtomicBool,
) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "mock server accept failed");
                continue;
            }
        };
        let id = connections.fetch_add(1, Ordering::SeqCst) + 1;
        let session = ServerSession::new(Arc::clone(config), Arc::clone(log));
        let spawned = thread::Builder::new()
            .name(format!("mock-tds-conn-{id}"))
            .spawn(move || {
                if let Err(e) = serve(stream, session) {
                    tracing::debug!(connection = id, error = %e, "mock connection ended");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "cannot spawn mock connection thread");
        }
    }
}

fn serve(stream: TcpStream, mut session: ServerSession) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut messages = MessageStream::new(TcpTransport::new(stream));

    while let Some(message) = messages.read_message()? {
        for action in session.handle(&message)? {
            match action {
                Action::Write(bytes) => messages.transport_mut().send(&bytes)?,
                Action::Sleep(delay) => thread::sleep(delay),
                Action::Hangup => {
                    messages.close()?;
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}
