//! Session driver.
//!
//! A [`Session`] owns the packet stream and walks one request/response
//! exchange at a time: it sends the request, feeds response packets into a
//! [`TokenParser`] as they arrive and turns tokens into [`Event`]s. Server
//! messages go to the connection's [`DiagnosticSink`], environment changes
//! update the session [`Environment`].
//!
//! The token loop is pull-based so the same driver serves both materialized
//! batches and streamed rows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tds_codec::{CodecError, MessageStream, Transport};
use tds_protocol::{
    ColMetaData, Done, DoneStatus, EncryptionLevel, EnvChange, EnvChangeType, EnvValue, Login7,
    LoginAck, PacketType, PreLogin, ProtocolError, RawRow, ServerMessage, TdsVersion, Token,
    TokenParser, encode_sql_batch,
};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::{Error, Result};
use crate::row::{Column, Row};
use crate::state::{SessionState, StateMachine};
use crate::value::Value;

/// What the response stream produced next.
#[derive(Debug)]
pub(crate) enum Event {
    /// A new result set starts with these columns.
    ResultSet(Arc<[Column]>),
    /// A row of the current result set.
    Row(Row),
    /// A statement finished.
    Done(Done),
    /// A procedure returned a status.
    ReturnStatus(i32),
}

/// Server-side environment as reported during the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Current database.
    pub database: Option<String>,
    /// Current language.
    pub language: Option<String>,
    /// Negotiated packet size.
    pub packet_size: usize,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name from LOGINACK.
    pub server_name: String,
    /// Server program version from LOGINACK.
    pub server_version: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            database: None,
            language: None,
            packet_size: tds_protocol::DEFAULT_PACKET_SIZE,
            tds_version: TdsVersion::default(),
            server_name: String::new(),
            server_version: String::new(),
        }
    }
}

/// State of the response currently being read.
#[derive(Debug, Default)]
struct Response {
    /// The last packet of the message has arrived.
    end_of_message: bool,
    /// A final DONE has been seen.
    complete: bool,
    /// First server error of the response.
    error: Option<ServerMessage>,
    /// A severity 20+ error ended the session server-side.
    fatal: bool,
    /// LOGINACK was received.
    login_acknowledged: bool,
}

pub(crate) struct Session<T: Transport> {
    stream: MessageStream<T>,
    parser: TokenParser,
    state: StateMachine,
    metadata: Option<ColMetaData>,
    columns: Option<Arc<[Column]>>,
    response: Response,
    deadline: Option<Instant>,
    env: Environment,
    diagnostics: DiagnosticSink,
    cancel: CancelToken,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(transport: T, tds_version: TdsVersion) -> Self {
        Self {
            stream: MessageStream::new(transport),
            parser: TokenParser::empty().with_version(tds_version),
            state: StateMachine::default(),
            metadata: None,
            columns: None,
            response: Response::default(),
            deadline: None,
            env: Environment {
                tds_version,
                ..Default::default()
            },
            diagnostics: DiagnosticSink::new(),
            cancel: CancelToken::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.current()
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn transport(&self) -> &T {
        self.stream.transport()
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Run PRELOGIN and LOGIN7, then select the configured database.
    ///
    /// On failure the session is back in `Disconnected`; the caller closes
    /// the transport.
    pub(crate) fn login(&mut self, config: &Config) -> Result<()> {
        self.state.transition(SessionState::LoggingIn);
        self.diagnostics.begin_operation();

        let result = self.login_exchange(config);
        if let Err(e) = &result {
            self.diagnostics.record_error(e);
            self.state.transition(SessionState::Disconnected);
            return result;
        }
        self.state.transition(SessionState::Ready);

        tracing::info!(
            server = %self.env.server_name,
            version = %self.env.server_version,
            tds_version = %self.env.tds_version,
            "login succeeded"
        );

        if let Some(database) = &config.database {
            self.select_database(database, config.timeouts.login_timeout)?;
        }
        Ok(())
    }

    fn login_exchange(&mut self, config: &Config) -> Result<()> {
        let timeout = config.timeouts.login_timeout;
        self.deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        self.stream.transport_mut().set_read_timeout(Some(timeout))?;

        self.prelogin()?;

        let login = Login7::new()
            .with_tds_version(config.tds_version)
            .with_sql_auth(&config.username, &config.password)
            .with_hostname(&config.client_hostname)
            .with_app_name(&config.application_name)
            .with_server_name(&config.host)
            .with_packet_size(u32::from(config.packet_size));

        tracing::debug!(user = %config.username, "sending LOGIN7");
        self.stream.send_message(PacketType::Tds7Login, login.encode())?;
        self.begin_response();

        while self.next_event()?.is_some() {}
        let response = std::mem::take(&mut self.response);
        self.deadline = None;

        match response.error {
            Some(err) => Err(Error::Login(format!("{} (error {})", err.message, err.number))),
            None if !response.login_acknowledged => {
                Err(Error::Login("server did not acknowledge the login".into()))
            }
            None => Ok(()),
        }
    }

    fn prelogin(&mut self) -> Result<()> {
        let request = PreLogin::new().with_encryption(EncryptionLevel::NotSupported);
        tracing::debug!(version = %request.version_string(), "sending PRELOGIN");
        self.stream.send_message(PacketType::PreLogin, request.encode())?;

        let message = self
            .stream
            .read_message()?
            .ok_or(CodecError::ConnectionClosed)?;
        let response = PreLogin::decode(&message.payload)?;
        tracing::debug!(
            server_version = %response.version_string(),
            encryption = ?response.encryption,
            "PRELOGIN response received"
        );

        if !response.encryption.allows_plaintext() {
            return Err(Error::Login(format!(
                "server requires encryption ({:?}), which this client does not support",
                response.encryption
            )));
        }
        Ok(())
    }

    fn select_database(&mut self, database: &str, timeout: Duration) -> Result<()> {
        let sql = format!("USE [{}]", database.replace(']', "]]"));
        let result = self.run_to_completion(&sql, timeout);

        let selection_error = |message: String| Error::DatabaseSelection {
            database: database.to_string(),
            message,
        };

        match result {
            Ok(()) => {}
            Err(Error::Server { message, .. }) => return Err(selection_error(message)),
            Err(e) => return Err(e),
        }

        let confirmed = self
            .env
            .database
            .as_deref()
            .is_some_and(|current| current.eq_ignore_ascii_case(database));
        if !confirmed {
            return Err(selection_error(
                "server did not confirm the database change".into(),
            ));
        }
        Ok(())
    }

    fn run_to_completion(&mut self, sql: &str, timeout: Duration) -> Result<()> {
        self.begin_batch(sql, timeout)?;
        while self.next_event()?.is_some() {}
        Ok(())
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Check that a new operation may start.
    pub(crate) fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        let state = self.state.current();
        if state.is_ready() {
            Ok(())
        } else if state.is_busy() {
            Err(Error::Busy)
        } else {
            Err(Error::InvalidState { state, operation })
        }
    }

    /// Send a SQL batch and move to `Executing`.
    pub(crate) fn begin_batch(&mut self, sql: &str, timeout: Duration) -> Result<()> {
        self.ensure_ready("execute")?;
        self.diagnostics.begin_operation();
        self.cancel.reset();

        let payload = if self.env.tds_version.requires_all_headers() {
            encode_sql_batch(sql)
        } else {
            Bytes::from(
                sql.encode_utf16()
                    .flat_map(u16::to_le_bytes)
                    .collect::<Vec<u8>>(),
            )
        };

        self.state.transition(SessionState::Executing);
        self.deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        let sent = self
            .stream
            .transport_mut()
            .set_read_timeout(Some(timeout))
            .and_then(|()| self.stream.send_message(PacketType::SqlBatch, payload));
        if let Err(e) = sent {
            return Err(self.fail(e.into()));
        }

        tracing::debug!(sql_len = sql.len(), "batch sent");
        self.begin_response();
        Ok(())
    }

    fn begin_response(&mut self) {
        self.response = Response::default();
        self.metadata = None;
        self.columns = None;
    }

    /// Pull the next event of the current response.
    ///
    /// Returns `Ok(None)` once the response is complete, or the first server
    /// error of the response if there was one. Any other failure moves the
    /// session to `ErrorState`.
    pub(crate) fn next_event(&mut self) -> Result<Option<Event>> {
        if !self.in_response() {
            return Ok(None);
        }

        loop {
            if self.response.complete {
                return self.finish_response();
            }

            let token = match self.read_token() {
                Ok(Some(token)) => token,
                Ok(None) => {
                    tracing::warn!("response ended without a final DONE");
                    self.response.complete = true;
                    continue;
                }
                Err(e) => return Err(self.fail(e)),
            };

            if self.state.current() == SessionState::Executing {
                self.state.transition(SessionState::FetchingResults);
            }

            match token {
                Token::ColMetaData(meta) if meta.is_empty() => {
                    // No-metadata marker: nothing follows that needs columns
                    tracing::trace!("column metadata without columns");
                    self.metadata = Some(meta);
                    self.columns = None;
                }
                Token::ColMetaData(meta) => {
                    let columns: Arc<[Column]> = meta
                        .columns
                        .iter()
                        .enumerate()
                        .map(|(i, c)| Column::from_metadata(i, c))
                        .collect();
                    tracing::trace!(columns = columns.len(), "result set started");
                    self.metadata = Some(meta);
                    self.columns = Some(Arc::clone(&columns));
                    return Ok(Some(Event::ResultSet(columns)));
                }
                Token::Row(raw) => match self.materialize_row(raw) {
                    Ok(row) => return Ok(Some(Event::Row(row))),
                    Err(e) => return Err(self.fail(e)),
                },
                Token::Done(done) | Token::DoneProc(done) => {
                    if done.status.contains(DoneStatus::SRVERROR) {
                        self.response.fatal = true;
                    }
                    if !done.has_more() {
                        self.response.complete = true;
                    }
                    return Ok(Some(Event::Done(done)));
                }
                Token::DoneInProc(done) => return Ok(Some(Event::Done(done))),
                Token::ReturnStatus(status) => return Ok(Some(Event::ReturnStatus(status))),
                Token::Error(msg) => {
                    self.diagnostics
                        .record(Diagnostic::from_server(DiagnosticKind::Error, &msg));
                    if msg.is_fatal() {
                        self.response.fatal = true;
                    }
                    if self.response.error.is_none() {
                        self.response.error = Some(msg);
                    }
                }
                Token::Info(msg) => {
                    self.diagnostics
                        .record(Diagnostic::from_server(DiagnosticKind::Info, &msg));
                }
                Token::LoginAck(ack) => {
                    self.apply_login_ack(&ack);
                    self.response.login_acknowledged = true;
                }
                Token::EnvChange(env) => self.apply_env_change(&env),
                Token::Order(_) | Token::Ignored(_) => {}
            }
        }
    }

    fn in_response(&self) -> bool {
        matches!(
            self.state.current(),
            SessionState::LoggingIn | SessionState::Executing | SessionState::FetchingResults
        )
    }

    fn finish_response(&mut self) -> Result<Option<Event>> {
        if !self.response.end_of_message {
            // Trailing packets of a response we stopped reading early
            if let Err(e) = self.drain_packets() {
                return Err(self.fail(e));
            }
        }

        self.metadata = None;
        self.columns = None;
        self.deadline = None;

        if self.state.current() == SessionState::Executing {
            // Response without a single token
            self.state.transition(SessionState::FetchingResults);
        }
        if self.state.current() == SessionState::LoggingIn {
            // Login decides the outcome from the collected response
            return Ok(None);
        }

        let response = std::mem::take(&mut self.response);
        if response.fatal {
            self.state.transition(SessionState::ErrorState);
        } else {
            self.state.transition(SessionState::Ready);
        }

        match response.error {
            Some(msg) => Err(Error::from(msg)),
            None => Ok(None),
        }
    }

    fn materialize_row(&self, raw: RawRow) -> Result<Row> {
        let (Some(meta), Some(columns)) = (&self.metadata, &self.columns) else {
            return Err(ProtocolError::RowWithoutMetadata {
                offset: self.parser.offset(),
            }
            .into());
        };

        if raw.values.len() != meta.columns.len() {
            return Err(Error::SchemaMismatch {
                expected: meta.columns.len(),
                actual: raw.values.len(),
            });
        }

        let mut values = Vec::new();
        if values.try_reserve_exact(meta.columns.len()).is_err() {
            return Err(Error::OutOfMemory);
        }
        values.extend(
            meta.columns
                .iter()
                .zip(&raw.values)
                .map(|(column, data)| Value::decode(column, data.as_deref())),
        );

        Row::new(Arc::clone(columns), values)
    }

    fn apply_login_ack(&mut self, ack: &LoginAck) {
        tracing::info!(
            tds_version = %ack.tds_version,
            interface = ack.interface,
            prog_name = %ack.prog_name,
            "login acknowledged"
        );
        self.env.tds_version = ack.tds_version;
        self.env.server_name = ack.prog_name.clone();
        self.env.server_version = ack.server_version();
        self.parser.set_version(ack.tds_version);
    }

    fn apply_env_change(&mut self, env: &EnvChange) {
        match env.env_type {
            EnvChangeType::Database => {
                if let Some(database) = env.new_database() {
                    tracing::debug!(database = %database, "database changed");
                    self.env.database = Some(database.to_string());
                }
            }
            EnvChangeType::PacketSize => match env.new_packet_size() {
                Some(size) => {
                    self.env.packet_size = size;
                    self.stream.set_packet_size(size);
                }
                None => tracing::warn!(value = ?env.new_value, "unparseable packet size change"),
            },
            EnvChangeType::Language => {
                if let EnvValue::Text(language) = &env.new_value {
                    tracing::debug!(language = %language, "language changed");
                    self.env.language = Some(language.clone());
                }
            }
            EnvChangeType::Other(code) => {
                tracing::warn!(env_type = code, "ignoring unknown environment change");
            }
            other => tracing::debug!(env_type = ?other, "environment change"),
        }
    }

    // =========================================================================
    // Packet input
    // =========================================================================

    fn read_token(&mut self) -> Result<Option<Token>> {
        loop {
            self.check_interrupts()?;

            match self.parser.next_token(self.metadata.as_ref()) {
                Ok(Some(token)) => return Ok(Some(token)),
                Ok(None) if self.response.end_of_message => return Ok(None),
                Ok(None) => {}
                Err(ProtocolError::Truncated { .. }) if !self.response.end_of_message => {}
                Err(e) => return Err(e.into()),
            }

            self.receive_packet()?;
        }
    }

    fn receive_packet(&mut self) -> Result<()> {
        match self.stream.read_packet_of(PacketType::TabularResult) {
            Ok(Some(packet)) => {
                tracing::trace!(
                    len = packet.payload.len(),
                    eom = packet.is_end_of_message(),
                    "response packet"
                );
                self.parser.push(&packet.payload);
                self.response.end_of_message = packet.is_end_of_message();
                Ok(())
            }
            Ok(None) | Err(CodecError::UnexpectedEof { .. }) => Err(self.truncated_at_eof().into()),
            Err(CodecError::Timeout) => {
                self.send_attention();
                Err(self.timeout_error())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The error to report when the peer hangs up mid-response.
    fn truncated_at_eof(&mut self) -> ProtocolError {
        match self.parser.next_token(self.metadata.as_ref()) {
            Err(e @ ProtocolError::Truncated { .. }) => e,
            _ => ProtocolError::Truncated {
                offset: self.parser.offset() + self.parser.remaining(),
                expected: 1,
                actual: 0,
            },
        }
    }

    fn drain_packets(&mut self) -> Result<()> {
        while !self.response.end_of_message {
            self.receive_packet()?;
        }
        let discarded = self.parser.remaining();
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "discarding trailing response data");
            self.parser = TokenParser::empty().with_version(self.env.tds_version);
        }
        Ok(())
    }

    fn check_interrupts(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.send_attention();
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.send_attention();
            return Err(self.timeout_error());
        }
        Ok(())
    }

    fn timeout_error(&self) -> Error {
        if self.state.current() == SessionState::LoggingIn {
            Error::ConnectionTimeout
        } else {
            Error::CommandTimeout
        }
    }

    fn send_attention(&mut self) {
        if let Err(e) = self.stream.send_attention() {
            tracing::debug!(error = %e, "failed to send attention");
        }
    }

    /// Record `err`, abandon the response and mark the session unusable.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        // Login records its own failure after mapping it
        if self.state.current() != SessionState::LoggingIn {
            self.diagnostics.record_error(&err);
        }
        self.response = Response::default();
        self.metadata = None;
        self.columns = None;
        self.deadline = None;
        self.parser = TokenParser::empty().with_version(self.env.tds_version);
        self.stream.discard_input();

        if matches!(
            self.state.current(),
            SessionState::Executing | SessionState::FetchingResults | SessionState::Ready
        ) {
            tracing::warn!(error = %err, "operation failed, session unusable until closed");
            self.state.transition(SessionState::ErrorState);
        }
        err
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Release the transport. Idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state.current() == SessionState::Closed {
            return Ok(());
        }
        self.state.transition(SessionState::Closed);
        self.response = Response::default();
        self.metadata = None;
        self.columns = None;
        tracing::debug!("closing session");
        self.stream.close().map_err(Error::from)
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state.current())
            .field("env", &self.env)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}
