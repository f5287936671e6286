//! Server-side protocol handling shared by the TCP server and the in-memory
//! transport.
//!
//! A [`ServerSession`] consumes complete client messages and answers each
//! with a list of [`Action`]s: bytes to write, pauses, or a hangup.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tds_codec::{Message, TdsCodec, split_message};
use tds_protocol::{
    DEFAULT_PACKET_SIZE, DoneStatus, EncryptionLevel, EnvChangeType, Login7, MAX_PACKET_SIZE,
    MIN_PACKET_SIZE, PacketType, PreLogin, TdsVersion, decode_sql_batch,
};
use tokio_util::codec::Encoder;

use crate::responses::MockResponse;
use crate::tokens::{TokenWriter, prelogin_response};
use crate::{MockServerError, Result};

/// Login failure number used by real servers.
pub const LOGIN_FAILED: i32 = 18456;

/// "Database does not exist".
pub const UNKNOWN_DATABASE: i32 = 911;

/// "Changed database context".
pub const DATABASE_CHANGED: i32 = 5701;

/// Behaviour of a mock server.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Replies keyed by normalized SQL text.
    pub responses: Vec<(String, MockResponse)>,
    /// Reply for SQL without a configured response.
    pub default_response: MockResponse,
    /// Program name reported in LOGINACK.
    pub server_name: String,
    /// Highest TDS version the server accepts.
    pub tds_version: TdsVersion,
    /// Database a fresh login lands in.
    pub database: String,
    /// Databases `USE` can switch to, besides the login database.
    pub databases: Vec<String>,
    /// Confirm `USE` with a database ENVCHANGE.
    pub confirm_use: bool,
    /// Encryption level announced in PRELOGIN.
    pub encryption: EncryptionLevel,
    /// Accepted credentials; any login succeeds when unset.
    pub credentials: Option<(String, String)>,
    /// Packet size the server insists on, instead of the requested one.
    pub packet_size: Option<usize>,
    /// Reply to LOGIN7 after this delay.
    pub login_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            responses: Vec::new(),
            default_response: MockResponse::empty(),
            server_name: "MockServer".into(),
            tds_version: TdsVersion::V7_4,
            database: "master".into(),
            databases: Vec::new(),
            confirm_use: true,
            encryption: EncryptionLevel::NotSupported,
            credentials: None,
            packet_size: None,
            login_delay: None,
        }
    }
}

impl MockServerConfig {
    /// Reply configured for `sql`, matched case-insensitively after trimming.
    #[must_use]
    pub fn find_response(&self, sql: &str) -> &MockResponse {
        let key = normalize(sql);
        self.responses
            .iter()
            .find(|(k, _)| *k == key)
            .map_or(&self.default_response, |(_, response)| response)
    }

    fn knows_database(&self, name: &str) -> bool {
        self.database.eq_ignore_ascii_case(name)
            || self.databases.iter().any(|db| db.eq_ignore_ascii_case(name))
    }
}

pub(crate) fn normalize(sql: &str) -> String {
    sql.trim().to_lowercase()
}

/// A client request as the server understood it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// PRELOGIN.
    PreLogin(PreLogin),
    /// LOGIN7, with the password de-obfuscated.
    Login(Box<Login7>),
    /// SQL batch text.
    SqlBatch(String),
    /// ATTENTION signal.
    Attention,
}

/// Requests received across all connections, in arrival order.
#[derive(Debug, Default)]
pub struct RequestLog {
    requests: Mutex<Vec<Request>>,
}

impl RequestLog {
    pub(crate) fn record(&self, request: Request) {
        tracing::trace!(?request, "mock server request");
        self.requests.lock().push(request);
    }

    /// All requests.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// SQL text of every batch.
    #[must_use]
    pub fn sql_batches(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                Request::SqlBatch(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every LOGIN7 record.
    #[must_use]
    pub fn logins(&self) -> Vec<Login7> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                Request::Login(login) => Some((**login).clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of ATTENTION signals.
    #[must_use]
    pub fn attention_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, Request::Attention))
            .count()
    }
}

/// Something the server does in reply to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these packet bytes.
    Write(Bytes),
    /// Wait before the next action.
    Sleep(Duration),
    /// Close the connection.
    Hangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PreLogin,
    Login,
    LoggedIn,
}

/// Server side of one connection.
#[derive(Debug)]
pub struct ServerSession {
    config: Arc<MockServerConfig>,
    log: Arc<RequestLog>,
    stage: Stage,
    database: String,
    packet_size: usize,
    version: TdsVersion,
    codec: TdsCodec,
}

impl ServerSession {
    /// Start a connection.
    #[must_use]
    pub fn new(config: Arc<MockServerConfig>, log: Arc<RequestLog>) -> Self {
        let database = config.database.clone();
        let version = config.tds_version;
        Self {
            config,
            log,
            stage: Stage::PreLogin,
            database,
            packet_size: DEFAULT_PACKET_SIZE,
            version,
            codec: TdsCodec::new(),
        }
    }

    /// Answer one client message.
    pub fn handle(&mut self, message: &Message) -> Result<Vec<Action>> {
        match (self.stage, message.packet_type) {
            (_, PacketType::Attention) => {
                self.log.record(Request::Attention);
                let payload = self.writer().done(DoneStatus::ATTN, 0).finish();
                Ok(vec![Action::Write(self.packetize(&payload)?)])
            }
            (Stage::PreLogin, PacketType::PreLogin) => {
                let request = PreLogin::decode(&message.payload)?;
                self.log.record(Request::PreLogin(request));
                self.stage = Stage::Login;
                let reply = prelogin_response(self.config.encryption);
                Ok(vec![Action::Write(self.packetize(&reply)?)])
            }
            (Stage::Login, PacketType::Tds7Login) => self.login(&message.payload),
            (Stage::LoggedIn, PacketType::SqlBatch) => self.batch(&message.payload),
            (stage, packet_type) => Err(MockServerError::Protocol(format!(
                "unexpected {packet_type:?} message during {stage:?}"
            ))),
        }
    }

    fn login(&mut self, payload: &[u8]) -> Result<Vec<Action>> {
        let login = Login7::decode(payload)?;
        self.log.record(Request::Login(Box::new(login.clone())));
        let mut actions = Vec::new();
        if let Some(delay) = self.config.login_delay {
            actions.push(Action::Sleep(delay));
        }

        if let Some((user, password)) = &self.config.credentials {
            if login.username != *user || login.password != *password {
                let message = format!("Login failed for user '{}'.", login.username);
                let reply = self
                    .writer()
                    .error(LOGIN_FAILED, 14, &message)
                    .done(DoneStatus::ERROR, 0)
                    .finish();
                actions.push(Action::Write(self.packetize(&reply)?));
                return Ok(actions);
            }
        }

        self.version = login.tds_version.min(self.config.tds_version);
        let requested = usize::try_from(login.packet_size).unwrap_or(DEFAULT_PACKET_SIZE);
        self.packet_size = self
            .config
            .packet_size
            .unwrap_or(requested)
            .clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);

        let database = self.database.clone();
        let reply = self
            .writer()
            .env_change(EnvChangeType::Database, &database, "master")
            .info(
                DATABASE_CHANGED,
                &format!("Changed database context to '{database}'."),
            )
            .env_change(EnvChangeType::Language, "us_english", "")
            .login_ack(self.version, &self.config.server_name)
            .env_change(
                EnvChangeType::PacketSize,
                &self.packet_size.to_string(),
                &DEFAULT_PACKET_SIZE.to_string(),
            )
            .done(DoneStatus::empty(), 0)
            .finish();

        // The reply to LOGIN7 still uses the default packet size.
        actions.push(Action::Write(self.packetize_with(&reply, DEFAULT_PACKET_SIZE)?));
        self.stage = Stage::LoggedIn;
        Ok(actions)
    }

    fn batch(&mut self, payload: &[u8]) -> Result<Vec<Action>> {
        let sql = decode_sql_batch(payload)?;
        self.log.record(Request::SqlBatch(sql.clone()));

        if let Some(database) = parse_use(&sql) {
            let reply = self.use_database(&database);
            return Ok(vec![Action::Write(self.packetize(&reply)?)]);
        }

        let config = Arc::clone(&self.config);
        let response = config.find_response(&sql);
        let mut out = self.writer();
        response.write_tokens(&sql, &mut out, false);
        let wire = self.packetize(&out.finish())?;

        let mut actions = Vec::new();
        let mut effect = response;
        loop {
            match effect {
                MockResponse::Delayed(delay, inner) => {
                    actions.push(Action::Sleep(*delay));
                    effect = &**inner;
                }
                MockResponse::Hangup { keep, .. } => {
                    let keep = (*keep).min(wire.len());
                    actions.push(Action::Write(wire.slice(..keep)));
                    actions.push(Action::Hangup);
                    return Ok(actions);
                }
                _ => break,
            }
        }
        actions.push(Action::Write(wire));
        Ok(actions)
    }

    fn use_database(&mut self, name: &str) -> Bytes {
        let mut out = self.writer();
        if !self.config.knows_database(name) {
            let message = format!(
                "Database '{name}' does not exist. Make sure that the name is entered correctly."
            );
            return out
                .error(UNKNOWN_DATABASE, 16, &message)
                .done(DoneStatus::ERROR, 0)
                .finish();
        }

        if self.config.confirm_use {
            let old = std::mem::replace(&mut self.database, name.to_string());
            out.env_change(EnvChangeType::Database, name, &old).info(
                DATABASE_CHANGED,
                &format!("Changed database context to '{name}'."),
            );
        }
        out.done(DoneStatus::empty(), 0).finish()
    }

    fn writer(&self) -> TokenWriter {
        TokenWriter::with_version(self.version)
    }

    fn packetize(&mut self, payload: &Bytes) -> Result<Bytes> {
        self.packetize_with(payload, self.packet_size)
    }

    fn packetize_with(&mut self, payload: &Bytes, packet_size: usize) -> Result<Bytes> {
        self.codec.reset_packet_id();
        let mut out = BytesMut::with_capacity(payload.len() + 8);
        for packet in split_message(PacketType::TabularResult, payload, packet_size) {
            self.codec.encode(packet, &mut out)?;
        }
        Ok(out.freeze())
    }

    /// Current database of this connection.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }
}

/// Database named by a `USE` statement, brackets and escapes removed.
fn parse_use(sql: &str) -> Option<String> {
    let sql = sql.trim().trim_end_matches(';');
    let (keyword, rest) = sql.split_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("use") {
        return None;
    }
    let name = rest.trim();
    let name = match name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
        Some(quoted) => quoted.replace("]]", "]"),
        None => name.to_string(),
    };
    (!name.is_empty()).then_some(name)
}
