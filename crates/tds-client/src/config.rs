//! Client configuration.

use std::fmt;
use std::time::Duration;

use tds_protocol::{MIN_PACKET_SIZE, TdsVersion};

use crate::error::{Error, Result};

/// Default TDS port.
pub const DEFAULT_PORT: u16 = 1433;

/// Largest packet size a server will accept at login.
pub const MAX_LOGIN_PACKET_SIZE: u16 = 32767;

/// Timeout configuration for the phases of a connection.
///
/// A zero duration disables that limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time to establish the TCP connection (default: 5s).
    pub connect_timeout: Duration,
    /// Time to complete pre-login, login and database selection (default: 5s).
    pub login_timeout: Duration,
    /// Time allowed for one command, checked between reads (default: 30s).
    pub command_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            login_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the login sequence timeout.
    #[must_use]
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Set the command execution timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Get the total time allowed for a full connection (TCP + login).
    #[must_use]
    pub fn total_connect_timeout(&self) -> Duration {
        self.connect_timeout + self.login_timeout
    }
}

/// Connection configuration.
///
/// Use [`Config::new()`] with the builder methods, or
/// [`Config::from_connection_string()`].
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port (default: 1433).
    pub port: u16,
    /// Database selected after login.
    pub database: Option<String>,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Application name reported to the server.
    pub application_name: String,
    /// Client machine name reported to the server.
    pub client_hostname: String,
    /// Requested packet size.
    pub packet_size: u16,
    /// Requested TDS protocol version.
    pub tds_version: TdsVersion,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: None,
            username: String::new(),
            password: String::new(),
            application_name: "tds-client".to_string(),
            client_hostname: local_hostname(),
            packet_size: 4096,
            tds_version: TdsVersion::V7_4,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("application_name", &self.application_name)
            .field("packet_size", &self.packet_size)
            .field("tds_version", &self.tds_version)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a configuration for `server`.
    ///
    /// Accepts `host`, `host:port` and `host,port`.
    pub fn new(server: &str) -> Result<Self> {
        let (host, port) = parse_server(server)?;
        Ok(Self {
            host,
            port: port.unwrap_or(DEFAULT_PORT),
            ..Self::default()
        })
    }

    /// Parse an ADO-style connection string.
    ///
    /// Keys are case-insensitive; unknown keys are logged and ignored.
    ///
    /// ```
    /// use tds_client::Config;
    ///
    /// let config = Config::from_connection_string(
    ///     "Server=db.local,1444;Database=sales;User Id=app;Password=secret",
    /// )
    /// .unwrap();
    /// assert_eq!(config.port, 1444);
    /// assert_eq!(config.database.as_deref(), Some("sales"));
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" | "address" => {
                    let (host, port) = parse_server(value)?;
                    config.host = host;
                    if let Some(port) = port {
                        config.port = port;
                    }
                }
                "port" => config.port = parse_number(&key, value)?,
                "database" | "initial catalog" => {
                    config.database = Some(value.to_string()).filter(|d| !d.is_empty());
                }
                "user id" | "uid" | "user" => config.username = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "application name" | "app" => config.application_name = value.to_string(),
                "workstation id" | "wsid" => config.client_hostname = value.to_string(),
                "connect timeout" | "connection timeout" | "timeout" => {
                    let secs: u64 = parse_number(&key, value)?;
                    config.timeouts.connect_timeout = Duration::from_secs(secs);
                    config.timeouts.login_timeout = Duration::from_secs(secs);
                }
                "command timeout" => {
                    let secs: u64 = parse_number(&key, value)?;
                    config.timeouts.command_timeout = Duration::from_secs(secs);
                }
                "packet size" => config.packet_size = parse_number(&key, value)?,
                _ => {
                    tracing::warn!(key = %key, "ignoring unknown connection string key");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the server would refuse.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("server host is empty".into()));
        }
        if !(MIN_PACKET_SIZE as u16..=MAX_LOGIN_PACKET_SIZE).contains(&self.packet_size) {
            return Err(Error::Config(format!(
                "packet size {} outside {MIN_PACKET_SIZE}..={MAX_LOGIN_PACKET_SIZE}",
                self.packet_size
            )));
        }
        Ok(())
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database selected after login. An empty name selects none.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into()).filter(|d| !d.is_empty());
        self
    }

    /// Set SQL credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the requested TDS version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Set connect and login timeouts together.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self.timeouts.login_timeout = timeout;
        self
    }

    /// Set the command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.command_timeout = timeout;
        self
    }

    /// Set all timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }
}

fn parse_server(server: &str) -> Result<(String, Option<u16>)> {
    let server = server.trim();
    let server = server.strip_prefix("tcp:").unwrap_or(server);

    let split = server
        .rsplit_once(',')
        .or_else(|| server.rsplit_once(':').filter(|(host, _)| !host.contains(':')));

    match split {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {port}")))?;
            Ok((host.trim().to_string(), Some(port)))
        }
        None => Ok((server.to_string(), None)),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for '{key}': {value}")))
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default()
}
