//! # tds-client
//!
//! Synchronous client for servers speaking the Tabular Data Stream protocol
//! (Sybase, Microsoft SQL Server).
//!
//! The client logs in with plain credentials, sends SQL batches and decodes
//! the typed result stream into rows of text-rendered cells. Every call
//! blocks; there are no background threads.
//!
//! ## Session States
//!
//! ```text
//! Disconnected -> LoggingIn -> Ready -> Executing -> FetchingResults -> Ready
//!                                  \_____________________________/
//!                                    decode / transport / cancel
//!                                              |
//!                                         ErrorState -> Closed
//! ```
//!
//! A batch the server rejects is not a session failure: the error is
//! reported once the response has been drained and the connection stays
//! `Ready`. Malformed data, transport loss, timeouts and cancellation leave
//! the connection in `ErrorState`, from which only `close` is valid.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tds_client::{Config, Connection};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "Server=localhost,1433;Database=test;User Id=sa;Password=Password123;",
//!     )?;
//!     let mut conn = Connection::open(&config)?;
//!
//!     let batch = conn.execute("SELECT id, name FROM users")?;
//!     for row in batch.rows() {
//!         let id: Option<i32> = row.try_get("id")?;
//!         println!("{id:?} {:?}", row.get(1));
//!     }
//!
//!     if let Some(diag) = conn.last_diagnostic() {
//!         println!("last message: {diag}");
//!     }
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod from_row;
pub mod materializer;
pub mod row;
pub mod session;
pub mod shared;
pub mod state;
pub mod stream;
pub mod value;

pub use cancel::CancelToken;
pub use config::{Config, TimeoutConfig};
pub use connection::Connection;
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
pub use error::{Error, Result};
pub use from_row::{FromRow, MapRows, RowIteratorExt};
pub use materializer::{ResultBatch, ResultSet};
pub use row::{Column, ColumnIndex, ColumnType, Row};
pub use session::Environment;
pub use shared::SharedConnection;
pub use state::SessionState;
pub use stream::RowStream;
pub use tds_codec::{Connector, TcpConnector, TcpTransport, Transport};
pub use value::Value;
