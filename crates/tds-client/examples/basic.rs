//! Connect, run a batch and print its rows.
//!
//! # Running
//!
//! ```bash
//! export TDS_HOST=localhost,1433
//! export TDS_DATABASE=testdb
//! export TDS_USER=sa
//! export TDS_PASSWORD=YourStrong@Passw0rd
//!
//! RUST_LOG=tds_client=debug cargo run --example basic -- "SELECT name FROM sys.databases"
//! ```
//!
//! The client does not encrypt, so the server must accept plaintext logins.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use tds_client::{Config, Connection, Error};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::var("TDS_HOST").unwrap_or_else(|_| "localhost".into());
    let database = std::env::var("TDS_DATABASE").unwrap_or_default();
    let user = std::env::var("TDS_USER").unwrap_or_else(|_| "sa".into());
    let password = std::env::var("TDS_PASSWORD").unwrap_or_else(|_| "Password123!".into());
    let sql = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "SELECT @@VERSION AS version".into());

    let config = Config::new(&host)?
        .credentials(user, password)
        .database(database)
        .application_name("tds-client-example")
        .command_timeout(Duration::from_secs(60));

    println!("Connecting to {host}...");
    let mut conn = Connection::open(&config)?;
    println!(
        "Connected to {} {} over {}",
        conn.environment().server_name,
        conn.environment().server_version,
        conn.protocol_version()
    );

    match conn.execute(&sql) {
        Ok(batch) => {
            for (i, set) in batch.result_sets().enumerate() {
                let header: Vec<_> = set.columns().iter().map(|c| c.name.as_str()).collect();
                println!("-- result set {i}: {}", header.join(" | "));
                for row in set.rows() {
                    let cells: Vec<_> = row.iter().map(ToString::to_string).collect();
                    println!("{}", cells.join(" | "));
                }
            }
            for message in batch.messages() {
                println!("{message}");
            }
            println!("rows affected: {:?}", batch.rows_affected());
        }
        // The batch failed but the connection is still usable
        Err(e @ Error::Server { .. }) => eprintln!("server rejected the batch: {e}"),
        Err(e) => return Err(e),
    }

    conn.close()
}
