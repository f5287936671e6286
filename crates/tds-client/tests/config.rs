//! Connection string parsing edge case tests.
//!
//! Tests edge cases that users commonly encounter with connection strings.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tds_client::{Config, Error};

// ============================================================================
// Basic Parsing Tests
// ============================================================================

#[test]
fn test_empty_connection_string() {
    // Empty string parses to defaults
    let config = Config::from_connection_string("").unwrap();
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 1433);
}

#[test]
fn test_semicolons_only() {
    assert!(Config::from_connection_string(";;;").is_ok());
    assert!(Config::from_connection_string("  ;  ").is_ok());
}

// ============================================================================
// Key-Value Edge Cases
// ============================================================================

#[test]
fn test_empty_server_is_rejected() {
    let result = Config::from_connection_string("Server=");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_missing_equals_sign() {
    assert!(Config::from_connection_string("Serverlocalhost;").is_err());
}

#[test]
fn test_value_containing_equals() {
    let config = Config::from_connection_string("Server=h;Password=a=b=c").unwrap();
    assert_eq!(config.password, "a=b=c");
}

#[test]
fn test_case_insensitive_keys() {
    let config = Config::from_connection_string("SERVER=h;user ID=app;PWD=x").unwrap();
    assert_eq!(config.username, "app");
    assert_eq!(config.password, "x");
}

#[test]
fn test_later_keys_override() {
    let config = Config::from_connection_string("Server=a;Server=b,1500").unwrap();
    assert_eq!(config.host, "b");
    assert_eq!(config.port, 1500);
}

#[test]
fn test_empty_database_keeps_default() {
    let config = Config::from_connection_string("Server=h;Database=").unwrap();
    assert_eq!(config.database, None);
}

// ============================================================================
// Server Forms
// ============================================================================

#[test]
fn test_server_forms() {
    for (input, host, port) in [
        ("Server=db", "db", 1433),
        ("Server=db,1500", "db", 1500),
        ("Server=db:1501", "db", 1501),
        ("Server=tcp:db,1502", "db", 1502),
        ("Data Source=10.1.2.3", "10.1.2.3", 1433),
        ("Address=db;Port=1600", "db", 1600),
    ] {
        let config = Config::from_connection_string(input).unwrap();
        assert_eq!(config.host, host, "{input}");
        assert_eq!(config.port, port, "{input}");
    }
}

#[test]
fn test_invalid_port() {
    assert!(Config::from_connection_string("Server=db,99999").is_err());
    assert!(Config::from_connection_string("Server=db;Port=-1").is_err());
}

// ============================================================================
// Timeouts And Sizes
// ============================================================================

#[test]
fn test_timeouts() {
    let config =
        Config::from_connection_string("Server=h;Connect Timeout=3;Command Timeout=0").unwrap();
    assert_eq!(config.timeouts.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.timeouts.login_timeout, Duration::from_secs(3));
    assert_eq!(config.timeouts.command_timeout, Duration::ZERO);
}

#[test]
fn test_packet_size_bounds() {
    assert!(Config::from_connection_string("Server=h;Packet Size=512").is_ok());
    assert!(Config::from_connection_string("Server=h;Packet Size=32767").is_ok());
    assert!(Config::from_connection_string("Server=h;Packet Size=511").is_err());
    assert!(Config::from_connection_string("Server=h;Packet Size=40000").is_err());
}

#[test]
fn test_builder_matches_connection_string() {
    let built = Config::new("db,1444")
        .unwrap()
        .database("sales")
        .credentials("app", "secret")
        .connect_timeout(Duration::from_secs(7));
    let parsed = Config::from_connection_string(
        "Server=db,1444;Database=sales;User Id=app;Password=secret;Connect Timeout=7",
    )
    .unwrap();
    assert_eq!(built, parsed);
}
