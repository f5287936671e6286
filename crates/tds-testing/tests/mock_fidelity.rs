//! Mock TDS server fidelity tests.
//!
//! Drive the TCP mock with the raw framing layer and check that its replies
//! parse the way a real server's would.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use tds_codec::{Connector, MessageStream, TcpConnector, TcpTransport};
use tds_protocol::{
    EncryptionLevel, Login7, PacketType, PreLogin, TdsVersion, Token, TokenParser,
    encode_sql_batch,
};
use tds_testing::{MockColumn, MockResponse, MockTdsServer, Request, ScalarValue};

fn connect(server: &MockTdsServer) -> MessageStream<TcpTransport> {
    let transport = TcpConnector
        .open(&server.host(), server.port(), Duration::from_secs(5))
        .unwrap();
    MessageStream::new(transport)
}

fn handshake(stream: &mut MessageStream<TcpTransport>) -> Vec<Token> {
    stream
        .send_message(PacketType::PreLogin, PreLogin::new().encode())
        .unwrap();
    let reply = stream.read_message().unwrap().unwrap();
    let prelogin = PreLogin::decode(&reply.payload).unwrap();
    assert_eq!(prelogin.encryption, EncryptionLevel::NotSupported);

    let login = Login7::new().with_sql_auth("sa", "secret").with_packet_size(8192);
    stream
        .send_message(PacketType::Tds7Login, login.encode())
        .unwrap();
    tokens(stream)
}

fn tokens(stream: &mut MessageStream<TcpTransport>) -> Vec<Token> {
    let reply = stream.read_message().unwrap().unwrap();
    assert_eq!(reply.packet_type, PacketType::TabularResult);
    let mut parser = TokenParser::new(reply.payload);
    let mut meta = None;
    let mut out = Vec::new();
    while let Some(token) = parser.next_token(meta.as_ref()).unwrap() {
        if let Token::ColMetaData(m) = &token {
            meta = Some(m.clone());
        }
        out.push(token);
    }
    out
}

fn batch(stream: &mut MessageStream<TcpTransport>, sql: &str) -> Vec<Token> {
    stream
        .send_message(PacketType::SqlBatch, encode_sql_batch(sql))
        .unwrap();
    tokens(stream)
}

#[test]
fn test_server_starts_and_stops() {
    let server = MockTdsServer::builder().build().unwrap();
    assert!(server.port() > 0);
    assert_eq!(server.host(), "127.0.0.1");
    assert_eq!(server.connection_count(), 0);

    server.stop();
    assert!(server.is_stopped());
    server.stop();
}

#[test]
fn test_login_reply() {
    let server = MockTdsServer::builder()
        .with_server_name("FidelityTest")
        .with_database("testdb")
        .build()
        .unwrap();
    let mut stream = connect(&server);
    let tokens = handshake(&mut stream);

    let ack = tokens
        .iter()
        .find_map(|t| match t {
            Token::LoginAck(ack) => Some(ack),
            _ => None,
        })
        .unwrap();
    assert_eq!(ack.prog_name, "FidelityTest");
    assert_eq!(ack.tds_version, TdsVersion::V7_4);

    let database = tokens.iter().find_map(|t| match t {
        Token::EnvChange(env) => env.new_database(),
        _ => None,
    });
    assert_eq!(database, Some("testdb"));

    let packet_size = tokens.iter().find_map(|t| match t {
        Token::EnvChange(env) => env.new_packet_size(),
        _ => None,
    });
    assert_eq!(packet_size, Some(8192));
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if done.is_final()));

    let logins = server.log().logins();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].password, "secret");
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_rejected_credentials() {
    let server = MockTdsServer::builder()
        .with_credentials("app", "right")
        .build()
        .unwrap();
    let mut stream = connect(&server);
    let tokens = handshake(&mut stream);

    assert!(matches!(&tokens[0], Token::Error(msg) if msg.number == 18456));
    assert!(!tokens.iter().any(|t| matches!(t, Token::LoginAck(_))));
}

#[test]
fn test_rows_reply() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT id, name FROM users",
            MockResponse::rows(
                vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
                vec![
                    vec![ScalarValue::Int(1), ScalarValue::from("Alice")],
                    vec![ScalarValue::Int(2), ScalarValue::Null],
                ],
            ),
        )
        .build()
        .unwrap();
    let mut stream = connect(&server);
    handshake(&mut stream);

    let tokens = batch(&mut stream, "select id, name from users");
    let rows: Vec<_> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Row(row) => Some(row),
            _ => None,
        })
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].values[1], None);
    assert!(matches!(tokens.last(), Some(Token::Done(done)) if done.row_count == 2));

    assert_eq!(server.log().sql_batches(), ["select id, name from users"]);
}

#[test]
fn test_use_unknown_database() {
    let server = MockTdsServer::builder()
        .with_databases(["sales"])
        .build()
        .unwrap();
    let mut stream = connect(&server);
    handshake(&mut stream);

    let tokens = batch(&mut stream, "USE [sales]");
    assert!(tokens
        .iter()
        .any(|t| matches!(t, Token::EnvChange(env) if env.new_database() == Some("sales"))));

    let tokens = batch(&mut stream, "USE [archive]");
    assert!(matches!(&tokens[0], Token::Error(msg) if msg.number == 911));
}

#[test]
fn test_attention_is_acknowledged() {
    let server = MockTdsServer::builder().build().unwrap();
    let mut stream = connect(&server);
    handshake(&mut stream);

    stream.send_attention().unwrap();
    let tokens = tokens(&mut stream);
    assert!(matches!(
        &tokens[0],
        Token::Done(done) if done.status.contains(tds_protocol::DoneStatus::ATTN)
    ));
    assert!(server.log().requests().contains(&Request::Attention));
}

#[test]
fn test_hangup_mid_reply() {
    let server = MockTdsServer::builder()
        .with_default_response(MockResponse::scalar_int(7).hangup_after(20))
        .build()
        .unwrap();
    let mut stream = connect(&server);
    handshake(&mut stream);

    stream
        .send_message(PacketType::SqlBatch, encode_sql_batch("SELECT 7"))
        .unwrap();
    let packet = stream.read_packet();
    assert!(packet.is_err(), "expected a cut packet, got {packet:?}");
}
