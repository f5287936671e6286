//! In-memory transport.
//!
//! [`MockConnector`] opens [`MockTransport`]s that answer requests
//! synchronously: every `send` runs the complete messages it finishes
//! through a [`ServerSession`] and queues the reply for `receive`. No
//! sockets or threads are involved, so tests are deterministic.
//!
//! A [`MockHandle`] shared with every opened transport counts opens and
//! closes and keeps the raw packets in both directions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tds_codec::{CodecError, Connector, MessageAssembler, TdsCodec, Transport};
use tokio_util::codec::Decoder;

use crate::handler::{Action, MockServerConfig, Request, RequestLog, ServerSession};

/// Raw bytes that crossed a mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPacket {
    /// Direction (true = server to client).
    pub from_server: bool,
    /// Raw bytes including packet headers.
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct HandleInner {
    opened: AtomicUsize,
    closed: AtomicUsize,
    packets: Mutex<Vec<RecordedPacket>>,
    log: Arc<RequestLog>,
}

/// Observer shared by a connector and its transports.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    inner: Arc<HandleInner>,
}

impl MockHandle {
    /// Transports opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Transports closed; each transport counts once.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Requests the server side received.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.inner.log.requests()
    }

    /// SQL text of every batch.
    #[must_use]
    pub fn sql_batches(&self) -> Vec<String> {
        self.inner.log.sql_batches()
    }

    /// ATTENTION signals received.
    #[must_use]
    pub fn attention_count(&self) -> usize {
        self.inner.log.attention_count()
    }

    /// Request log.
    #[must_use]
    pub fn log(&self) -> &RequestLog {
        &self.inner.log
    }

    /// Raw traffic in both directions.
    #[must_use]
    pub fn packets(&self) -> Vec<RecordedPacket> {
        self.inner.packets.lock().clone()
    }

    fn record(&self, from_server: bool, data: Bytes) {
        self.inner
            .packets
            .lock()
            .push(RecordedPacket { from_server, data });
    }
}

/// Opens in-memory transports backed by a mock server configuration.
#[derive(Debug, Clone)]
pub struct MockConnector {
    config: Arc<MockServerConfig>,
    handle: MockHandle,
    refuse: bool,
    chunk_size: usize,
}

impl MockConnector {
    /// Connector for `config`.
    #[must_use]
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            handle: MockHandle::default(),
            refuse: false,
            chunk_size: usize::MAX,
        }
    }

    /// Fail every `open` as if nothing listened.
    #[must_use]
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Deliver replies in reads of at most `size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Observer of the transports this connector opens.
    #[must_use]
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn open(&self, host: &str, port: u16, _timeout: Duration) -> Result<MockTransport, CodecError> {
        if self.refuse {
            return Err(CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection to {host}:{port} refused"),
            )));
        }
        self.handle.inner.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(host, port, "mock transport opened");
        Ok(MockTransport {
            session: ServerSession::new(
                Arc::clone(&self.config),
                Arc::clone(&self.handle.inner.log),
            ),
            handle: self.handle.clone(),
            codec: TdsCodec::new(),
            assembler: MessageAssembler::new(),
            inbound: BytesMut::new(),
            outbound: VecDeque::new(),
            read_timeout: None,
            chunk_size: self.chunk_size,
            hung_up: false,
            closed: false,
        })
    }
}

/// Client end of an in-memory connection.
#[derive(Debug)]
pub struct MockTransport {
    session: ServerSession,
    handle: MockHandle,
    codec: TdsCodec,
    assembler: MessageAssembler,
    inbound: BytesMut,
    outbound: VecDeque<Action>,
    read_timeout: Option<Duration>,
    chunk_size: usize,
    hung_up: bool,
    closed: bool,
}

impl MockTransport {
    /// Observer shared with the connector.
    #[must_use]
    pub fn handle(&self) -> &MockHandle {
        &self.handle
    }

    fn ensure_open(&self) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::TransportClosed);
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.ensure_open()?;
        if self.hung_up {
            return Err(CodecError::ConnectionClosed);
        }
        self.handle.record(false, Bytes::copy_from_slice(data));
        self.inbound.extend_from_slice(data);

        while let Some(packet) = self.codec.decode(&mut self.inbound)? {
            let Some(message) = self.assembler.push(packet) else {
                continue;
            };
            let actions = self
                .session
                .handle(&message)
                .map_err(|e| CodecError::Io(std::io::Error::other(e.to_string())))?;
            self.outbound.extend(actions);
        }
        Ok(())
    }

    /// Pop the next queued reply bytes.
    ///
    /// A read with nothing queued reports a timeout instead of blocking.
    fn receive(&mut self) -> Result<Option<Bytes>, CodecError> {
        self.ensure_open()?;
        loop {
            let Some(action) = self.outbound.pop_front() else {
                if self.hung_up {
                    return Ok(None);
                }
                return Err(CodecError::Timeout);
            };

            match action {
                Action::Write(mut data) => {
                    if data.len() > self.chunk_size {
                        let rest = data.split_off(self.chunk_size);
                        self.outbound.push_front(Action::Write(rest));
                    }
                    if data.is_empty() {
                        continue;
                    }
                    self.handle.record(true, data.clone());
                    return Ok(Some(data));
                }
                Action::Sleep(delay) => match self.read_timeout {
                    Some(timeout) if timeout < delay => {
                        thread::sleep(timeout);
                        self.outbound.push_front(Action::Sleep(delay - timeout));
                        return Err(CodecError::Timeout);
                    }
                    _ => thread::sleep(delay),
                },
                Action::Hangup => {
                    self.hung_up = true;
                    self.outbound.clear();
                    return Ok(None);
                }
            }
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), CodecError> {
        self.ensure_open()?;
        self.read_timeout = timeout.filter(|t| !t.is_zero());
        Ok(())
    }

    fn close(&mut self) -> Result<(), CodecError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.handle.inner.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::responses::MockResponse;
    use crate::tokens::prelogin_response;
    use tds_codec::MessageStream;
    use tds_protocol::{EncryptionLevel, PacketType, PreLogin};

    fn connector() -> MockConnector {
        MockConnector::new(MockServerConfig {
            default_response: MockResponse::scalar_int(1).hangup_after(12),
            ..Default::default()
        })
    }

    #[test]
    fn test_prelogin_round_trip() {
        let connector = connector();
        let transport = connector
            .open("mock", 1433, Duration::from_secs(1))
            .unwrap();
        let mut stream = MessageStream::new(transport);
        stream
            .send_message(PacketType::PreLogin, PreLogin::new().encode())
            .unwrap();
        let reply = stream.read_message().unwrap().unwrap();
        assert_eq!(reply.payload, prelogin_response(EncryptionLevel::NotSupported));

        let handle = connector.handle();
        assert_eq!(handle.open_count(), 1);
        assert!(matches!(handle.requests()[0], Request::PreLogin(_)));
        let packets = handle.packets();
        assert!(!packets[0].from_server);
        assert!(packets[1].from_server);
    }

    #[test]
    fn test_chunked_delivery() {
        let connector = connector().with_chunk_size(3);
        let transport = connector.open("mock", 1433, Duration::ZERO).unwrap();
        let mut stream = MessageStream::new(transport);
        stream
            .send_message(PacketType::PreLogin, PreLogin::new().encode())
            .unwrap();
        assert!(stream.read_message().unwrap().is_some());
        assert!(
            stream
                .transport()
                .handle()
                .packets()
                .iter()
                .filter(|p| p.from_server)
                .all(|p| p.data.len() <= 3)
        );
    }

    #[test]
    fn test_empty_queue_times_out() {
        let mut transport = connector().open("mock", 1433, Duration::ZERO).unwrap();
        assert!(matches!(transport.receive(), Err(CodecError::Timeout)));
    }

    #[test]
    fn test_close_counts_once() {
        let connector = connector();
        let mut transport = connector.open("mock", 1433, Duration::ZERO).unwrap();
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(transport.is_closed());
        assert_eq!(connector.handle().close_count(), 1);
        assert!(matches!(
            transport.send(b"x"),
            Err(CodecError::TransportClosed)
        ));
    }

    #[test]
    fn test_refusing_connector() {
        let connector = connector().refusing();
        assert!(connector.open("mock", 1433, Duration::ZERO).is_err());
        assert_eq!(connector.handle().open_count(), 0);
    }
}
