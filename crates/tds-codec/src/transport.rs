//! Byte-stream transport abstraction.
//!
//! The engine needs four things from its transport: open, send, receive,
//! close. [`Connector`] opens, [`Transport`] does the rest. The TCP
//! implementation uses blocking `std::net` sockets with timeouts; tests plug
//! in an in-memory transport instead.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;

use crate::error::CodecError;

/// Size of a single receive.
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

/// A connected, blocking byte stream.
pub trait Transport: Send {
    /// Write all of `data`.
    fn send(&mut self, data: &[u8]) -> Result<(), CodecError>;

    /// Read whatever is available, blocking until at least one byte arrives.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream.
    fn receive(&mut self) -> Result<Option<Bytes>, CodecError>;

    /// Bound how long [`receive`](Self::receive) may block.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), CodecError>;

    /// Release the stream. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), CodecError>;

    /// Check whether [`close`](Self::close) has run.
    fn is_closed(&self) -> bool;
}

/// Opens transports.
pub trait Connector {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Connect to `host:port` within `timeout`; zero waits indefinitely.
    fn open(&self, host: &str, port: u16, timeout: Duration)
    -> Result<Self::Transport, CodecError>;
}

/// Connector for plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn open(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpTransport, CodecError> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            tracing::debug!(%addr, "connecting");
            let attempt = if timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, timeout)
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(TcpTransport::new(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => e.into(),
            None => CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {host}:{port}"),
            )),
        })
    }
}

/// Blocking TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    closed: bool,
    buf: Box<[u8]>,
}

impl TcpTransport {
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            closed: false,
            buf: vec![0u8; RECEIVE_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    fn ensure_open(&self) -> Result<(), CodecError> {
        if self.closed {
            return Err(CodecError::TransportClosed);
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.ensure_open()?;
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Bytes>, CodecError> {
        self.ensure_open()?;
        loop {
            match self.stream.read(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(Bytes::copy_from_slice(&self.buf[..n]))),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), CodecError> {
        self.ensure_open()?;
        // A zero duration is rejected by the socket API.
        let timeout = timeout.filter(|t| !t.is_zero());
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), CodecError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already torn down by the peer
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_send_receive_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let mut transport = TcpConnector
            .open("127.0.0.1", port, Duration::from_secs(5))
            .unwrap();
        transport.send(b"ping").unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 4 {
            echoed.extend_from_slice(&transport.receive().unwrap().unwrap());
        }
        assert_eq!(echoed, b"ping");

        server.join().unwrap();
        assert_eq!(transport.receive().unwrap(), None);

        transport.close().unwrap();
        transport.close().unwrap();
        assert!(transport.is_closed());
        assert!(matches!(transport.send(b"x"), Err(CodecError::TransportClosed)));
    }

    #[test]
    fn test_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = thread::spawn(move || {
            let (_socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let mut transport = TcpConnector
            .open("127.0.0.1", port, Duration::from_secs(5))
            .unwrap();
        transport
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        assert!(transport.receive().unwrap_err().is_timeout());
    }

    #[test]
    fn test_zero_connect_timeout_waits_indefinitely() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"ok").unwrap();
        });

        let mut transport = TcpConnector.open("127.0.0.1", port, Duration::ZERO).unwrap();
        transport.set_read_timeout(Some(Duration::ZERO)).unwrap();

        let mut received = Vec::new();
        while received.len() < 2 {
            received.extend_from_slice(&transport.receive().unwrap().unwrap());
        }
        assert_eq!(received, b"ok");
        server.join().unwrap();
    }
}
