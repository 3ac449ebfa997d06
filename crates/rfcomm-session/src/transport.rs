//! Byte-stream transports.
//!
//! A [`Transport`] produces a [`Link`]: independent read and write halves
//! plus a closer that can unblock a reader stuck in `read` from another
//! thread.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::DEFAULT_CONNECT_TIMEOUT_MS;
use crate::error::SessionError;

/// Shuts a link down from any thread.
pub trait LinkCloser: Send {
    /// Close both directions. Blocked reads return EOF or an error.
    fn close(&self);
}

/// An established duplex byte stream.
pub struct Link {
    /// Human-readable peer identity, used in logs and metric labels.
    pub peer: String,
    /// Receive half.
    pub reader: Box<dyn Read + Send>,
    /// Send half.
    pub writer: Box<dyn Write + Send>,
    /// Closes the link.
    pub closer: Box<dyn LinkCloser>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Something that can open a [`Link`] to the device.
pub trait Transport {
    /// Establish the link.
    fn connect(&mut self) -> Result<Link, SessionError>;
}

// ============================================================================
// TCP
// ============================================================================

/// A TCP byte stream, e.g. a serial-over-TCP bridge or the simulator.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Transport for `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    /// Override the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn open(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        }))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<Link, SessionError> {
        let connect_err = |source| SessionError::Connect {
            peer: self.addr.clone(),
            source,
        };
        let stream = self.open().map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.addr.clone());
        let reader = stream.try_clone().map_err(connect_err)?;
        let closer = stream.try_clone().map_err(connect_err)?;

        Ok(Link {
            peer,
            reader: Box::new(reader),
            writer: Box::new(stream),
            closer: Box::new(TcpCloser(closer)),
        })
    }
}

struct TcpCloser(TcpStream);

impl LinkCloser for TcpCloser {
    fn close(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_connect_and_exchange_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut transport = TcpTransport::new(addr.to_string());
        let mut link = transport.connect().unwrap();
        let (mut server, _) = listener.accept().unwrap();

        link.writer.write_all(&[0x02]).unwrap();
        let mut buf = [0u8; 1];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x02]);

        server.write_all(&[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        link.reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        link.closer.close();
        let mut buf = [0u8; 1];
        assert_eq!(link.reader.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport =
            TcpTransport::new(addr.to_string()).with_connect_timeout(Duration::from_millis(200));
        match transport.connect() {
            Err(SessionError::Connect { peer, .. }) => assert_eq!(peer, addr.to_string()),
            other => panic!("expected connect error, got {:?}", other),
        }
    }
}
