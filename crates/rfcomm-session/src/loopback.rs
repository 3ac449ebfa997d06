//! In-memory duplex link.
//!
//! [`pair`] returns a host-side [`LoopbackTransport`] and the device-side
//! [`LoopbackStream`]. Every `write` on one side arrives as one chunk on the
//! other side, so tests control exactly how a response is split up. An
//! empty chunk on the wire marks end of stream.

use std::io::{self, Read, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::SessionError;
use crate::transport::{Link, LinkCloser, Transport};

/// Create a connected host/device pair.
pub fn pair() -> (LoopbackTransport, LoopbackStream) {
    let (to_device, device_rx) = crossbeam_channel::unbounded();
    let (to_host, host_rx) = crossbeam_channel::unbounded();

    let host = LoopbackStream::new(host_rx, to_device.clone(), to_host.clone());
    let device = LoopbackStream::new(device_rx, to_host, to_device);
    (LoopbackTransport { host: Some(host) }, device)
}

/// Host side of a loopback pair. Connects exactly once.
#[derive(Debug)]
pub struct LoopbackTransport {
    host: Option<LoopbackStream>,
}

impl Transport for LoopbackTransport {
    fn connect(&mut self) -> Result<Link, SessionError> {
        let host = self.host.take().ok_or_else(|| SessionError::Connect {
            peer: "loopback".into(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "loopback already connected"),
        })?;
        let (reader, writer, closer) = host.split();
        Ok(Link {
            peer: "loopback".into(),
            reader: Box::new(reader),
            writer: Box::new(writer),
            closer: Box::new(closer),
        })
    }
}

/// One end of a loopback pair.
#[derive(Debug)]
pub struct LoopbackStream {
    reader: LoopbackReader,
    writer: LoopbackWriter,
    closer: LoopbackCloser,
}

impl LoopbackStream {
    fn new(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>, own: Sender<Vec<u8>>) -> Self {
        LoopbackStream {
            reader: LoopbackReader {
                rx,
                leftover: Vec::new(),
                eof: false,
            },
            closer: LoopbackCloser {
                own,
                peer: tx.clone(),
            },
            writer: LoopbackWriter { tx },
        }
    }

    /// Separate the halves so they can live on different threads.
    pub fn split(self) -> (LoopbackReader, LoopbackWriter, LoopbackCloser) {
        (self.reader, self.writer, self.closer)
    }

    /// Wait up to `timeout` for the next chunk. See
    /// [`LoopbackReader::recv_chunk`].
    pub fn recv_chunk(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        self.reader.recv_chunk(timeout)
    }

    /// Close both directions.
    pub fn close(&self) {
        self.closer.close();
    }
}

impl Read for LoopbackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for LoopbackStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Receive half.
#[derive(Debug)]
pub struct LoopbackReader {
    rx: Receiver<Vec<u8>>,
    leftover: Vec<u8>,
    eof: bool,
}

impl LoopbackReader {
    /// Wait up to `timeout` for the next chunk, as it was written.
    /// Returns `None` on timeout or end of stream.
    pub fn recv_chunk(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        if !self.leftover.is_empty() {
            return Some(std::mem::take(&mut self.leftover));
        }
        if self.eof {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) if !chunk.is_empty() => Some(chunk),
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                self.eof = true;
                None
            }
            Err(RecvTimeoutError::Timeout) => None,
        }
    }
}

impl Read for LoopbackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.leftover.is_empty() && !self.eof {
            match self.rx.recv() {
                Ok(chunk) if !chunk.is_empty() => self.leftover = chunk,
                _ => self.eof = true,
            }
        }
        if self.leftover.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }
}

/// Send half. Dropping it ends the peer's stream.
#[derive(Debug)]
pub struct LoopbackWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for LoopbackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer is gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LoopbackWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(Vec::new());
    }
}

/// Ends both directions of one side.
#[derive(Debug, Clone)]
pub struct LoopbackCloser {
    own: Sender<Vec<u8>>,
    peer: Sender<Vec<u8>>,
}

impl LinkCloser for LoopbackCloser {
    fn close(&self) {
        let _ = self.own.send(Vec::new());
        let _ = self.peer.send(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(500);

    #[test]
    fn test_chunks_preserved() {
        let (mut transport, mut device) = pair();
        let mut link = transport.connect().unwrap();

        device.write_all(&[1, 2]).unwrap();
        device.write_all(&[3, 4]).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(link.reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(link.reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);

        link.writer.write_all(&[0x82, 0, 0]).unwrap();
        assert_eq!(device.recv_chunk(WAIT), Some(vec![0x82, 0, 0]));
    }

    #[test]
    fn test_small_buffer_reads_leftover() {
        let (mut transport, mut device) = pair();
        let mut link = transport.connect().unwrap();
        device.write_all(&[1, 2, 3]).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(link.reader.read(&mut buf).unwrap(), 2);
        assert_eq!(link.reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn test_connect_once() {
        let (mut transport, _device) = pair();
        assert!(transport.connect().is_ok());
        assert!(matches!(
            transport.connect(),
            Err(SessionError::Connect { .. })
        ));
    }

    #[test]
    fn test_closer_unblocks_both_readers() {
        let (mut transport, mut device) = pair();
        let mut link = transport.connect().unwrap();
        link.closer.close();

        let mut buf = [0u8; 4];
        assert_eq!(link.reader.read(&mut buf).unwrap(), 0);
        assert_eq!(device.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_dropping_writer_ends_peer_stream() {
        let (mut transport, device) = pair();
        let mut link = transport.connect().unwrap();
        drop(device);

        let mut buf = [0u8; 4];
        assert_eq!(link.reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_recv_chunk_timeout() {
        let (_transport, mut device) = pair();
        assert_eq!(device.recv_chunk(Duration::from_millis(10)), None);
    }
}
