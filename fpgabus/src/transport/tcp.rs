//! IPbus over TCP. Each packet travels as a 32-bit big-endian byte count followed by the packet.
//!
//! Bytes are buffered across receives, so a frame cut short by a timeout is completed by the next
//! receive instead of throwing the stream out of step.
use super::{
    classify,
    Error,
    Interrupter,
    Transport,
    TransportResult,
    DEFAULT_TIMEOUT,
};
use std::{
    io::{
        ErrorKind,
        Read,
        Write,
    },
    net::{
        Shutdown,
        TcpStream,
        ToSocketAddrs,
    },
    sync::Arc,
    time::Duration,
};
use tracing::{
    debug,
    trace,
};

/// Replies larger than this are treated as a framing error rather than allocated
pub const MAX_FRAME: usize = 1 << 20;

const READ_CHUNK: usize = 4096;

#[derive(Debug)]
/// A TCP connection to an endpoint
pub struct Tcp {
    stream: TcpStream,
    /// Received bytes not yet returned as a frame
    buffer: Vec<u8>,
}

impl Tcp {
    /// Create and connect to a TCP transport, trying every address `host` resolves to
    /// # Errors
    /// Will return an error if no address accepts the connection
    pub fn connect<A>(host: A) -> TransportResult<Self>
    where
        A: ToSocketAddrs,
    {
        let mut last_err = None;
        for addr in host.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, DEFAULT_TIMEOUT) {
                Ok(stream) => {
                    debug!(%addr, "Connected");
                    return Self::from_stream(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.map_or(Error::Closed, classify))
    }

    /// Wrap an already connected stream
    /// # Errors
    /// Returns an error if the socket options can't be set
    pub fn from_stream(stream: TcpStream) -> TransportResult<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        stream.set_write_timeout(Some(DEFAULT_TIMEOUT))?;
        Ok(Self {
            stream,
            buffer: vec![],
        })
    }

    /// Split the next complete frame off the front of the buffer
    fn take_frame(&mut self) -> TransportResult<Option<Vec<u8>>> {
        let Some(prefix) = self.buffer.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len > MAX_FRAME {
            return Err(Error::Frame(len));
        }
        if self.buffer.len() < len + 4 {
            return Ok(None);
        }
        let packet = self.buffer[4..len + 4].to_vec();
        self.buffer.drain(..len + 4);
        Ok(Some(packet))
    }
}

impl Transport for Tcp {
    fn send(&mut self, packet: &[u8]) -> TransportResult<()> {
        let len = u32::try_from(packet.len()).map_err(|_| Error::Frame(packet.len()))?;
        let mut frame = Vec::with_capacity(packet.len() + 4);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(packet);
        trace!(bytes = frame.len(), "Sending frame");
        self.stream.write_all(&frame).map_err(classify)
    }

    fn receive(&mut self) -> TransportResult<Vec<u8>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self.take_frame()? {
                trace!(bytes = packet.len(), "Received frame");
                return Ok(packet);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => {
                    if !self.buffer.is_empty() {
                        debug!(buffered = self.buffer.len(), "Receive stopped mid-frame");
                    }
                    return Err(classify(e));
                }
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let stream = self.stream.try_clone().ok()?;
        Some(Arc::new(move || {
            // Already-closed sockets are fine here
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }
}
