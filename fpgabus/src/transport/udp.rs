//! IPbus over UDP, one packet per datagram
use super::{
    classify,
    Error,
    Transport,
    TransportResult,
    DEFAULT_TIMEOUT,
};
use std::{
    net::{
        ToSocketAddrs,
        UdpSocket,
    },
    time::Duration,
};
use tracing::trace;

/// IPbus packets never come close to this, it's just the largest datagram UDP can carry
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug)]
pub struct Udp {
    socket: UdpSocket,
}

impl Udp {
    /// Create and connect a UDP transport
    /// # Errors
    /// Will return an error if the socket fails to bind or connect
    pub fn connect<A>(host: A) -> TransportResult<Self>
    where
        A: ToSocketAddrs,
    {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(Error::from)?;
        socket.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        socket.set_write_timeout(Some(DEFAULT_TIMEOUT))?;
        socket.connect(host)?;
        Ok(Self { socket })
    }
}

impl Transport for Udp {
    fn send(&mut self, packet: &[u8]) -> TransportResult<()> {
        if packet.len() > MAX_DATAGRAM {
            return Err(Error::Frame(packet.len()));
        }
        trace!(bytes = packet.len(), "Sending datagram");
        self.socket.send(packet).map_err(classify)?;
        Ok(())
    }

    fn receive(&mut self) -> TransportResult<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = self.socket.recv(&mut buf).map_err(classify)?;
        buf.truncate(n);
        trace!(bytes = n, "Received datagram");
        Ok(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.socket.set_read_timeout(Some(timeout))?;
        self.socket.set_write_timeout(Some(timeout))?;
        Ok(())
    }
}
