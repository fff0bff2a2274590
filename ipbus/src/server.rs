//! Network front ends for an [`Endpoint`].
//!
//! One endpoint is shared by every client, so all of them see the same register space. Each
//! request packet is processed under the endpoint lock, which keeps packets from different
//! clients from interleaving.
//!
//! Over TCP every packet is framed by a 32-bit big-endian byte count. Over UDP each datagram is
//! one packet.

use crate::endpoint::{
    Endpoint,
    Memory,
};
use std::{
    io::{
        self,
        Read,
        Write,
    },
    net::{
        TcpListener,
        TcpStream,
        UdpSocket,
    },
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    thread,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Connections beyond this are refused
pub const MAX_CLIENTS: usize = 50;

/// Largest request frame accepted over TCP, anything bigger drops the connection
pub const MAX_FRAME: usize = 512 * 1024;

/// Serves one endpoint to any number of clients
#[derive(Debug)]
pub struct Server<M> {
    endpoint: Arc<Mutex<Endpoint<M>>>,
    clients: Arc<AtomicUsize>,
}

impl<M> Clone for Server<M> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            clients: Arc::clone(&self.clients),
        }
    }
}

impl<M> Server<M>
where
    M: Memory + Send + 'static,
{
    #[must_use]
    pub fn new(memory: M) -> Self {
        Self {
            endpoint: Arc::new(Mutex::new(Endpoint::new(memory))),
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The shared endpoint, e.g. to inspect or preload its memory
    #[must_use]
    pub fn endpoint(&self) -> Arc<Mutex<Endpoint<M>>> {
        Arc::clone(&self.endpoint)
    }

    /// Number of TCP clients currently connected
    #[must_use]
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    fn process(&self, packet: &[u8]) -> io::Result<Vec<u8>> {
        let mut endpoint = self
            .endpoint
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Endpoint lock poisoned"))?;
        Ok(endpoint.process(packet))
    }

    /// Accept TCP clients forever, serving each from its own thread
    /// # Errors
    /// Returns an error if the listener fails
    pub fn serve_tcp(&self, listener: &TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "Serving IPbus over TCP");
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(%e, "Failed to accept a client");
                    continue;
                }
            };
            if self.clients() >= MAX_CLIENTS {
                warn!("Too many clients, refusing connection");
                continue;
            }
            self.clients.fetch_add(1, Ordering::SeqCst);
            let server = self.clone();
            thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                debug!(?peer, "Client connected");
                if let Err(e) = server.serve_client(stream) {
                    debug!(?peer, %e, "Client connection failed");
                }
                server.clients.fetch_sub(1, Ordering::SeqCst);
                debug!(?peer, "Client disconnected");
            });
        }
        Ok(())
    }

    fn serve_client(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        loop {
            let mut len = [0u8; 4];
            match stream.read_exact(&mut len) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }
            let len = u32::from_be_bytes(len) as usize;
            if len > MAX_FRAME {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Request frame of {len} bytes"),
                ));
            }
            let mut packet = vec![0u8; len];
            stream.read_exact(&mut packet)?;
            let reply = self.process(&packet)?;
            let reply_len = u32::try_from(reply.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Reply too large"))?;
            let mut frame = Vec::with_capacity(reply.len() + 4);
            frame.extend_from_slice(&reply_len.to_be_bytes());
            frame.extend_from_slice(&reply);
            stream.write_all(&frame)?;
        }
    }

    /// Answer UDP datagrams forever. Packets the endpoint drops get no reply.
    /// # Errors
    /// Returns an error if the socket fails
    pub fn serve_udp(&self, socket: &UdpSocket) -> io::Result<()> {
        info!(addr = %socket.local_addr()?, "Serving IPbus over UDP");
        let mut buf = vec![0u8; 65_507];
        loop {
            let (n, peer) = socket.recv_from(&mut buf)?;
            let reply = self.process(&buf[..n])?;
            if reply.is_empty() {
                debug!(%peer, "No reply for datagram");
                continue;
            }
            socket.send_to(&reply, peer)?;
        }
    }
}
