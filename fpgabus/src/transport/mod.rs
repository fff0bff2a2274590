//! Defines the packet transports that carry IPbus traffic to and from an endpoint

pub mod mock;
pub mod tcp;
pub mod udp;
pub mod uri;

use std::{
    io,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

/// How long to wait for a reply before giving up
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Internal system IO error")]
    Io(#[from] io::Error),
    #[error("Timed out waiting for the endpoint")]
    Timeout,
    #[error("The connection was closed")]
    Closed,
    #[error("Reply frame of {0} bytes is larger than we accept")]
    Frame(usize),
    #[error("Malformed connection string `{0}`")]
    BadUri(String),
    #[error("Unsupported protocol `{0}`")]
    UnsupportedScheme(String),
    #[error("Injected failure: {0}")]
    Mock(&'static str),
}

pub type TransportResult<T> = Result<T, Error>;

/// Unblocks a transport from another thread, typically by shutting its socket down
pub type Interrupter = Arc<dyn Fn() + Send + Sync>;

/// The trait implemented by every packet transport. One call to [`Transport::send`] carries one
/// whole request packet, one call to [`Transport::receive`] returns one whole reply packet.
pub trait Transport {
    /// Send a request packet
    /// # Errors
    /// Returns an error if the packet couldn't be sent
    fn send(&mut self, packet: &[u8]) -> TransportResult<()>;

    /// Block until a reply packet arrives or the timeout elapses
    /// # Errors
    /// Returns an error on timeout or connection failure
    fn receive(&mut self) -> TransportResult<Vec<u8>>;

    /// Set the send and receive timeouts
    /// # Errors
    /// Returns an error if the underlying socket rejects the timeout
    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()>;

    /// A handle that aborts a blocked `send` or `receive` from another thread, if supported
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

impl<T> Transport for Box<T>
where
    T: Transport + ?Sized,
{
    fn send(&mut self, packet: &[u8]) -> TransportResult<()> {
        (**self).send(packet)
    }

    fn receive(&mut self) -> TransportResult<Vec<u8>> {
        (**self).receive()
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        (**self).set_timeout(timeout)
    }

    fn interrupter(&self) -> Option<Interrupter> {
        (**self).interrupter()
    }
}

/// Sort socket errors into the cases callers care about
pub(crate) fn classify(e: io::Error) -> Error {
    match e.kind() {
        // Compat for both windows and *nix
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => Error::Closed,
        _ => Error::Io(e),
    }
}
