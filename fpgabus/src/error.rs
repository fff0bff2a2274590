use ipbus::InfoCode;
use thiserror::Error;

/// Everything that can go wrong building or dispatching a transaction
#[derive(Debug, Error)]
pub enum Error {
    #[error("Register `{0}` isn't in the address table")]
    UnknownRegister(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Register `{name}` doesn't allow {access}")]
    AccessDenied { name: String, access: &'static str },
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
    #[error("Malformed reply: {0}")]
    Protocol(String),
    #[error("The endpoint acknowledged {acknowledged} of {submitted} transactions")]
    PartialFailure {
        acknowledged: usize,
        submitted: usize,
    },
    #[error("Transaction {index} failed at the endpoint: {code}")]
    BusError { index: usize, code: InfoCode },
    #[error("The transaction was cancelled")]
    Cancelled,
    #[error("The transaction was aborted by a failed dispatch")]
    Aborted,
    #[error("The value isn't available until the transaction is dispatched")]
    NotYetDispatched,
    #[error("The session this node belongs to has been closed")]
    SessionClosed,
}

impl From<ipbus::Error> for Error {
    fn from(e: ipbus::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
