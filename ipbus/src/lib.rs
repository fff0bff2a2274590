//! # IPbus
//!
//! An implementation of the IPbus 2.0 packet protocol used to access the 32-bit
//! register space of FPGA endpoints. Only control packets are implemented, because that's all
//! register access needs. Status and resend packets are recognized and ignored.
//!
//! The crate has two halves: [`packet`] encodes requests and decodes replies for clients, and
//! [`endpoint`] executes requests against a [`endpoint::Memory`] the way a hardware endpoint
//! does. [`server`] puts an endpoint on the network over TCP or UDP.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod endpoint;
pub mod header;
pub mod packet;
pub mod server;

pub use header::{
    InfoCode,
    PacketHeader,
    PacketType,
    TransactionHeader,
    TransactionType,
};
pub use packet::{
    ByteOrder,
    Request,
    Response,
};

/// The only protocol version we speak
pub const PROTOCOL_VERSION: u8 = 2;

/// The largest number of data words a single transaction can carry (the `words` field is 8 bits)
pub const MAX_TRANSACTION_WORDS: usize = 255;

/// Transaction ids are 12 bits wide
pub const TRANSACTION_ID_MASK: u16 = 0x0fff;

/// Errors that can be thrown while encoding or decoding IPbus packets
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Not enough words in the packet")]
    Incomplete,
    #[error("Packet length of {0} bytes is not a whole number of 32-bit words")]
    Misaligned(usize),
    #[error("Unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("Packet header {0:#010x} doesn't carry a valid byte-order qualifier")]
    BadByteOrder(u32),
    #[error("Unknown packet type {0}")]
    BadPacketType(u8),
    #[error("Unknown transaction type {0}")]
    BadTransactionType(u8),
    #[error("Unknown info code {0}")]
    BadInfoCode(u8),
    #[error("Transaction {0} came back still marked as a request")]
    NotAReply(u16),
    #[error("A transaction can carry at most 255 words, got {0}")]
    TooManyWords(usize),
    #[error("Header packing failed: {0:?}")]
    Packing(packed_struct::PackingError),
}
