//! # fpgabus
//!
//! Batched, transactional access to the 32-bit register space of FPGA endpoints over IPbus 2.0.
//!
//! Registers are named in an [`core::AddressTable`]. A [`session::Session`] queues reads, writes,
//! block transfers, and endpoint-side read-modify-writes against those names, handing back
//! [`handle::ResultHandle`]s, and sends the whole batch in one packet on
//! [`session::Session::dispatch`]. Handles only ever hold values the endpoint acknowledged.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod core;
pub mod error;
pub mod handle;
pub mod mask;
pub mod node;
pub mod prelude;
pub mod session;
pub mod transaction;
pub mod transport;

pub use error::{
    Error,
    Result,
};
