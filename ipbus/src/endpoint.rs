//! The endpoint side of the protocol: execute the transactions of a request packet against a
//! register space and build the reply packet.
//!
//! Transactions run strictly in packet order and each one runs to completion before the next,
//! so RMW operations are indivisible with respect to everything else arriving on this endpoint.

use crate::{
    header::{
        InfoCode,
        PacketHeader,
        PacketType,
        TransactionHeader,
        TransactionType,
    },
    packet::{
        words_from_bytes,
        words_to_bytes,
        ByteOrder,
        Response,
    },
    PROTOCOL_VERSION,
};
use std::collections::{
    HashMap,
    VecDeque,
};
use tracing::{
    debug,
    trace,
    warn,
};

/// Ways a bus access can fail
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    Error,
    Timeout,
}

impl Fault {
    fn on_read(self) -> InfoCode {
        match self {
            Fault::Error => InfoCode::BusErrorRead,
            Fault::Timeout => InfoCode::BusTimeoutRead,
        }
    }

    fn on_write(self) -> InfoCode {
        match self {
            Fault::Error => InfoCode::BusErrorWrite,
            Fault::Timeout => InfoCode::BusTimeoutWrite,
        }
    }
}

/// A 32-bit word-addressed register space
pub trait Memory {
    /// Read `data.len()` consecutive words starting at `address`
    /// # Errors
    /// Returns a fault if any word can't be read
    fn read(&mut self, address: u32, data: &mut [u32]) -> Result<(), Fault>;

    /// Write `data` to consecutive words starting at `address`
    /// # Errors
    /// Returns a fault if any word can't be written
    fn write(&mut self, address: u32, data: &[u32]) -> Result<(), Fault>;
}

/// A lazily-populated register space, useful for testing. Unwritten words read as zero.
#[derive(Debug, Default, Clone)]
pub struct SparseMemory {
    words: HashMap<u32, u32>,
    faults: HashMap<u32, Fault>,
}

impl SparseMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, address: u32) -> u32 {
        self.words.get(&address).copied().unwrap_or_default()
    }

    pub fn set(&mut self, address: u32, value: u32) {
        self.words.insert(address, value);
    }

    /// Make every access touching `address` fail with `fault`
    pub fn inject_fault(&mut self, address: u32, fault: Fault) {
        self.faults.insert(address, fault);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    #[allow(clippy::cast_possible_truncation)]
    fn check(&self, address: u32, len: usize) -> Result<(), Fault> {
        (0..len)
            .filter_map(|i| self.faults.get(&address.wrapping_add(i as u32)))
            .next()
            .map_or(Ok(()), |f| Err(*f))
    }
}

impl Memory for SparseMemory {
    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self, address: u32, data: &mut [u32]) -> Result<(), Fault> {
        self.check(address, data.len())?;
        for (i, word) in data.iter_mut().enumerate() {
            *word = self.get(address.wrapping_add(i as u32));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, address: u32, data: &[u32]) -> Result<(), Fault> {
        self.check(address, data.len())?;
        for (i, word) in data.iter().enumerate() {
            self.set(address.wrapping_add(i as u32), *word);
        }
        Ok(())
    }
}

/// Executes request packets against a [`Memory`]
#[derive(Debug, Default)]
pub struct Endpoint<M> {
    memory: M,
}

impl<M> Endpoint<M>
where
    M: Memory,
{
    pub fn new(memory: M) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Process one request packet and return the reply packet, in the byte order the request
    /// arrived in. Packets that can't or shouldn't be answered produce an empty reply.
    pub fn process(&mut self, packet: &[u8]) -> Vec<u8> {
        if packet.len() < 4 {
            return vec![];
        }
        let Ok(order) = ByteOrder::detect(u32::from_be_bytes([
            packet[0], packet[1], packet[2], packet[3],
        ])) else {
            warn!("Dropping packet with a version or byte-order mismatch");
            return vec![];
        };
        let Ok(words) = words_from_bytes(packet, order) else {
            warn!(len = packet.len(), "Dropping misaligned packet");
            return vec![];
        };
        let mut request: VecDeque<u32> = words.into();
        let Some(raw_header) = request.pop_front() else {
            return vec![];
        };
        let header = match PacketHeader::from_word(raw_header) {
            Ok(h) => h,
            Err(e) => {
                warn!(%e, "Dropping packet with a bad header");
                return vec![];
            }
        };
        match header.packet_type() {
            Ok(PacketType::Control) => (),
            // Status and resend aren't needed over a reliable stream
            Ok(kind) => {
                debug!(?kind, "Ignoring non-control packet");
                return vec![];
            }
            Err(e) => {
                debug!(%e, "Ignoring unknown packet");
                return vec![];
            }
        }
        let mut reply = vec![raw_header];
        if self.process_control(&mut request, &mut reply).is_none() || reply.len() == 1 {
            return vec![];
        }
        words_to_bytes(&reply, order)
    }

    /// Appends reply records to `reply`. Returns `None` if the whole packet has to be dropped.
    fn process_control(&mut self, request: &mut VecDeque<u32>, reply: &mut Vec<u32>) -> Option<()> {
        while let Some(raw) = request.pop_front() {
            let header = TransactionHeader::from_word(raw).ok()?;
            if header.version() != PROTOCOL_VERSION || header.info_code() != InfoCode::Request as u8 {
                warn!(raw, "Dropping packet with an invalid transaction header");
                return None;
            }
            // Nothing more can be parsed after an unknown type or a short body
            let Ok(kind) = header.kind() else {
                reply.push(header.with_info(InfoCode::BadHeader).to_word().ok()?);
                break;
            };
            let body = 1 + kind.request_payload(header.words());
            if request.len() < body {
                reply.push(header.with_info(InfoCode::BadHeader).to_word().ok()?);
                break;
            }
            let address = request.pop_front()?;
            let payload: Vec<u32> = request.drain(..body - 1).collect();
            trace!(id = header.id(), ?kind, address, "Executing transaction");
            self.execute(&header, kind, address, &payload)
                .encode_into(reply)
                .ok()?;
        }
        Some(())
    }

    fn execute(
        &mut self,
        header: &TransactionHeader,
        kind: TransactionType,
        address: u32,
        payload: &[u32],
    ) -> Response {
        let words = header.words();
        let result = match kind {
            TransactionType::Read => {
                let mut data = vec![0; usize::from(words)];
                self.memory
                    .read(address, &mut data)
                    .map(|()| data)
                    .map_err(Fault::on_read)
            }
            TransactionType::NonIncrementingRead => {
                let mut data = vec![0; usize::from(words)];
                data.iter_mut()
                    .try_for_each(|w| {
                        let mut one = [0];
                        self.memory.read(address, &mut one)?;
                        *w = one[0];
                        Ok(())
                    })
                    .map(|()| data)
                    .map_err(Fault::on_read)
            }
            TransactionType::Write => self
                .memory
                .write(address, payload)
                .map(|()| vec![])
                .map_err(Fault::on_write),
            TransactionType::NonIncrementingWrite => payload
                .iter()
                .try_for_each(|w| self.memory.write(address, &[*w]))
                .map(|()| vec![])
                .map_err(Fault::on_write),
            TransactionType::RmwBits | TransactionType::RmwSum if words != 1 => {
                Err(InfoCode::BadHeader)
            }
            TransactionType::RmwBits => self.modify(address, |old| (old & payload[0]) | payload[1]),
            TransactionType::RmwSum => self.modify(address, |old| old.wrapping_add(payload[0])),
            // There's no configuration space behind this endpoint
            TransactionType::ConfigRead => Ok(vec![0; usize::from(words)]),
            TransactionType::ConfigWrite => Ok(vec![]),
        };
        match result {
            Ok(data) => Response {
                id: header.id(),
                kind,
                words,
                info: InfoCode::Success,
                payload: data,
            },
            Err(info) => {
                debug!(id = header.id(), ?kind, address, %info, "Transaction failed");
                Response {
                    id: header.id(),
                    kind,
                    words,
                    info,
                    payload: vec![],
                }
            }
        }
    }

    fn modify<F>(&mut self, address: u32, f: F) -> Result<Vec<u32>, InfoCode>
    where
        F: FnOnce(u32) -> u32,
    {
        let mut old = [0];
        self.memory.read(address, &mut old).map_err(Fault::on_read)?;
        self.memory
            .write(address, &[f(old[0])])
            .map_err(Fault::on_write)?;
        Ok(vec![old[0]])
    }
}
