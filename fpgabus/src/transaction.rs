//! Queued operations and their mapping onto IPbus transaction records.
//!
//! A [`Transaction`] only accumulates operations. Nothing touches the wire until a
//! [`Session`](crate::session::Session) dispatches it.

use crate::{
    error::{
        Error,
        Result,
    },
    handle::{
        ResultHandle,
        Slot,
    },
    mask,
};
use ipbus::{
    Request,
    Response,
    TransactionType,
    MAX_TRANSACTION_WORDS,
};

/// A single queued operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write(u32),
    ReadBlock { count: usize, incremental: bool },
    WriteBlock { values: Vec<u32>, incremental: bool },
    RmwBits { and_term: u32, or_term: u32 },
    RmwSum { addend: u32 },
    ReadConfig { count: usize },
    WriteConfig { values: Vec<u32> },
}

#[derive(Debug)]
enum Sink {
    Discard,
    Word { slot: Slot<u32>, mask: u32 },
    Block(Slot<Vec<u32>>),
}

impl Sink {
    fn cancel(&self) {
        match self {
            Sink::Discard => (),
            Sink::Word { slot, .. } => slot.cancel(),
            Sink::Block(slot) => slot.cancel(),
        }
    }

    fn abort(&self) {
        match self {
            Sink::Discard => (),
            Sink::Word { slot, .. } => slot.abort(),
            Sink::Block(slot) => slot.abort(),
        }
    }
}

/// An operation waiting in a transaction, with the target address and the slot its result goes to
#[derive(Debug)]
pub struct PendingOperation {
    address: u32,
    operation: Operation,
    sink: Sink,
}

impl PendingOperation {
    #[must_use]
    pub fn address(&self) -> u32 {
        self.address
    }

    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Number of wire transactions this operation expands to
    #[must_use]
    pub fn request_count(&self) -> usize {
        match &self.operation {
            Operation::ReadBlock { count, .. } | Operation::ReadConfig { count } => {
                count.div_ceil(MAX_TRANSACTION_WORDS)
            }
            Operation::WriteBlock { values, .. } | Operation::WriteConfig { values } => {
                values.len().div_ceil(MAX_TRANSACTION_WORDS)
            }
            _ => 1,
        }
    }

    fn requests(&self, next_id: &mut u16) -> std::result::Result<Vec<Request>, ipbus::Error> {
        let mut id = || {
            let this = *next_id;
            *next_id = next_id.wrapping_add(1);
            this
        };
        let address = self.address;
        Ok(match &self.operation {
            Operation::Read => vec![Request::read(id(), TransactionType::Read, address, 1)?],
            Operation::Write(value) => {
                vec![Request::write(id(), TransactionType::Write, address, &[*value])?]
            }
            Operation::ReadBlock { count, incremental } => {
                let kind = if *incremental {
                    TransactionType::Read
                } else {
                    TransactionType::NonIncrementingRead
                };
                read_chunks(&mut id, kind, address, *count, *incremental)?
            }
            Operation::WriteBlock { values, incremental } => {
                let kind = if *incremental {
                    TransactionType::Write
                } else {
                    TransactionType::NonIncrementingWrite
                };
                write_chunks(&mut id, kind, address, values, *incremental)?
            }
            Operation::RmwBits { and_term, or_term } => {
                vec![Request::rmw_bits(id(), address, *and_term, *or_term)]
            }
            Operation::RmwSum { addend } => vec![Request::rmw_sum(id(), address, *addend)],
            Operation::ReadConfig { count } => {
                read_chunks(&mut id, TransactionType::ConfigRead, address, *count, true)?
            }
            Operation::WriteConfig { values } => {
                write_chunks(&mut id, TransactionType::ConfigWrite, address, values, true)?
            }
        })
    }

    fn settle(self, responses: &[Response]) {
        match self.sink {
            Sink::Discard => (),
            Sink::Word { slot, mask } => match responses.first().and_then(|r| r.payload.first()) {
                Some(raw) => slot.resolve(mask::masked_read(*raw, mask)),
                None => slot.abort(),
            },
            Sink::Block(slot) => slot.resolve(
                responses
                    .iter()
                    .flat_map(|r| r.payload.iter().copied())
                    .collect(),
            ),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn read_chunks<F>(
    id: &mut F,
    kind: TransactionType,
    address: u32,
    count: usize,
    incremental: bool,
) -> std::result::Result<Vec<Request>, ipbus::Error>
where
    F: FnMut() -> u16,
{
    (0..count)
        .step_by(MAX_TRANSACTION_WORDS)
        .map(|offset| {
            let n = (count - offset).min(MAX_TRANSACTION_WORDS);
            let addr = if incremental {
                address.wrapping_add(offset as u32)
            } else {
                address
            };
            Request::read(id(), kind, addr, n)
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn write_chunks<F>(
    id: &mut F,
    kind: TransactionType,
    address: u32,
    values: &[u32],
    incremental: bool,
) -> std::result::Result<Vec<Request>, ipbus::Error>
where
    F: FnMut() -> u16,
{
    values
        .chunks(MAX_TRANSACTION_WORDS)
        .enumerate()
        .map(|(i, chunk)| {
            let addr = if incremental {
                address.wrapping_add((i * MAX_TRANSACTION_WORDS) as u32)
            } else {
                address
            };
            Request::write(id(), kind, addr, chunk)
        })
        .collect()
}

/// An ordered batch of pending operations. Insertion order is wire order.
#[derive(Debug, Default)]
pub struct Transaction {
    pending: Vec<PendingOperation>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn pending(&self) -> &[PendingOperation] {
        &self.pending
    }

    fn push(&mut self, address: u32, operation: Operation, sink: Sink) {
        self.pending.push(PendingOperation {
            address,
            operation,
            sink,
        });
    }

    /// Queue a single-word read. The handle resolves to the field selected by `mask`.
    pub fn read(&mut self, address: u32, mask: u32) -> ResultHandle<u32> {
        let (slot, handle) = Slot::new();
        self.push(address, Operation::Read, Sink::Word { slot, mask });
        handle
    }

    /// Queue a single-word write
    pub fn write(&mut self, address: u32, value: u32) {
        self.push(address, Operation::Write(value), Sink::Discard);
    }

    /// Queue a write of the field selected by `mask`. Partial masks become an endpoint-side RMW
    /// so the other bits of the word are preserved.
    pub fn write_masked(&mut self, address: u32, mask: u32, value: u32) {
        if mask == u32::MAX {
            self.write(address, value);
        } else {
            let (and_term, or_term) = mask::rmw_terms(mask, value);
            self.push(
                address,
                Operation::RmwBits { and_term, or_term },
                Sink::Discard,
            );
        }
    }

    /// Queue a block read of `count` words
    /// # Errors
    /// Returns an error if `count` is zero
    pub fn read_block(
        &mut self,
        address: u32,
        count: usize,
        incremental: bool,
    ) -> Result<ResultHandle<Vec<u32>>> {
        if count == 0 {
            return Err(Error::InvalidArgument("Block reads need at least one word".into()));
        }
        let (slot, handle) = Slot::new();
        self.push(
            address,
            Operation::ReadBlock { count, incremental },
            Sink::Block(slot),
        );
        Ok(handle)
    }

    /// Queue a block write of `values`
    /// # Errors
    /// Returns an error if `values` is empty
    pub fn write_block(&mut self, address: u32, values: &[u32], incremental: bool) -> Result<()> {
        if values.is_empty() {
            return Err(Error::InvalidArgument("Block writes need at least one word".into()));
        }
        self.push(
            address,
            Operation::WriteBlock {
                values: values.to_vec(),
                incremental,
            },
            Sink::Discard,
        );
        Ok(())
    }

    /// Queue `new = (old & and_term) | or_term` at the endpoint. Resolves to `old`.
    pub fn rmw_bits(&mut self, address: u32, and_term: u32, or_term: u32) -> ResultHandle<u32> {
        let (slot, handle) = Slot::new();
        self.push(
            address,
            Operation::RmwBits { and_term, or_term },
            Sink::Word {
                slot,
                mask: u32::MAX,
            },
        );
        handle
    }

    /// Queue `new = old + addend` (wrapping) at the endpoint. Resolves to `old`.
    pub fn rmw_sum(&mut self, address: u32, addend: u32) -> ResultHandle<u32> {
        let (slot, handle) = Slot::new();
        self.push(
            address,
            Operation::RmwSum { addend },
            Sink::Word {
                slot,
                mask: u32::MAX,
            },
        );
        handle
    }

    /// Queue a read of the endpoint's configuration space
    /// # Errors
    /// Returns an error if `count` is zero
    pub fn read_config(&mut self, address: u32, count: usize) -> Result<ResultHandle<Vec<u32>>> {
        if count == 0 {
            return Err(Error::InvalidArgument("Config reads need at least one word".into()));
        }
        let (slot, handle) = Slot::new();
        self.push(address, Operation::ReadConfig { count }, Sink::Block(slot));
        Ok(handle)
    }

    /// Queue a write to the endpoint's configuration space
    /// # Errors
    /// Returns an error if `values` is empty
    pub fn write_config(&mut self, address: u32, values: &[u32]) -> Result<()> {
        if values.is_empty() {
            return Err(Error::InvalidArgument("Config writes need at least one word".into()));
        }
        self.push(
            address,
            Operation::WriteConfig {
                values: values.to_vec(),
            },
            Sink::Discard,
        );
        Ok(())
    }

    /// Expand every pending operation into wire records, numbering transactions from zero
    pub(crate) fn encode(&self) -> Result<Vec<Request>> {
        let mut next_id = 0u16;
        let mut requests = vec![];
        for op in &self.pending {
            requests.extend(op.requests(&mut next_id)?);
        }
        Ok(requests)
    }

    /// Hand validated reply records to the pending operations, in order, and empty the batch.
    /// `responses` must line up one-to-one with [`Transaction::encode`].
    pub(crate) fn resolve(&mut self, responses: &[Response]) {
        let mut rest = responses;
        for op in self.pending.drain(..) {
            let n = op.request_count().min(rest.len());
            let (mine, tail) = rest.split_at(n);
            op.settle(mine);
            rest = tail;
        }
    }

    /// Drop every pending operation, failing its handle with [`Error::Cancelled`]
    pub(crate) fn cancel(&mut self) {
        for op in self.pending.drain(..) {
            op.sink.cancel();
        }
    }

    /// Drop every pending operation, failing its handle with [`Error::Aborted`]
    pub(crate) fn abort(&mut self) {
        for op in self.pending.drain(..) {
            op.sink.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipbus::InfoCode;

    fn ok(request: &Request, payload: Vec<u32>) -> Response {
        Response {
            id: request.header().id(),
            kind: request.kind,
            words: request.words,
            info: InfoCode::Success,
            payload,
        }
    }

    #[test]
    fn test_nothing_resolves_before_dispatch() {
        let mut txn = Transaction::new();
        txn.write(0x10, 77);
        let handle = txn.read(0x10, u32::MAX);
        assert_eq!(txn.len(), 2);
        assert!(matches!(handle.value(), Err(Error::NotYetDispatched)));
    }

    #[test]
    fn test_encode_order_and_ids() {
        let mut txn = Transaction::new();
        txn.write(0x10, 77);
        let _ = txn.read(0x10, u32::MAX);
        let _ = txn.rmw_sum(0x10, 1);
        let requests = txn.encode().unwrap();
        let kinds: Vec<_> = requests.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransactionType::Write,
                TransactionType::Read,
                TransactionType::RmwSum
            ]
        );
        let ids: Vec<_> = requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_masked_write_becomes_rmw() {
        let mut txn = Transaction::new();
        txn.write_masked(0x10, 0x0f0f_0f0f, 0x090b_0d0f);
        txn.write_masked(0x10, u32::MAX, 5);
        assert_eq!(
            txn.pending()[0].operation(),
            &Operation::RmwBits {
                and_term: 0xf0f0_f0f0,
                or_term: 0x090b_0d0f
            }
        );
        assert_eq!(txn.pending()[1].operation(), &Operation::Write(5));
    }

    #[test]
    fn test_empty_blocks_rejected() {
        let mut txn = Transaction::new();
        assert!(matches!(
            txn.read_block(0, 0, true),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            txn.write_block(0, &[], false),
            Err(Error::InvalidArgument(_))
        ));
        assert!(txn.read_config(0, 0).is_err());
        assert!(txn.write_config(0, &[]).is_err());
        assert!(txn.is_empty());
    }

    #[test]
    fn test_long_blocks_are_chunked() {
        let mut txn = Transaction::new();
        let values: Vec<u32> = (0..600).collect();
        txn.write_block(0x1000, &values, true).unwrap();
        let _ = txn.read_block(0x2000, 600, false).unwrap();
        assert_eq!(txn.pending()[0].request_count(), 3);
        let requests = txn.encode().unwrap();
        assert_eq!(requests.len(), 6);
        let writes: Vec<_> = requests[..3].iter().map(|r| (r.address, r.words)).collect();
        assert_eq!(writes, vec![(0x1000, 255), (0x10ff, 255), (0x11fe, 90)]);
        assert_eq!(requests[2].payload[0], 510);
        assert!(requests[3..]
            .iter()
            .all(|r| r.address == 0x2000 && r.kind == TransactionType::NonIncrementingRead));
    }

    #[test]
    fn test_resolve_in_order() {
        let mut txn = Transaction::new();
        txn.write(0x10, 0x0123_4567);
        let masked = txn.read(0x10, 0x0f0f_0f0f);
        let block = txn.read_block(0x20, 300, true).unwrap();
        let old = txn.rmw_bits(0x10, 0xffff_0000, 0x1111_1111);
        let requests = txn.encode().unwrap();
        let responses = vec![
            ok(&requests[0], vec![]),
            ok(&requests[1], vec![0x0123_4567]),
            ok(&requests[2], (0..255).collect()),
            ok(&requests[3], (255..300).collect()),
            ok(&requests[4], vec![0x0123_4567]),
        ];
        txn.resolve(&responses);
        assert!(txn.is_empty());
        assert_eq!(masked.value().unwrap(), 0x0103_0507);
        assert_eq!(block.value().unwrap(), (0..300).collect::<Vec<u32>>());
        assert_eq!(old.value().unwrap(), 0x0123_4567);
    }

    #[test]
    fn test_cancel_and_abort() {
        let mut txn = Transaction::new();
        let a = txn.read(0, u32::MAX);
        txn.cancel();
        assert!(matches!(a.value(), Err(Error::Cancelled)));
        let b = txn.read_block(0, 2, true).unwrap();
        txn.abort();
        assert!(matches!(b.value(), Err(Error::Aborted)));
        assert!(txn.is_empty());
    }
}
