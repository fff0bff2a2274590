//! A connection to one endpoint, owning the pending transaction and dispatching it.
//!
//! Operations are queued by register name (or raw address) and return [`ResultHandle`]s. Nothing
//! is sent until [`Session::dispatch`], which packs the whole batch into a single IPbus control
//! packet and resolves the handles only once the entire reply has been validated.
//!
//! ```
//! use fpgabus::prelude::*;
//!
//! let table = AddressTable::try_from(vec![RegisterDescriptor::new("REG", 0x6000_0000)])?;
//! let mut session = Session::new(Mock::new(), table)?;
//! session.write("REG", 0x0123_4567)?;
//! let old = session.rmw_sum(0x6000_0000, 1);
//! let reg = session.read("REG")?;
//! session.dispatch()?;
//! assert_eq!(old.value()?, 0x0123_4567);
//! assert_eq!(reg.value()?, 0x0123_4568);
//! # Ok::<(), fpgabus::Error>(())
//! ```
use crate::{
    core::{
        AddressTable,
        Mode,
        RegisterDescriptor,
    },
    error::{
        Error,
        Result,
    },
    handle::ResultHandle,
    transaction::Transaction,
    transport::{
        uri::Uri,
        Interrupter,
        Transport,
        TransportResult,
        DEFAULT_TIMEOUT,
    },
};
use ipbus::{
    packet::{
        decode_header,
        decode_responses,
        encode_requests,
    },
    InfoCode,
    Request,
    Response,
};
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
        Mutex,
    },
    time::Duration,
};
use tracing::{
    debug,
    info,
    trace,
    warn,
};

/// How many timed-out packet ids are remembered so their late replies can be recognized
const MAX_UNANSWERED: usize = 16;

/// Per-session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a dispatch waits for the endpoint before failing with a timeout
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Cancels a session from another thread. Cancellation is permanent: the in-flight dispatch (if
/// any) and every later one fail with [`Error::Cancelled`].
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    interrupter: Option<Interrupter>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Some(interrupt) = &self.interrupter {
            interrupt();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

pub type SharedSession<T> = Arc<Mutex<Session<T>>>;

/// A connection to an endpoint with its address table and pending transaction
pub struct Session<T>
where
    T: Transport,
{
    transport: T,
    table: AddressTable,
    transaction: Transaction,
    packet_id: u16,
    /// Ids of sent packets whose reply never arrived, oldest first
    unanswered: VecDeque<u16>,
    cancelled: Arc<AtomicBool>,
    interrupter: Option<Interrupter>,
}

impl<T> fmt::Debug for Session<T>
where
    T: Transport + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("registers", &self.table.len())
            .field("pending", &self.transaction.len())
            .field("packet_id", &self.packet_id)
            .finish_non_exhaustive()
    }
}

impl<T> Session<T>
where
    T: Transport,
{
    /// Open a session over `transport` with the default configuration
    /// # Errors
    /// Returns an error if the transport rejects the configuration
    pub fn new(transport: T, table: AddressTable) -> Result<Self> {
        Self::with_config(transport, table, SessionConfig::default())
    }

    /// Open a session over `transport`
    /// # Errors
    /// Returns an error if the transport rejects the configuration
    pub fn with_config(mut transport: T, table: AddressTable, config: SessionConfig) -> Result<Self> {
        transport.set_timeout(config.timeout)?;
        let interrupter = transport.interrupter();
        Ok(Self {
            transport,
            table,
            transaction: Transaction::new(),
            packet_id: 0,
            unanswered: VecDeque::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            interrupter,
        })
    }

    /// Wrap this session for sharing with [`Node`](crate::node::Node)s
    #[must_use]
    pub fn into_shared(self) -> SharedSession<T> {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The operations queued since the last dispatch
    #[must_use]
    pub fn pending(&self) -> &Transaction {
        &self.transaction
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
            interrupter: self.interrupter.clone(),
        }
    }

    fn readable(&self, name: &str) -> Result<&RegisterDescriptor> {
        let register = self.table.resolve(name)?;
        if !register.permission.readable() {
            return Err(Error::AccessDenied {
                name: name.to_owned(),
                access: "reads",
            });
        }
        Ok(register)
    }

    fn writable(&self, name: &str) -> Result<&RegisterDescriptor> {
        let register = self.table.resolve(name)?;
        if !register.permission.writable() {
            return Err(Error::AccessDenied {
                name: name.to_owned(),
                access: "writes",
            });
        }
        Ok(register)
    }

    /// Queue a read of a register. Masked registers resolve to their right-aligned field.
    /// # Errors
    /// Returns an error if the register doesn't exist or isn't readable
    pub fn read(&mut self, name: &str) -> Result<ResultHandle<u32>> {
        let (address, mask) = {
            let register = self.readable(name)?;
            (register.address, register.mask)
        };
        Ok(self.transaction.read(address, mask))
    }

    /// Queue a write of a register. Only the bits under the register's mask are changed.
    /// # Errors
    /// Returns an error if the register doesn't exist, isn't writable, or `value` doesn't fit
    pub fn write(&mut self, name: &str, value: u32) -> Result<()> {
        let (address, mask) = {
            let register = self.writable(name)?;
            register.check_value(value)?;
            (register.address, register.mask)
        };
        self.transaction.write_masked(address, mask, value);
        Ok(())
    }

    /// Queue a block read of `count` words from a memory or port
    /// # Errors
    /// Returns an error if the register doesn't exist, isn't readable, is masked, or `count` is
    /// zero or larger than the memory
    pub fn read_block(&mut self, name: &str, count: usize) -> Result<ResultHandle<Vec<u32>>> {
        let (address, incremental) = {
            let register = self.readable(name)?;
            block_access(register, count)?
        };
        self.transaction.read_block(address, count, incremental)
    }

    /// Queue a block write of `values` to a memory or port
    /// # Errors
    /// Returns an error if the register doesn't exist, isn't writable, is masked, or `values` is
    /// empty or larger than the memory
    pub fn write_block(&mut self, name: &str, values: &[u32]) -> Result<()> {
        let (address, incremental) = {
            let register = self.writable(name)?;
            block_access(register, values.len())?
        };
        self.transaction.write_block(address, values, incremental)
    }

    /// Queue `new = (old & and_term) | or_term` at `address`, resolving to `old`
    pub fn rmw_bits(&mut self, address: u32, and_term: u32, or_term: u32) -> ResultHandle<u32> {
        self.transaction.rmw_bits(address, and_term, or_term)
    }

    /// Queue `new = old + addend` at `address`, resolving to `old`
    pub fn rmw_sum(&mut self, address: u32, addend: u32) -> ResultHandle<u32> {
        self.transaction.rmw_sum(address, addend)
    }

    /// Queue a read of a raw address, bypassing the address table
    pub fn read_address(&mut self, address: u32) -> ResultHandle<u32> {
        self.transaction.read(address, u32::MAX)
    }

    /// Queue a write of a raw address, bypassing the address table
    pub fn write_address(&mut self, address: u32, value: u32) {
        self.transaction.write(address, value);
    }

    /// Queue a read of the endpoint's configuration space
    /// # Errors
    /// Returns an error if `count` is zero
    pub fn read_config(&mut self, address: u32, count: usize) -> Result<ResultHandle<Vec<u32>>> {
        self.transaction.read_config(address, count)
    }

    /// Queue a write to the endpoint's configuration space
    /// # Errors
    /// Returns an error if `values` is empty
    pub fn write_config(&mut self, address: u32, values: &[u32]) -> Result<()> {
        self.transaction.write_config(address, values)
    }

    fn next_packet_id(&mut self) -> u16 {
        // Zero is reserved
        self.packet_id = self.packet_id.checked_add(1).unwrap_or(1);
        self.packet_id
    }

    /// Send `packet` and wait for its reply, skipping late replies to earlier packets that timed
    /// out. A reply to any other packet id is returned for validation to reject.
    fn exchange(&mut self, packet_id: u16, packet: &[u8]) -> TransportResult<Vec<u8>> {
        if self.unanswered.len() == MAX_UNANSWERED {
            self.unanswered.pop_front();
        }
        self.unanswered.push_back(packet_id);
        self.transport.send(packet)?;
        loop {
            let reply = self.transport.receive()?;
            let Ok(header) = decode_header(&reply) else {
                return Ok(reply);
            };
            let id = header.id();
            if id == packet_id {
                self.unanswered.retain(|&u| u != packet_id);
                return Ok(reply);
            }
            match self.unanswered.iter().position(|&u| u == id) {
                Some(stale) => {
                    debug!(packet_id, stale = id, "Discarding late reply");
                    self.unanswered.remove(stale);
                }
                None => return Ok(reply),
            }
        }
    }

    /// Send every queued operation as one packet and resolve the handles from the reply.
    ///
    /// Either every handle of the batch resolves or none does. On a transport failure the batch
    /// stays queued and can be dispatched again. On a malformed, short, or failed reply the batch
    /// is discarded and its handles fail with [`Error::Aborted`].
    ///
    /// A retry after a timeout goes out as a new packet. The endpoint may already have executed
    /// the first attempt, in which case it executes the batch twice. The late reply to the first
    /// attempt is discarded when it turns up.
    /// # Errors
    /// Returns an error if the exchange or the reply fails in any way
    pub fn dispatch(&mut self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            self.transaction.cancel();
            return Err(Error::Cancelled);
        }
        if self.transaction.is_empty() {
            trace!("Nothing to dispatch");
            return Ok(());
        }
        let requests = self.transaction.encode()?;
        let packet_id = self.next_packet_id();
        let packet = encode_requests(packet_id, &requests)?;
        debug!(
            packet_id,
            operations = self.transaction.len(),
            transactions = requests.len(),
            bytes = packet.len(),
            "Dispatching"
        );
        let reply = match self.exchange(packet_id, &packet) {
            Ok(reply) => reply,
            Err(e) => {
                if self.cancelled.load(Ordering::SeqCst) {
                    debug!(packet_id, "Dispatch cancelled");
                    self.transaction.cancel();
                    return Err(Error::Cancelled);
                }
                warn!(packet_id, %e, "Transport failed, keeping the transaction for a retry");
                return Err(e.into());
            }
        };
        match validate(packet_id, &requests, &reply) {
            Ok(responses) => {
                trace!(packet_id, "Reply validated");
                self.transaction.resolve(&responses);
                Ok(())
            }
            Err(e) => {
                warn!(packet_id, %e, "Aborting transaction");
                self.transaction.abort();
                Err(e)
            }
        }
    }

    /// Close the session, failing anything still queued with [`Error::Cancelled`]
    pub fn close(mut self) {
        info!(pending = self.transaction.len(), "Closing session");
        self.transaction.cancel();
    }
}

impl<T> Drop for Session<T>
where
    T: Transport,
{
    fn drop(&mut self) {
        self.transaction.cancel();
    }
}

/// Check that a block access of `count` words fits `register`, returning its address and
/// whether the access walks addresses
fn block_access(register: &RegisterDescriptor, count: usize) -> Result<(u32, bool)> {
    if register.is_masked() {
        return Err(Error::InvalidArgument(format!(
            "Block access to masked register `{}`",
            register.name()
        )));
    }
    match register.mode {
        Mode::NonIncremental => Ok((register.address, false)),
        Mode::Single | Mode::Incremental if count > register.size => {
            Err(Error::InvalidArgument(format!(
                "Block of {count} words exceeds the {} words of `{}`",
                register.size,
                register.name()
            )))
        }
        Mode::Single | Mode::Incremental => Ok((register.address, true)),
    }
}

/// Check a reply against the requests it answers
fn validate(packet_id: u16, requests: &[Request], reply: &[u8]) -> Result<Vec<Response>> {
    let (header, responses) = decode_responses(reply)?;
    if header.id() != packet_id {
        return Err(Error::Protocol(format!(
            "Reply to packet {} while waiting on packet {packet_id}",
            header.id()
        )));
    }
    if responses.len() > requests.len() {
        return Err(Error::Protocol(format!(
            "{} reply records for {} requests",
            responses.len(),
            requests.len()
        )));
    }
    for (index, (request, response)) in requests.iter().zip(&responses).enumerate() {
        if !request.matches(response) {
            return Err(Error::Protocol(format!(
                "Reply record {index} doesn't answer its request"
            )));
        }
        if response.info != InfoCode::Success {
            return Err(Error::BusError {
                index,
                code: response.info,
            });
        }
    }
    if responses.len() < requests.len() {
        return Err(Error::PartialFailure {
            acknowledged: responses.len(),
            submitted: requests.len(),
        });
    }
    Ok(responses)
}

/// Open a session from a connection string like `ipbustcp-2.0://localhost:60002`
/// # Errors
/// Returns an error if the string is malformed or the connection fails
pub fn connect(
    uri: &str,
    table: AddressTable,
    config: SessionConfig,
) -> Result<Session<Box<dyn Transport + Send>>> {
    let uri: Uri = uri.parse()?;
    info!(%uri, "Connecting");
    Session::with_config(uri.connect()?, table, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Permission,
        transport::{
            self,
            mock::{
                Mock,
                MockFault,
            },
        },
    };
    use ipbus::endpoint::Fault;

    const REG: u32 = 0x6000_0000;
    const MEM: u32 = 0x7000_0000;
    const FIFO: u32 = 0x8000_0000;

    fn session() -> Session<Mock> {
        let table = AddressTable::try_from(vec![
            RegisterDescriptor::new("REG", REG),
            RegisterDescriptor::new("REGMASK", REG)
                .with_mask(0x0f0f_0f0f)
                .unwrap(),
            RegisterDescriptor::new("NIBBLE", REG + 1)
                .with_mask(0x0000_00f0)
                .unwrap(),
            RegisterDescriptor::new("STATUS", REG + 2).with_permission(Permission::Read),
            RegisterDescriptor::new("CTRL", REG + 3).with_permission(Permission::Write),
            RegisterDescriptor::new("MEM", MEM).incremental(1024).unwrap(),
            RegisterDescriptor::new("FIFO", FIFO).non_incremental(),
        ])
        .unwrap();
        Session::new(Mock::new(), table).unwrap()
    }

    fn raw(session: &Session<Mock>, address: u32) -> u32 {
        session.transport().memory().get(address)
    }

    #[test]
    fn test_round_trip() {
        let mut s = session();
        for (name, value) in [("REG", 0xdead_beef), ("NIBBLE", 0xa), ("REGMASK", 0x0102_0304)] {
            s.write(name, value).unwrap();
            s.dispatch().unwrap();
            let handle = s.read(name).unwrap();
            s.dispatch().unwrap();
            assert_eq!(handle.value().unwrap(), value, "{name}");
        }
    }

    #[test]
    fn test_batch_ordering() {
        let mut s = session();
        s.write("REG", 1).unwrap();
        let first = s.read("REG").unwrap();
        s.write("REG", 2).unwrap();
        let second = s.read("REG").unwrap();
        assert!(matches!(first.value(), Err(Error::NotYetDispatched)));
        s.dispatch().unwrap();
        assert_eq!(first.value().unwrap(), 1);
        assert_eq!(second.value().unwrap(), 2);
        assert!(s.pending().is_empty());
        assert_eq!(s.transport().packets_received(), 1);
    }

    #[test]
    fn test_masked_fixture_sequence() {
        let mut s = session();
        s.write("REG", 0x0123_4567).unwrap();
        let masked = s.read("REGMASK").unwrap();
        s.dispatch().unwrap();
        assert_eq!(raw(&s, REG), 0x0123_4567);
        assert_eq!(masked.value().unwrap(), 0x0103_0507);

        s.write("REGMASK", 0x090b_0d0f).unwrap();
        let masked = s.read("REGMASK").unwrap();
        s.dispatch().unwrap();
        assert_eq!(raw(&s, REG), 0x092b_4d6f);
        assert_eq!(masked.value().unwrap(), 0x090b_0d0f);

        s.write("REG", 0x8765_4321).unwrap();
        let masked = s.read("REGMASK").unwrap();
        s.dispatch().unwrap();
        assert_eq!(raw(&s, REG), 0x8765_4321);
        assert_eq!(masked.value().unwrap(), 0x0705_0301);
    }

    #[test]
    fn test_rmw() {
        let mut s = session();
        s.transport_mut().memory_mut().set(REG, 0x0123_4567);
        let old = s.rmw_bits(REG, 0xffff_0000, 0x1111_1111);
        let new = s.read("REG").unwrap();
        s.dispatch().unwrap();
        assert_eq!(old.value().unwrap(), 0x0123_4567);
        assert_eq!(new.value().unwrap(), 0x1133_1111);

        s.transport_mut().memory_mut().set(REG, 0x0123_4567);
        let old = s.rmw_sum(REG, 1);
        s.dispatch().unwrap();
        assert_eq!(old.value().unwrap(), 0x0123_4567);
        assert_eq!(raw(&s, REG), 0x0123_4568);
    }

    #[test]
    fn test_blocks() {
        let mut s = session();
        s.write_block("FIFO", &[1, 2, 3, 4]).unwrap();
        s.write_block("MEM", &[1, 2, 3, 4]).unwrap();
        let fifo = s.read_block("FIFO", 4).unwrap();
        let mem = s.read_block("MEM", 4).unwrap();
        s.dispatch().unwrap();
        assert_eq!(fifo.value().unwrap(), vec![4, 4, 4, 4]);
        assert_eq!(mem.value().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_long_block() {
        let mut s = session();
        let values: Vec<u32> = (0..600).collect();
        s.write_block("MEM", &values).unwrap();
        let back = s.read_block("MEM", 600).unwrap();
        s.dispatch().unwrap();
        assert_eq!(back.value().unwrap(), values);
        assert_eq!(raw(&s, MEM + 599), 599);
    }

    #[test]
    fn test_builder_errors() {
        let mut s = session();
        assert!(matches!(s.read("NOPE"), Err(Error::UnknownRegister(_))));
        assert!(matches!(s.write("NIBBLE", 0x10), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            s.write("STATUS", 1),
            Err(Error::AccessDenied { access: "writes", .. })
        ));
        assert!(matches!(
            s.read("CTRL"),
            Err(Error::AccessDenied { access: "reads", .. })
        ));
        assert!(matches!(s.read_block("MEM", 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(s.read_block("MEM", 1025), Err(Error::InvalidArgument(_))));
        assert!(matches!(s.read_block("REG", 2), Err(Error::InvalidArgument(_))));
        assert!(matches!(s.read_block("REGMASK", 1), Err(Error::InvalidArgument(_))));
        assert!(matches!(s.write_block("FIFO", &[]), Err(Error::InvalidArgument(_))));
        assert!(s.pending().is_empty());
    }

    #[test]
    fn test_empty_dispatch_sends_nothing() {
        let mut s = session();
        s.dispatch().unwrap();
        assert_eq!(s.transport().packets_received(), 0);
    }

    #[test]
    fn test_transport_failure_keeps_transaction() {
        let mut s = session();
        s.write("REG", 5).unwrap();
        let handle = s.read("REG").unwrap();
        s.transport_mut().inject(MockFault::FailSend);
        assert!(matches!(
            s.dispatch(),
            Err(Error::Transport(transport::Error::Mock(_)))
        ));
        assert!(matches!(handle.value(), Err(Error::NotYetDispatched)));
        assert_eq!(raw(&s, REG), 0);
        assert_eq!(s.pending().len(), 2);
        s.dispatch().unwrap();
        assert_eq!(handle.value().unwrap(), 5);
    }

    #[test]
    fn test_lost_reply_resolves_nothing() {
        let mut s = session();
        s.write("REG", 5).unwrap();
        let handle = s.read("REG").unwrap();
        s.transport_mut().inject(MockFault::LoseReply);
        assert!(matches!(
            s.dispatch(),
            Err(Error::Transport(transport::Error::Timeout))
        ));
        assert!(!handle.is_settled());
    }

    #[test]
    fn test_retry_skips_late_reply() {
        let mut s = session();
        let old = s.rmw_sum(REG, 1);
        s.transport_mut().inject(MockFault::DelayReply);
        assert!(matches!(
            s.dispatch(),
            Err(Error::Transport(transport::Error::Timeout))
        ));
        assert!(!old.is_settled());
        s.dispatch().unwrap();
        // The endpoint ran the first attempt as well
        assert_eq!(old.value().unwrap(), 1);
        assert_eq!(raw(&s, REG), 2);
        assert_eq!(s.transport().packets_received(), 2);
        let reg = s.read("REG").unwrap();
        s.dispatch().unwrap();
        assert_eq!(reg.value().unwrap(), 2);
    }

    #[test]
    fn test_partial_reply_aborts() {
        let mut s = session();
        s.write("REG", 5).unwrap();
        let a = s.read("REG").unwrap();
        let b = s.read("REG").unwrap();
        // Packet header, the write record, and one read record
        s.transport_mut()
            .inject(MockFault::TruncateReply { words: 4 });
        assert!(matches!(
            s.dispatch(),
            Err(Error::PartialFailure {
                acknowledged: 2,
                submitted: 3
            })
        ));
        assert!(matches!(a.value(), Err(Error::Aborted)));
        assert!(matches!(b.value(), Err(Error::Aborted)));
        assert!(s.pending().is_empty());
    }

    #[test]
    fn test_wrong_packet_id_aborts() {
        let mut s = session();
        let handle = s.read("REG").unwrap();
        s.transport_mut().inject(MockFault::WrongPacketId);
        assert!(matches!(s.dispatch(), Err(Error::Protocol(_))));
        assert!(matches!(handle.value(), Err(Error::Aborted)));
    }

    #[test]
    fn test_garbage_reply_aborts() {
        let mut s = session();
        let handle = s.read("REG").unwrap();
        s.transport_mut()
            .inject(MockFault::TruncateReply { words: 0 });
        assert!(matches!(s.dispatch(), Err(Error::Protocol(_))));
        assert!(matches!(handle.value(), Err(Error::Aborted)));
    }

    #[test]
    fn test_bus_error_aborts() {
        let mut s = session();
        s.transport_mut()
            .memory_mut()
            .inject_fault(MEM + 2, Fault::Error);
        let reg = s.read("REG").unwrap();
        let mem = s.read_block("MEM", 4).unwrap();
        assert!(matches!(
            s.dispatch(),
            Err(Error::BusError {
                index: 1,
                code: InfoCode::BusErrorRead
            })
        ));
        assert!(matches!(reg.value(), Err(Error::Aborted)));
        assert!(matches!(mem.value(), Err(Error::Aborted)));
    }

    #[test]
    fn test_cancel() {
        let mut s = session();
        let handle = s.read("REG").unwrap();
        let cancel = s.cancel_handle();
        std::thread::spawn(move || cancel.cancel()).join().unwrap();
        assert!(matches!(s.dispatch(), Err(Error::Cancelled)));
        assert!(matches!(handle.value(), Err(Error::Cancelled)));
        assert_eq!(s.transport().packets_received(), 0);
        let _ = s.read("REG").unwrap();
        assert!(matches!(s.dispatch(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_close_cancels_pending() {
        let mut s = session();
        let handle = s.read("REG").unwrap();
        s.close();
        assert!(matches!(handle.value(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_raw_and_config_access() {
        let mut s = session();
        s.write_address(0x10, 9);
        let back = s.read_address(0x10);
        s.write_config(0, &[1, 2]).unwrap();
        let config = s.read_config(0, 2).unwrap();
        s.dispatch().unwrap();
        assert_eq!(back.value().unwrap(), 9);
        assert_eq!(config.value().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_packet_ids_skip_zero() {
        let mut s = session();
        s.packet_id = u16::MAX - 1;
        assert_eq!(s.next_packet_id(), u16::MAX);
        assert_eq!(s.next_packet_id(), 1);
        s.packet_id = u16::MAX;
        let handle = s.read("REG").unwrap();
        s.dispatch().unwrap();
        assert!(handle.is_ready());
    }

    #[test]
    fn test_connect_bad_uri() {
        assert!(matches!(
            connect("nope", AddressTable::new(), SessionConfig::default()),
            Err(Error::Transport(transport::Error::BadUri(_)))
        ));
    }
}
