//! Mock transport implementations used in testing the interface

use super::{
    Error,
    Transport,
    TransportResult,
};
use ipbus::endpoint::{
    Endpoint,
    SparseMemory,
};
use std::{
    collections::VecDeque,
    time::Duration,
};
use tracing::debug;

/// Failures the mock can be told to produce on an upcoming exchange
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MockFault {
    /// The request never reaches the endpoint
    FailSend,
    /// The endpoint executes the request but the reply never arrives
    LoseReply,
    /// Only the first `words` 32-bit words of the reply arrive
    TruncateReply { words: usize },
    /// The reply comes back carrying someone else's packet id
    WrongPacketId,
    /// The endpoint executes the request but the reply only arrives after the next request
    DelayReply,
}

/// A transport backed by an in-process endpoint over a sparse register space.
///
/// Like a TCP endpoint, a request the endpoint refuses to answer still produces an (empty) reply.
#[derive(Debug, Default)]
pub struct Mock {
    endpoint: Endpoint<SparseMemory>,
    replies: VecDeque<Vec<u8>>,
    /// A delayed reply, released by the next send
    held: Option<Vec<u8>>,
    faults: VecDeque<MockFault>,
    packets: usize,
}

impl Mock {
    /// Construct a new mock with every word zeroed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a mock over an existing register space
    #[must_use]
    pub fn with_memory(memory: SparseMemory) -> Self {
        Self {
            endpoint: Endpoint::new(memory),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn memory(&self) -> &SparseMemory {
        self.endpoint.memory()
    }

    pub fn memory_mut(&mut self) -> &mut SparseMemory {
        self.endpoint.memory_mut()
    }

    /// Queue a fault for the next exchange that doesn't already have one
    pub fn inject(&mut self, fault: MockFault) {
        self.faults.push_back(fault);
    }

    /// How many request packets the endpoint has received
    #[must_use]
    pub fn packets_received(&self) -> usize {
        self.packets
    }
}

impl Transport for Mock {
    fn send(&mut self, packet: &[u8]) -> TransportResult<()> {
        let fault = self.faults.pop_front();
        if fault == Some(MockFault::FailSend) {
            debug!("Mock dropping request");
            return Err(Error::Mock("send failed"));
        }
        if let Some(late) = self.held.take() {
            self.replies.push_back(late);
        }
        self.packets += 1;
        let mut reply = self.endpoint.process(packet);
        match fault {
            Some(MockFault::LoseReply) => {
                debug!("Mock losing reply");
                return Ok(());
            }
            Some(MockFault::DelayReply) => {
                debug!("Mock holding reply back");
                self.held = Some(reply);
                return Ok(());
            }
            Some(MockFault::TruncateReply { words }) => reply.truncate(words * 4),
            // Byte 2 of a big-endian header holds the low byte of the packet id
            Some(MockFault::WrongPacketId) if reply.len() >= 4 => reply[2] ^= 0xff,
            _ => (),
        }
        self.replies.push_back(reply);
        Ok(())
    }

    fn receive(&mut self) -> TransportResult<Vec<u8>> {
        self.replies.pop_front().ok_or(Error::Timeout)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> TransportResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipbus::{
        packet::{
            decode_responses,
            encode_requests,
        },
        Request,
        TransactionType,
    };

    fn read_reg(mock: &mut Mock) -> TransportResult<Vec<u8>> {
        let packet = encode_requests(
            1,
            &[Request::read(0, TransactionType::Read, 0x10, 1).unwrap()],
        )
        .unwrap();
        mock.send(&packet)?;
        mock.receive()
    }

    #[test]
    fn test_read() {
        let mut mock = Mock::new();
        mock.memory_mut().set(0x10, 42);
        let reply = read_reg(&mut mock).unwrap();
        let (header, responses) = decode_responses(&reply).unwrap();
        assert_eq!(header.id(), 1);
        assert_eq!(responses[0].payload, vec![42]);
        assert_eq!(mock.packets_received(), 1);
    }

    #[test]
    fn test_receive_without_request() {
        assert!(matches!(Mock::new().receive(), Err(Error::Timeout)));
    }

    #[test]
    fn test_faults_apply_in_order() {
        let mut mock = Mock::new();
        mock.inject(MockFault::FailSend);
        mock.inject(MockFault::LoseReply);
        mock.inject(MockFault::TruncateReply { words: 2 });
        mock.inject(MockFault::WrongPacketId);
        assert!(matches!(read_reg(&mut mock), Err(Error::Mock(_))));
        assert_eq!(mock.packets_received(), 0);
        assert!(matches!(read_reg(&mut mock), Err(Error::Timeout)));
        assert_eq!(mock.packets_received(), 1);
        assert_eq!(read_reg(&mut mock).unwrap().len(), 8);
        let (header, _) = decode_responses(&read_reg(&mut mock).unwrap()).unwrap();
        assert_ne!(header.id(), 1);
        assert_eq!(read_reg(&mut mock).unwrap().len(), 12);
    }

    #[test]
    fn test_delayed_reply_arrives_before_next() {
        let mut mock = Mock::new();
        mock.memory_mut().set(0x10, 7);
        mock.inject(MockFault::DelayReply);
        assert!(matches!(read_reg(&mut mock), Err(Error::Timeout)));
        let late = read_reg(&mut mock).unwrap();
        assert_eq!(decode_responses(&late).unwrap().1[0].payload, vec![7]);
        // The reply to the second request is still queued behind it
        assert!(mock.receive().is_ok());
        assert_eq!(mock.packets_received(), 2);
    }
}
