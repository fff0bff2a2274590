//! Client-side packet codec: requests go out as one control packet, replies come back as one
//! control packet with one record per request record, in the same order.

use crate::{
    header::{
        InfoCode,
        PacketHeader,
        PacketType,
        TransactionHeader,
        TransactionType,
    },
    Error,
};
use tracing::trace;

/// The order in which the bytes of each 32-bit word travel on the wire
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    /// Work out the byte order of a packet from its raw first word, read big-endian. A packet
    /// header always has version 2 in the top nibble and the qualifier `0xf` in bits 4..8, so
    /// exactly one of the two orders matches.
    /// # Errors
    /// Returns an error if neither order yields a valid header
    pub fn detect(raw_header: u32) -> Result<Self, Error> {
        if raw_header & 0xff00_00f0 == 0x2000_00f0 {
            Ok(Self::Big)
        } else if raw_header & 0xf000_00ff == 0xf000_0020 {
            Ok(Self::Little)
        } else {
            Err(Error::BadByteOrder(raw_header))
        }
    }

    fn word_from(self, chunk: [u8; 4]) -> u32 {
        match self {
            Self::Big => u32::from_be_bytes(chunk),
            Self::Little => u32::from_le_bytes(chunk),
        }
    }

    fn word_to(self, word: u32) -> [u8; 4] {
        match self {
            Self::Big => word.to_be_bytes(),
            Self::Little => word.to_le_bytes(),
        }
    }
}

/// Split a byte payload into words
/// # Errors
/// Returns an error if the payload isn't a whole number of words
pub fn words_from_bytes(bytes: &[u8], order: ByteOrder) -> Result<Vec<u32>, Error> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| order.word_from([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Flatten words into a byte payload
#[must_use]
pub fn words_to_bytes(words: &[u32], order: ByteOrder) -> Vec<u8> {
    words.iter().flat_map(|w| order.word_to(*w)).collect()
}

/// One outbound transaction record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u16,
    pub kind: TransactionType,
    pub words: u8,
    pub address: u32,
    /// Write data, `[and, or]` for RMW bits, or `[addend]` for RMW sum
    pub payload: Vec<u32>,
}

impl Request {
    /// A read-type request of `words` words (incrementing, non-incrementing, or config)
    /// # Errors
    /// Returns an error if `words` doesn't fit in one transaction
    pub fn read(id: u16, kind: TransactionType, address: u32, words: usize) -> Result<Self, Error> {
        Ok(Self {
            id,
            kind,
            words: u8::try_from(words).map_err(|_| Error::TooManyWords(words))?,
            address,
            payload: vec![],
        })
    }

    /// A write-type request carrying `data`
    /// # Errors
    /// Returns an error if `data` doesn't fit in one transaction
    pub fn write(id: u16, kind: TransactionType, address: u32, data: &[u32]) -> Result<Self, Error> {
        Ok(Self {
            id,
            kind,
            words: u8::try_from(data.len()).map_err(|_| Error::TooManyWords(data.len()))?,
            address,
            payload: data.to_vec(),
        })
    }

    #[must_use]
    pub fn rmw_bits(id: u16, address: u32, and_term: u32, or_term: u32) -> Self {
        Self {
            id,
            kind: TransactionType::RmwBits,
            words: 1,
            address,
            payload: vec![and_term, or_term],
        }
    }

    #[must_use]
    pub fn rmw_sum(id: u16, address: u32, addend: u32) -> Self {
        Self {
            id,
            kind: TransactionType::RmwSum,
            words: 1,
            address,
            payload: vec![addend],
        }
    }

    #[must_use]
    pub fn header(&self) -> TransactionHeader {
        TransactionHeader::request(self.id, self.kind, self.words)
    }

    /// Append this record's words to `out`
    /// # Errors
    /// Returns an error if the header fails to pack
    pub fn encode_into(&self, out: &mut Vec<u32>) -> Result<(), Error> {
        out.push(self.header().to_word()?);
        out.push(self.address);
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Whether `response` is the reply record to this request
    #[must_use]
    pub fn matches(&self, response: &Response) -> bool {
        response.id == self.header().id() && response.kind == self.kind && response.words == self.words
    }
}

/// One inbound transaction record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u16,
    pub kind: TransactionType,
    pub words: u8,
    pub info: InfoCode,
    /// Read data or the pre-modification value of an RMW. Empty on errors.
    pub payload: Vec<u32>,
}

impl Response {
    /// Append this record's words to `out`
    /// # Errors
    /// Returns an error if the header fails to pack
    pub fn encode_into(&self, out: &mut Vec<u32>) -> Result<(), Error> {
        out.push(TransactionHeader::new(self.id, self.kind, self.words, self.info).to_word()?);
        out.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Encode `requests` as a big-endian control packet with id `packet_id`
/// # Errors
/// Returns an error if a header fails to pack
pub fn encode_requests(packet_id: u16, requests: &[Request]) -> Result<Vec<u8>, Error> {
    let mut words = vec![PacketHeader::control(packet_id).to_word()?];
    for request in requests {
        request.encode_into(&mut words)?;
    }
    trace!(packet_id, words = words.len(), "Encoded request packet");
    Ok(words_to_bytes(&words, ByteOrder::Big))
}

/// Decode just the packet header of `bytes`, in whichever byte order it was sent
/// # Errors
/// Returns an error if there is no complete, valid header word
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader, Error> {
    match bytes {
        [a, b, c, d, ..] => {
            let order = ByteOrder::detect(u32::from_be_bytes([*a, *b, *c, *d]))?;
            PacketHeader::from_word(order.word_from([*a, *b, *c, *d]))
        }
        _ => Err(Error::Incomplete),
    }
}

/// Decode a reply control packet into its header and transaction records. Byte order is detected
/// from the packet header.
/// # Errors
/// Returns an error on any framing problem: bad headers, unknown types or codes, or a record
/// that runs past the end of the packet
pub fn decode_responses(bytes: &[u8]) -> Result<(PacketHeader, Vec<Response>), Error> {
    let header = decode_header(bytes)?;
    let order = ByteOrder::detect(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))?;
    let words = words_from_bytes(bytes, order)?;
    let packet_type = header.packet_type()?;
    if packet_type != PacketType::Control {
        return Err(Error::BadPacketType(packet_type as u8));
    }
    let mut responses = vec![];
    let mut rest = &words[1..];
    while let Some((&raw, tail)) = rest.split_first() {
        let txn = TransactionHeader::from_word(raw)?;
        if txn.version() != crate::PROTOCOL_VERSION {
            return Err(Error::BadVersion(txn.version()));
        }
        let kind = txn.kind()?;
        let info = txn.info()?;
        if info == InfoCode::Request {
            return Err(Error::NotAReply(txn.id()));
        }
        let n = if info == InfoCode::Success {
            kind.reply_payload(txn.words())
        } else {
            0
        };
        if tail.len() < n {
            return Err(Error::Incomplete);
        }
        responses.push(Response {
            id: txn.id(),
            kind,
            words: txn.words(),
            info,
            payload: tail[..n].to_vec(),
        });
        rest = &tail[n..];
    }
    trace!(
        packet_id = header.id(),
        records = responses.len(),
        "Decoded reply packet"
    );
    Ok((header, responses))
}
