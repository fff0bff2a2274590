//! Bit layouts of the packet and transaction headers.
//!
//! Both headers are single 32-bit words. The layouts are defined here with `packed_struct` in
//! `lsb0` numbering, so the bit ranges read the same as the IPbus 2.0 documentation.

use crate::{
    Error,
    PROTOCOL_VERSION,
    TRANSACTION_ID_MASK,
};
use num_derive::{
    FromPrimitive,
    ToPrimitive,
};
use num_traits::{
    FromPrimitive,
    ToPrimitive,
};
use packed_struct::prelude::*;

/// The byte-order qualifier nibble of a packet header as seen in the sender's byte order
pub const BYTE_ORDER_QUALIFIER: u8 = 0xf;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PacketType {
    Control = 0,
    Status = 1,
    Resend = 2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum TransactionType {
    Read = 0,
    Write = 1,
    NonIncrementingRead = 2,
    NonIncrementingWrite = 3,
    RmwBits = 4,
    RmwSum = 5,
    ConfigRead = 6,
    ConfigWrite = 7,
}

impl TransactionType {
    /// Number of words following the address in a request of this type
    #[must_use]
    pub fn request_payload(self, words: u8) -> usize {
        match self {
            Self::Read | Self::NonIncrementingRead | Self::ConfigRead => 0,
            Self::Write | Self::NonIncrementingWrite | Self::ConfigWrite => usize::from(words),
            Self::RmwBits => 2,
            Self::RmwSum => 1,
        }
    }

    /// Number of words following the header in a *successful* reply of this type
    #[must_use]
    pub fn reply_payload(self, words: u8) -> usize {
        match self {
            Self::Read | Self::NonIncrementingRead | Self::ConfigRead => usize::from(words),
            Self::Write | Self::NonIncrementingWrite | Self::ConfigWrite => 0,
            Self::RmwBits | Self::RmwSum => 1,
        }
    }
}

/// The status reported by the endpoint for each transaction
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum InfoCode {
    #[error("Success")]
    Success = 0,
    #[error("Bad transaction header")]
    BadHeader = 1,
    #[error("Bus error on read")]
    BusErrorRead = 4,
    #[error("Bus error on write")]
    BusErrorWrite = 5,
    #[error("Bus timeout on read")]
    BusTimeoutRead = 6,
    #[error("Bus timeout on write")]
    BusTimeoutWrite = 7,
    #[error("Outbound request")]
    Request = 0xf,
}

#[derive(PackedStruct, Debug, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
pub struct PacketHeader {
    #[packed_field(bits = "28..=31")]
    version: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "8..=23", endian = "msb")]
    id: u16,
    #[packed_field(bits = "4..=7")]
    byte_order: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "0..=3")]
    packet_type: Integer<u8, packed_bits::Bits<4>>,
}

impl PacketHeader {
    #[must_use]
    pub fn new(id: u16, packet_type: PacketType) -> Self {
        Self {
            version: PROTOCOL_VERSION.into(),
            id,
            byte_order: BYTE_ORDER_QUALIFIER.into(),
            packet_type: packet_type
                .to_u8()
                .expect("Packet types always fit in a u8")
                .into(),
        }
    }

    /// The header of a control packet, the only kind that carries transactions
    #[must_use]
    pub fn control(id: u16) -> Self {
        Self::new(id, PacketType::Control)
    }

    /// Unpack a header word, checking the version and byte-order qualifier
    /// # Errors
    /// Returns an error if the word isn't an IPbus 2.0 packet header
    pub fn from_word(word: u32) -> Result<Self, Error> {
        let header = Self::unpack(&word.to_be_bytes()).map_err(Error::Packing)?;
        if header.version() != PROTOCOL_VERSION {
            return Err(Error::BadVersion(header.version()));
        }
        if *header.byte_order != BYTE_ORDER_QUALIFIER {
            return Err(Error::BadByteOrder(word));
        }
        Ok(header)
    }

    /// Pack into a single word
    /// # Errors
    /// Returns an error if packing fails
    pub fn to_word(&self) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.pack().map_err(Error::Packing)?))
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        *self.version
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// # Errors
    /// Returns an error on packet types this crate doesn't know about
    pub fn packet_type(&self) -> Result<PacketType, Error> {
        PacketType::from_u8(*self.packet_type).ok_or(Error::BadPacketType(*self.packet_type))
    }
}

#[derive(PackedStruct, Debug, Copy, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4")]
pub struct TransactionHeader {
    #[packed_field(bits = "28..=31")]
    version: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "16..=27", endian = "msb")]
    id: Integer<u16, packed_bits::Bits<12>>,
    #[packed_field(bits = "8..=15")]
    words: u8,
    #[packed_field(bits = "4..=7")]
    type_id: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "0..=3")]
    info_code: Integer<u8, packed_bits::Bits<4>>,
}

impl TransactionHeader {
    /// Build a header. The id is truncated to its 12 bits.
    #[must_use]
    pub fn new(id: u16, kind: TransactionType, words: u8, info: InfoCode) -> Self {
        Self {
            version: PROTOCOL_VERSION.into(),
            id: (id & TRANSACTION_ID_MASK).into(),
            words,
            type_id: kind
                .to_u8()
                .expect("Transaction types always fit in a u8")
                .into(),
            info_code: info.to_u8().expect("Info codes always fit in a u8").into(),
        }
    }

    #[must_use]
    pub fn request(id: u16, kind: TransactionType, words: u8) -> Self {
        Self::new(id, kind, words, InfoCode::Request)
    }

    /// Unpack a header word without interpreting the type or info fields, as the endpoint
    /// has to answer malformed headers instead of rejecting them
    /// # Errors
    /// Returns an error if unpacking fails
    pub fn from_word(word: u32) -> Result<Self, Error> {
        Self::unpack(&word.to_be_bytes()).map_err(Error::Packing)
    }

    /// Pack into a single word
    /// # Errors
    /// Returns an error if packing fails
    pub fn to_word(&self) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.pack().map_err(Error::Packing)?))
    }

    /// The same header with its info code replaced, as used to build a reply
    #[must_use]
    pub fn with_info(mut self, info: InfoCode) -> Self {
        self.info_code = info.to_u8().expect("Info codes always fit in a u8").into();
        self
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        *self.version
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        *self.id
    }

    #[must_use]
    pub fn words(&self) -> u8 {
        self.words
    }

    #[must_use]
    pub fn type_id(&self) -> u8 {
        *self.type_id
    }

    #[must_use]
    pub fn info_code(&self) -> u8 {
        *self.info_code
    }

    /// # Errors
    /// Returns an error on unknown transaction types
    pub fn kind(&self) -> Result<TransactionType, Error> {
        TransactionType::from_u8(self.type_id()).ok_or(Error::BadTransactionType(self.type_id()))
    }

    /// # Errors
    /// Returns an error on unknown info codes
    pub fn info(&self) -> Result<InfoCode, Error> {
        InfoCode::from_u8(self.info_code()).ok_or(Error::BadInfoCode(self.info_code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_control_header() {
        let word = PacketHeader::control(0x1234).to_word().unwrap();
        assert_eq!(word, 0x2012_34f0);
    }

    #[test]
    fn test_unpack_control_header() {
        let header = PacketHeader::from_word(0x2000_07f0).unwrap();
        assert_eq!(header.id(), 7);
        assert_eq!(header.packet_type().unwrap(), PacketType::Control);
    }

    #[test]
    fn test_reject_swapped_packet_header() {
        let word = PacketHeader::control(1).to_word().unwrap().swap_bytes();
        assert!(PacketHeader::from_word(word).is_err());
    }

    #[test]
    fn test_pack_status_header() {
        let word = PacketHeader::new(0, PacketType::Status).to_word().unwrap();
        assert_eq!(word, 0x2000_00f1);
    }

    #[test]
    fn test_pack_transaction_header() {
        let header = TransactionHeader::request(0xabc, TransactionType::RmwBits, 1);
        assert_eq!(header.to_word().unwrap(), 0x2abc_014f);
    }

    #[test]
    fn test_transaction_id_truncated() {
        let header = TransactionHeader::request(0x1001, TransactionType::Read, 4);
        assert_eq!(header.id(), 0x001);
        assert_eq!(header.to_word().unwrap(), 0x2001_040f);
    }

    #[test]
    fn test_unpack_transaction_header() {
        let header = TransactionHeader::from_word(0x2005_ff30).unwrap();
        assert_eq!(header.version(), 2);
        assert_eq!(header.id(), 5);
        assert_eq!(header.words(), 0xff);
        assert_eq!(header.kind().unwrap(), TransactionType::NonIncrementingWrite);
        assert_eq!(header.info().unwrap(), InfoCode::Success);
    }

    #[test]
    fn test_with_info() {
        let header = TransactionHeader::request(3, TransactionType::Write, 2)
            .with_info(InfoCode::BusErrorWrite);
        assert_eq!(header.to_word().unwrap(), 0x2003_0215);
    }

    #[test]
    fn test_unknown_type() {
        let header = TransactionHeader::from_word(0x2000_01af).unwrap();
        assert!(matches!(header.kind(), Err(Error::BadTransactionType(0xa))));
    }

    #[test]
    fn test_payload_lengths() {
        assert_eq!(TransactionType::Write.request_payload(4), 4);
        assert_eq!(TransactionType::Read.request_payload(4), 0);
        assert_eq!(TransactionType::RmwBits.request_payload(1), 2);
        assert_eq!(TransactionType::NonIncrementingRead.reply_payload(4), 4);
        assert_eq!(TransactionType::RmwSum.reply_payload(1), 1);
        assert_eq!(TransactionType::ConfigWrite.reply_payload(3), 0);
    }
}
