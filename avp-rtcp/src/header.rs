use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const VERSION: u8 = 2;
pub const HEADER_LENGTH: usize = 4;
pub const SSRC_LENGTH: usize = 4;
pub const COUNT_MAX: u8 = (1 << 5) - 1;

// Transport-layer feedback message types (RFC 4585 / RFC 5104 / draft-tcc)
pub const FORMAT_NACK: u8 = 1;
pub const FORMAT_TMMBR: u8 = 3;
pub const FORMAT_TMMBN: u8 = 4;
pub const FORMAT_TCC: u8 = 15;

// Payload-specific feedback message types (RFC 4585 / RFC 5104)
pub const FORMAT_PLI: u8 = 1;
pub const FORMAT_FIR: u8 = 4;
pub const FORMAT_TSTR: u8 = 5;
pub const FORMAT_TSTN: u8 = 6;
pub const FORMAT_REMB: u8 = 15;

/// RTCP packet types per RFC 3550 §12.1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PacketType {
    #[default]
    Unsupported = 0,
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
    TransportSpecificFeedback = 205,
    PayloadSpecificFeedback = 206,
    ExtendedReport = 207,
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            205 => PacketType::TransportSpecificFeedback,
            206 => PacketType::PayloadSpecificFeedback,
            207 => PacketType::ExtendedReport,
            _ => PacketType::Unsupported,
        }
    }
}

/// The common four-byte prefix of every RTCP sub-packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub padding: bool,
    /// Report count or feedback message type, depending on packet type.
    pub count: u8,
    pub packet_type: PacketType,
    /// Packet length in 32-bit words, minus one.
    pub length: u16,
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl Marshal for Header {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < HEADER_LENGTH {
            return Err(Error::ErrBufferTooShort);
        }
        if self.count > COUNT_MAX {
            return Err(Error::ErrInvalidHeader);
        }
        buf.put_u8((VERSION << 6) | ((self.padding as u8) << 5) | self.count);
        buf.put_u8(self.packet_type as u8);
        buf.put_u16(self.length);
        Ok(HEADER_LENGTH)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let b0 = buf.get_u8();
        if b0 >> 6 != VERSION {
            return Err(Error::ErrBadVersion);
        }
        let padding = (b0 >> 5) & 0x1 == 1;
        let count = b0 & 0x1F;
        let packet_type = PacketType::from(buf.get_u8());
        let length = buf.get_u16();
        Ok(Header {
            padding,
            count,
            packet_type,
            length,
        })
    }
}
