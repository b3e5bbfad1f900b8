use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TSTN, FORMAT_TSTR, HEADER_LENGTH, Header, PacketType};

/// One FCI entry of a temporal-spatial trade-off request or notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TstoEntry {
    pub ssrc: u32,
    /// Request sequence number, used to deduplicate repeats.
    pub sequence_number: u8,
    /// Trade-off index, 0 (favor spatial) .. 31 (favor temporal).
    pub index: u8,
}

/// Temporal-spatial trade-off request (TSTR) or notification (TSTN) per
/// RFC 5104 §4.3.2 / §4.3.3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemporalSpatialTradeOff {
    /// False for a request, true for the answering notification.
    pub notification: bool,
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<TstoEntry>,
}

impl TemporalSpatialTradeOff {
    fn format(&self) -> u8 {
        if self.notification {
            FORMAT_TSTN
        } else {
            FORMAT_TSTR
        }
    }

    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.format(),
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for TemporalSpatialTradeOff {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.entries.len() * 8
    }
}

impl Marshal for TemporalSpatialTradeOff {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        rest.put_u32(self.media_ssrc);
        for entry in &self.entries {
            rest.put_u32(entry.ssrc);
            rest.put_u8(entry.sequence_number);
            rest.put_u16(0);
            rest.put_u8(entry.index & 0x1F);
        }
        Ok(size)
    }
}

impl Unmarshal for TemporalSpatialTradeOff {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        let notification = match (header.packet_type, header.count) {
            (PacketType::PayloadSpecificFeedback, FORMAT_TSTR) => false,
            (PacketType::PayloadSpecificFeedback, FORMAT_TSTN) => true,
            _ => return Err(Error::ErrWrongType),
        };
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < 8 || (body_len - 8) % 8 != 0 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut entries = Vec::with_capacity((body_len - 8) / 8);
        for _ in 0..(body_len - 8) / 8 {
            let ssrc = buf.get_u32();
            let sequence_number = buf.get_u8();
            buf.advance(2);
            let index = buf.get_u8() & 0x1F;
            entries.push(TstoEntry {
                ssrc,
                sequence_number,
                index,
            });
        }
        Ok(TemporalSpatialTradeOff {
            notification,
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}
