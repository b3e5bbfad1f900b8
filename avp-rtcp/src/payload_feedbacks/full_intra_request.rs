use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_FIR, HEADER_LENGTH, Header, PacketType};

/// One FCI entry of a full intra request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FirEntry {
    pub ssrc: u32,
    /// Request sequence number; repeated requests reuse it so receivers can
    /// drop duplicates.
    pub sequence_number: u8,
}

/// Full intra request per RFC 5104 §4.3.1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub fir: Vec<FirEntry>,
}

impl FullIntraRequest {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_FIR,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for FullIntraRequest {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.fir.len() * 8
    }
}

impl Marshal for FullIntraRequest {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        rest.put_u32(self.media_ssrc);
        for entry in &self.fir {
            rest.put_u32(entry.ssrc);
            rest.put_u8(entry.sequence_number);
            rest.put_u8(0);
            rest.put_u16(0);
        }
        Ok(size)
    }
}

impl Unmarshal for FullIntraRequest {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_FIR
        {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < 8 || (body_len - 8) % 8 != 0 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut fir = Vec::with_capacity((body_len - 8) / 8);
        for _ in 0..(body_len - 8) / 8 {
            let ssrc = buf.get_u32();
            let sequence_number = buf.get_u8();
            buf.advance(3);
            fir.push(FirEntry {
                ssrc,
                sequence_number,
            });
        }
        Ok(FullIntraRequest {
            sender_ssrc,
            media_ssrc,
            fir,
        })
    }
}
