use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_PLI, HEADER_LENGTH, Header, PacketType};

const PLI_LENGTH: usize = 2; // words of FCI-less feedback body

/// Picture loss indication per RFC 4585 §6.3.1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

impl PictureLossIndication {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_PLI,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: PLI_LENGTH as u16,
        }
    }
}

impl MarshalSize for PictureLossIndication {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + PLI_LENGTH * 4
    }
}

impl Marshal for PictureLossIndication {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        rest.put_u32(self.media_ssrc);
        Ok(size)
    }
}

impl Unmarshal for PictureLossIndication {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback || header.count != FORMAT_PLI
        {
            return Err(Error::ErrWrongType);
        }
        if buf.remaining() < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        Ok(PictureLossIndication {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}
