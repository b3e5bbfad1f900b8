use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LENGTH, Header, PacketType, SSRC_LENGTH};

/// RTCP application-defined packet per RFC 3550 §6.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDefined {
    /// Application-defined subtype, 5 bits.
    pub sub_type: u8,
    pub ssrc: u32,
    /// Four ASCII characters identifying the application.
    pub name: [u8; 4],
    /// Application data, must be a multiple of 4 octets.
    pub data: Bytes,
}

impl Default for ApplicationDefined {
    fn default() -> Self {
        Self {
            sub_type: 0,
            ssrc: 0,
            name: *b"    ",
            data: Bytes::new(),
        }
    }
}

impl ApplicationDefined {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sub_type,
            packet_type: PacketType::ApplicationDefined,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ApplicationDefined {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + 4 + self.data.len()
    }
}

impl Marshal for ApplicationDefined {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.data.len() % 4 != 0 {
            return Err(Error::ErrAppDataNotAligned);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.ssrc);
        rest.put_slice(&self.name);
        rest.put_slice(&self.data);
        Ok(size)
    }
}

impl Unmarshal for ApplicationDefined {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ApplicationDefined {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        let ssrc = buf.get_u32();
        let mut name = [0u8; 4];
        buf.copy_to_slice(&mut name);
        let data = buf.copy_to_bytes(body_len - 8);
        Ok(ApplicationDefined {
            sub_type: header.count,
            ssrc,
            name,
            data,
        })
    }
}
