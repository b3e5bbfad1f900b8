use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{COUNT_MAX, HEADER_LENGTH, Header, PacketType};

pub const SDES_MAX_OCTET_COUNT: usize = (1 << 8) - 1;

/// SDES item types per RFC 3550 §12.2.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SdesType {
    #[default]
    SdesEnd = 0,
    SdesCname = 1,
    SdesName = 2,
    SdesEmail = 3,
    SdesPhone = 4,
    SdesLocation = 5,
    SdesTool = 6,
    SdesNote = 7,
    SdesPrivate = 8,
}

impl From<u8> for SdesType {
    fn from(b: u8) -> Self {
        match b {
            1 => SdesType::SdesCname,
            2 => SdesType::SdesName,
            3 => SdesType::SdesEmail,
            4 => SdesType::SdesPhone,
            5 => SdesType::SdesLocation,
            6 => SdesType::SdesTool,
            7 => SdesType::SdesNote,
            8 => SdesType::SdesPrivate,
            _ => SdesType::SdesEnd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescriptionItem {
    pub sdes_type: SdesType,
    pub text: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    fn raw_size(&self) -> usize {
        // source + items + null terminator
        4 + self
            .items
            .iter()
            .map(|item| 2 + item.text.len())
            .sum::<usize>()
            + 1
    }

    fn size(&self) -> usize {
        self.raw_size().div_ceil(4) * 4
    }
}

/// RTCP source description per RFC 3550 §6.5.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

impl SourceDescription {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type: PacketType::SourceDescription,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.chunks.iter().map(|c| c.size()).sum::<usize>()
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.chunks.len() > COUNT_MAX as usize {
            return Err(Error::ErrTooManyChunks);
        }
        for chunk in &self.chunks {
            for item in &chunk.items {
                if item.text.len() > SDES_MAX_OCTET_COUNT {
                    return Err(Error::ErrSdesTextTooLong);
                }
            }
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }

        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        for chunk in &self.chunks {
            rest.put_u32(chunk.source);
            for item in &chunk.items {
                rest.put_u8(item.sdes_type as u8);
                rest.put_u8(item.text.len() as u8);
                rest.put_slice(&item.text);
            }
            // null item, then pad the chunk to a word boundary
            for _ in chunk.raw_size() - 1..chunk.size() {
                rest.put_u8(SdesType::SdesEnd as u8);
            }
        }
        Ok(size)
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len {
            return Err(Error::ErrPacketTooShort);
        }

        let mut chunks = Vec::with_capacity(header.count as usize);
        let mut remaining = body_len;
        for _ in 0..header.count {
            if remaining < 4 {
                return Err(Error::ErrPacketTooShort);
            }
            let source = buf.get_u32();
            remaining -= 4;

            let mut items = vec![];
            loop {
                if remaining < 1 {
                    return Err(Error::ErrPacketTooShort);
                }
                let t = SdesType::from(buf.get_u8());
                remaining -= 1;
                if t == SdesType::SdesEnd {
                    // consume chunk padding
                    let consumed = body_len - remaining;
                    let pad = consumed.div_ceil(4) * 4 - consumed;
                    if remaining < pad {
                        return Err(Error::ErrPacketTooShort);
                    }
                    buf.advance(pad);
                    remaining -= pad;
                    break;
                }
                if remaining < 1 {
                    return Err(Error::ErrPacketTooShort);
                }
                let len = buf.get_u8() as usize;
                remaining -= 1;
                if remaining < len {
                    return Err(Error::ErrPacketTooShort);
                }
                let text = buf.copy_to_bytes(len);
                remaining -= len;
                items.push(SourceDescriptionItem { sdes_type: t, text });
            }
            chunks.push(SourceDescriptionChunk { source, items });
        }
        // trailing padding beyond the last chunk
        buf.advance(remaining);

        Ok(SourceDescription { chunks })
    }
}
