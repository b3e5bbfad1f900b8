use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{COUNT_MAX, HEADER_LENGTH, Header, PacketType, SSRC_LENGTH};

/// RTCP goodbye per RFC 3550 §6.6.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Goodbye {
    /// The SSRC/CSRC values that are leaving.
    pub sources: Vec<u32>,
    /// Optional reason for leaving.
    pub reason: Bytes,
}

impl Goodbye {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.sources.len() as u8,
            packet_type: PacketType::Goodbye,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for Goodbye {
    fn marshal_size(&self) -> usize {
        let mut n = HEADER_LENGTH + self.sources.len() * SSRC_LENGTH;
        if !self.reason.is_empty() {
            n += (1 + self.reason.len()).div_ceil(4) * 4;
        }
        n
    }
}

impl Marshal for Goodbye {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.sources.len() > COUNT_MAX as usize {
            return Err(Error::ErrTooManySources);
        }
        if self.reason.len() > 255 {
            return Err(Error::ErrReasonTooLong);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }

        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        for source in &self.sources {
            rest.put_u32(*source);
        }
        if !self.reason.is_empty() {
            rest.put_u8(self.reason.len() as u8);
            rest.put_slice(&self.reason);
            let written = 1 + self.reason.len();
            for _ in written..written.div_ceil(4) * 4 {
                rest.put_u8(0);
            }
        }
        Ok(size)
    }
}

impl Unmarshal for Goodbye {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::Goodbye {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        let sources_len = header.count as usize * SSRC_LENGTH;
        if buf.remaining() < body_len || body_len < sources_len {
            return Err(Error::ErrPacketTooShort);
        }

        let mut sources = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            sources.push(buf.get_u32());
        }

        let mut reason = Bytes::new();
        let mut remaining = body_len - sources_len;
        if remaining > 0 {
            let len = buf.get_u8() as usize;
            remaining -= 1;
            if len > remaining {
                return Err(Error::ErrPacketTooShort);
            }
            reason = buf.copy_to_bytes(len);
            buf.advance(remaining - len);
        }

        Ok(Goodbye { sources, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_reason() {
        let bye = Goodbye {
            sources: vec![0x902F9E2E, 0xBC5E9A40],
            reason: Bytes::from_static(b"session ended"),
        };
        let raw = bye.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);
        let parsed = Goodbye::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, bye);
    }

    #[test]
    fn test_round_trip_without_reason() {
        let bye = Goodbye {
            sources: vec![0x1234],
            reason: Bytes::new(),
        };
        let raw = bye.marshal().unwrap();
        assert_eq!(raw.len(), 8);
        let parsed = Goodbye::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, bye);
    }

    #[test]
    fn test_reason_too_long() {
        let bye = Goodbye {
            sources: vec![],
            reason: Bytes::from(vec![b'x'; 256]),
        };
        assert_eq!(bye.marshal(), Err(Error::ErrReasonTooLong));
    }
}
