use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TMMBN, FORMAT_TMMBR, HEADER_LENGTH, Header, PacketType};

/// One bounding-set entry: maximum total media bitrate plus the per-packet
/// overhead already counted into it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TmmbEntry {
    pub ssrc: u32,
    /// Maximum total media bitrate in bits per second.
    pub bitrate: u64,
    /// Measured per-packet overhead in octets, 9 bits on the wire.
    pub overhead: u16,
}

impl TmmbEntry {
    fn exp_mantissa(&self) -> Result<(u8, u32)> {
        let mut exp = 0u8;
        let mut mantissa = self.bitrate;
        while mantissa >= (1 << 17) {
            mantissa >>= 1;
            exp += 1;
            if exp > 63 {
                return Err(Error::ErrBitrateOutOfRange);
            }
        }
        Ok((exp, mantissa as u32))
    }
}

/// Temporary maximum media stream bitrate request (TMMBR) or notification
/// (TMMBN) per RFC 5104 §4.2.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerTmmb {
    /// False for a request, true for the answering notification.
    pub notification: bool,
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<TmmbEntry>,
}

impl TransportLayerTmmb {
    fn format(&self) -> u8 {
        if self.notification {
            FORMAT_TMMBN
        } else {
            FORMAT_TMMBR
        }
    }

    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.format(),
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for TransportLayerTmmb {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.entries.len() * 8
    }
}

impl Marshal for TransportLayerTmmb {
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
            if entry.overhead > 0x1FF {
                return Err(Error::ErrWrongFeedbackFormat);
            }
            let (exp, mantissa) = entry.exp_mantissa()?;
            rest.put_u32(entry.ssrc);
            // MxTBR Exp(6) | Mantissa(17) | Overhead(9)
            let word = ((exp as u32) << 26) | (mantissa << 9) | entry.overhead as u32;
            rest.put_u32(word);
        }
        Ok(size)
    }
}

impl Unmarshal for TransportLayerTmmb {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        let notification = match (header.packet_type, header.count) {
            (PacketType::TransportSpecificFeedback, FORMAT_TMMBR) => false,
            (PacketType::TransportSpecificFeedback, FORMAT_TMMBN) => true,
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
            let word = buf.get_u32();
            let exp = (word >> 26) as u8;
            let mantissa = ((word >> 9) & 0x1FFFF) as u64;
            let overhead = (word & 0x1FF) as u16;
            entries.push(TmmbEntry {
                ssrc,
                bitrate: mantissa << exp,
                overhead,
            });
        }
        Ok(TransportLayerTmmb {
            notification,
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}
