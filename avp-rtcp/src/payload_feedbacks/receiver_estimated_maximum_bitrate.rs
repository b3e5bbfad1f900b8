use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_REMB, HEADER_LENGTH, Header, PacketType};

const UNIQUE_IDENTIFIER: [u8; 4] = *b"REMB";

/// Receiver estimated maximum bitrate, the REMB application-layer feedback
/// message.
///
/// <https://tools.ietf.org/html/draft-alvestrand-rmcat-remb-03>
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverEstimatedMaximumBitrate {
    pub sender_ssrc: u32,
    /// Estimated maximum bitrate in bits per second.
    pub bitrate: u64,
    /// The SSRCs the estimate applies to.
    pub ssrcs: Vec<u32>,
}

impl ReceiverEstimatedMaximumBitrate {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_REMB,
            packet_type: PacketType::PayloadSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    /// Splits the bitrate into the 6-bit exponent and 18-bit mantissa used on
    /// the wire.
    fn exp_mantissa(&self) -> Result<(u8, u32)> {
        let mut exp = 0u8;
        let mut mantissa = self.bitrate;
        while mantissa >= (1 << 18) {
            mantissa >>= 1;
            exp += 1;
            if exp > 63 {
                return Err(Error::ErrBitrateOutOfRange);
            }
        }
        Ok((exp, mantissa as u32))
    }
}

impl MarshalSize for ReceiverEstimatedMaximumBitrate {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + 4 + 4 + self.ssrcs.len() * 4
    }
}

impl Marshal for ReceiverEstimatedMaximumBitrate {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let (exp, mantissa) = self.exp_mantissa()?;
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        rest.put_u32(0); // media SSRC is always zero for REMB
        rest.put_slice(&UNIQUE_IDENTIFIER);
        rest.put_u8(self.ssrcs.len() as u8);
        rest.put_u8(((exp << 2) | ((mantissa >> 16) as u8 & 0x03)) as u8);
        rest.put_u16((mantissa & 0xFFFF) as u16);
        for ssrc in &self.ssrcs {
            rest.put_u32(*ssrc);
        }
        Ok(size)
    }
}

impl Unmarshal for ReceiverEstimatedMaximumBitrate {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::PayloadSpecificFeedback
            || header.count != FORMAT_REMB
        {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < 16 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let _media_ssrc = buf.get_u32();
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != UNIQUE_IDENTIFIER {
            return Err(Error::ErrWrongFeedbackFormat);
        }
        let num_ssrcs = buf.get_u8() as usize;
        let b = buf.get_u8();
        let exp = b >> 2;
        let mantissa = (((b & 0x03) as u64) << 16) | buf.get_u16() as u64;
        let bitrate = if exp >= 46 {
            // would overflow; saturate
            u64::MAX
        } else {
            mantissa << exp
        };
        if body_len < 16 + num_ssrcs * 4 {
            return Err(Error::ErrPacketTooShort);
        }
        let mut ssrcs = Vec::with_capacity(num_ssrcs);
        for _ in 0..num_ssrcs {
            ssrcs.push(buf.get_u32());
        }
        Ok(ReceiverEstimatedMaximumBitrate {
            sender_ssrc,
            bitrate,
            ssrcs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let remb = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 8_927_168,
            ssrcs: vec![0x1215F16C],
        };
        let raw = remb.marshal().unwrap();
        let parsed = ReceiverEstimatedMaximumBitrate::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.sender_ssrc, remb.sender_ssrc);
        assert_eq!(parsed.ssrcs, remb.ssrcs);
        // mantissa truncation loses low bits only
        assert!(parsed.bitrate.abs_diff(remb.bitrate) < (remb.bitrate >> 17));
    }

    #[test]
    fn test_exact_when_mantissa_fits() {
        let remb = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            bitrate: 200_000,
            ssrcs: vec![],
        };
        let raw = remb.marshal().unwrap();
        let parsed = ReceiverEstimatedMaximumBitrate::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.bitrate, 200_000);
    }

    #[test]
    fn test_bad_magic() {
        let remb = ReceiverEstimatedMaximumBitrate::default();
        let mut raw = remb.marshal().unwrap().to_vec();
        raw[12] = b'X';
        assert_eq!(
            ReceiverEstimatedMaximumBitrate::unmarshal(&mut bytes::Bytes::from(raw)),
            Err(Error::ErrWrongFeedbackFormat)
        );
    }
}
