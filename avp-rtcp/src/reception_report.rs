use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const RECEPTION_REPORT_LENGTH: usize = 24;

/// One reception report block, as carried inside SR and RR packets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    /// The SSRC this report is about.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous SR/RR, in 1/256 units.
    pub fraction_lost: u8,
    /// Cumulative number of packets lost, 24 bits on the wire.
    pub total_lost: u32,
    /// Extended highest sequence number received (cycles << 16 | seq).
    pub last_sequence_number: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp of the last SR received.
    pub last_sender_report: u32,
    /// Delay since that SR, in 1/65536-second units.
    pub delay: u32,
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LENGTH
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < RECEPTION_REPORT_LENGTH {
            return Err(Error::ErrBufferTooShort);
        }
        if self.total_lost > 0x00FF_FFFF {
            return Err(Error::ErrInvalidTotalLost);
        }
        buf.put_u32(self.ssrc);
        buf.put_u8(self.fraction_lost);
        buf.put_u8(((self.total_lost >> 16) & 0xFF) as u8);
        buf.put_u16((self.total_lost & 0xFFFF) as u16);
        buf.put_u32(self.last_sequence_number);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sender_report);
        buf.put_u32(self.delay);
        Ok(RECEPTION_REPORT_LENGTH)
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < RECEPTION_REPORT_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let ssrc = buf.get_u32();
        let fraction_lost = buf.get_u8();
        let total_lost = ((buf.get_u8() as u32) << 16) | buf.get_u16() as u32;
        let last_sequence_number = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sender_report = buf.get_u32();
        let delay = buf.get_u32();
        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number,
            jitter,
            last_sender_report,
            delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let rr = ReceptionReport {
            ssrc: 0x902F9E2E,
            fraction_lost: 81,
            total_lost: 803,
            last_sequence_number: 0x46E1,
            jitter: 273,
            last_sender_report: 0x9F36432,
            delay: 150137,
        };
        let raw = rr.marshal().unwrap();
        let parsed = ReceptionReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn test_total_lost_overflow() {
        let rr = ReceptionReport {
            total_lost: 1 << 25,
            ..Default::default()
        };
        assert_eq!(rr.marshal(), Err(Error::ErrInvalidTotalLost));
    }
}
