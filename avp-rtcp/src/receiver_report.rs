use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{COUNT_MAX, HEADER_LENGTH, Header, PacketType, SSRC_LENGTH};
use crate::reception_report::{RECEPTION_REPORT_LENGTH, ReceptionReport};

/// RTCP receiver report per RFC 3550 §6.4.2.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Bytes,
}

impl ReceiverReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + SSRC_LENGTH
            + self.reports.len() * RECEPTION_REPORT_LENGTH
            + self.profile_extensions.len()
    }
}

impl Marshal for ReceiverReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > COUNT_MAX as usize {
            return Err(Error::ErrTooManyReports);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }

        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.ssrc);

        let mut offset = n + SSRC_LENGTH;
        for report in &self.reports {
            let rn = report.marshal_to(&mut buf[offset..])?;
            offset += rn;
        }
        buf[offset..offset + self.profile_extensions.len()]
            .copy_from_slice(&self.profile_extensions);
        Ok(size)
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < SSRC_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }

        let ssrc = buf.get_u32();
        let reports_len = header.count as usize * RECEPTION_REPORT_LENGTH;
        if body_len < SSRC_LENGTH + reports_len {
            return Err(Error::ErrPacketTooShort);
        }
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let profile_extensions = buf.copy_to_bytes(body_len - SSRC_LENGTH - reports_len);

        Ok(ReceiverReport {
            ssrc,
            reports,
            profile_extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let rr = ReceiverReport {
            ssrc: 0x902F9E2E,
            reports: vec![
                ReceptionReport {
                    ssrc: 0xBC5E9A40,
                    fraction_lost: 10,
                    total_lost: 100,
                    last_sequence_number: 0x46E1,
                    jitter: 273,
                    last_sender_report: 0x9F36432,
                    delay: 150137,
                },
                ReceptionReport {
                    ssrc: 0xBC5E9A41,
                    ..Default::default()
                },
            ],
            profile_extensions: Bytes::new(),
        };
        let raw = rr.marshal().unwrap();
        let parsed = ReceiverReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn test_empty_placeholder() {
        // An empty RR is the mandatory first packet of feedback compounds.
        let rr = ReceiverReport {
            ssrc: 0x1234,
            ..Default::default()
        };
        let raw = rr.marshal().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(raw[0] & 0x1F, 0);
        let parsed = ReceiverReport::unmarshal(&mut raw.clone()).unwrap();
        assert!(parsed.reports.is_empty());
    }
}
