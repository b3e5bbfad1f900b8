use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{COUNT_MAX, HEADER_LENGTH, Header, PacketType};
use crate::reception_report::{RECEPTION_REPORT_LENGTH, ReceptionReport};

/// SSRC plus the five-word sender info block.
pub const SR_HEADER_LENGTH: usize = 24;

/// RTCP sender report per RFC 3550 §6.4.1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Wall clock at the moment of sending, full 64-bit NTP format.
    pub ntp_time: u64,
    /// The same instant expressed in RTP timestamp units.
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
    /// Profile-specific extension data, carried opaque.
    pub profile_extensions: Bytes,
}

impl SenderReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type: PacketType::SenderReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + SR_HEADER_LENGTH
            + self.reports.len() * RECEPTION_REPORT_LENGTH
            + self.profile_extensions.len()
    }
}

impl Marshal for SenderReport {
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
        rest.put_u64(self.ntp_time);
        rest.put_u32(self.rtp_time);
        rest.put_u32(self.packet_count);
        rest.put_u32(self.octet_count);

        let mut offset = n + SR_HEADER_LENGTH;
        for report in &self.reports {
            let rn = report.marshal_to(&mut buf[offset..])?;
            offset += rn;
        }
        buf[offset..offset + self.profile_extensions.len()]
            .copy_from_slice(&self.profile_extensions);
        Ok(size)
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < SR_HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }

        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();

        let reports_len = header.count as usize * RECEPTION_REPORT_LENGTH;
        if body_len < SR_HEADER_LENGTH + reports_len {
            return Err(Error::ErrPacketTooShort);
        }
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }
        let profile_extensions =
            buf.copy_to_bytes(body_len - SR_HEADER_LENGTH - reports_len);

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
            profile_extensions,
        })
    }
}
