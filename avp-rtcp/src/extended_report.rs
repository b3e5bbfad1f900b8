use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LENGTH, Header, PacketType, SSRC_LENGTH};

pub const BLOCK_TYPE_RECEIVER_REFERENCE_TIME: u8 = 4;
pub const BLOCK_TYPE_DLRR: u8 = 5;

const BLOCK_HEADER_LENGTH: usize = 4;

/// Receiver reference time report block, RFC 3611 §4.4.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReceiverReferenceTimeBlock {
    pub ntp_timestamp: u64,
}

/// One destination entry inside a DLRR block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DlrrReport {
    pub ssrc: u32,
    /// Middle 32 bits of the RRTR NTP timestamp being answered.
    pub last_rr: u32,
    /// Delay since that RRTR, in 1/65536-second units.
    pub dlrr: u32,
}

/// Delay since last receiver report block, RFC 3611 §4.5.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DlrrBlock {
    pub reports: Vec<DlrrReport>,
}

/// A block type this crate does not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownBlock {
    pub block_type: u8,
    pub type_specific: u8,
    pub block: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBlock {
    ReceiverReferenceTime(ReceiverReferenceTimeBlock),
    Dlrr(DlrrBlock),
    Unknown(UnknownBlock),
}

impl ReportBlock {
    fn body_size(&self) -> usize {
        match self {
            ReportBlock::ReceiverReferenceTime(_) => 8,
            ReportBlock::Dlrr(b) => b.reports.len() * 12,
            ReportBlock::Unknown(b) => b.block.len(),
        }
    }
}

/// RTCP extended report (XR) per RFC 3611.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedReport {
    pub sender_ssrc: u32,
    pub blocks: Vec<ReportBlock>,
}

impl ExtendedReport {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: 0,
            packet_type: PacketType::ExtendedReport,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for ExtendedReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + SSRC_LENGTH
            + self
                .blocks
                .iter()
                .map(|b| BLOCK_HEADER_LENGTH + b.body_size())
                .sum::<usize>()
    }
}

impl Marshal for ExtendedReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        for block in &self.blocks {
            if block.body_size() % 4 != 0 {
                return Err(Error::ErrWrongPayloadSize);
            }
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }

        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        for block in &self.blocks {
            let words = (block.body_size() / 4) as u16;
            match block {
                ReportBlock::ReceiverReferenceTime(b) => {
                    rest.put_u8(BLOCK_TYPE_RECEIVER_REFERENCE_TIME);
                    rest.put_u8(0);
                    rest.put_u16(words);
                    rest.put_u64(b.ntp_timestamp);
                }
                ReportBlock::Dlrr(b) => {
                    rest.put_u8(BLOCK_TYPE_DLRR);
                    rest.put_u8(0);
                    rest.put_u16(words);
                    for r in &b.reports {
                        rest.put_u32(r.ssrc);
                        rest.put_u32(r.last_rr);
                        rest.put_u32(r.dlrr);
                    }
                }
                ReportBlock::Unknown(b) => {
                    rest.put_u8(b.block_type);
                    rest.put_u8(b.type_specific);
                    rest.put_u16(words);
                    rest.put_slice(&b.block);
                }
            }
        }
        Ok(size)
    }
}

impl Unmarshal for ExtendedReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::ExtendedReport {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < SSRC_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let mut remaining = body_len - SSRC_LENGTH;
        let mut blocks = vec![];
        while remaining >= BLOCK_HEADER_LENGTH {
            let block_type = buf.get_u8();
            let type_specific = buf.get_u8();
            let block_len = buf.get_u16() as usize * 4;
            remaining -= BLOCK_HEADER_LENGTH;
            if remaining < block_len {
                return Err(Error::ErrPacketTooShort);
            }
            remaining -= block_len;

            match block_type {
                BLOCK_TYPE_RECEIVER_REFERENCE_TIME if block_len == 8 => {
                    blocks.push(ReportBlock::ReceiverReferenceTime(
                        ReceiverReferenceTimeBlock {
                            ntp_timestamp: buf.get_u64(),
                        },
                    ));
                }
                BLOCK_TYPE_DLRR if block_len % 12 == 0 => {
                    let mut reports = Vec::with_capacity(block_len / 12);
                    for _ in 0..block_len / 12 {
                        reports.push(DlrrReport {
                            ssrc: buf.get_u32(),
                            last_rr: buf.get_u32(),
                            dlrr: buf.get_u32(),
                        });
                    }
                    blocks.push(ReportBlock::Dlrr(DlrrBlock { reports }));
                }
                _ => {
                    blocks.push(ReportBlock::Unknown(UnknownBlock {
                        block_type,
                        type_specific,
                        block: buf.copy_to_bytes(block_len),
                    }));
                }
            }
        }
        buf.advance(remaining);

        Ok(ExtendedReport {
            sender_ssrc,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrtr_round_trip() {
        let xr = ExtendedReport {
            sender_ssrc: 0x902F9E2E,
            blocks: vec![ReportBlock::ReceiverReferenceTime(
                ReceiverReferenceTimeBlock {
                    ntp_timestamp: 0xDA8BD1FCDDDDA05A,
                },
            )],
        };
        let raw = xr.marshal().unwrap();
        assert_eq!(raw.len(), 4 + 4 + 4 + 8);
        let parsed = ExtendedReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, xr);
    }

    #[test]
    fn test_dlrr_round_trip() {
        let xr = ExtendedReport {
            sender_ssrc: 0x902F9E2E,
            blocks: vec![ReportBlock::Dlrr(DlrrBlock {
                reports: vec![DlrrReport {
                    ssrc: 0xBC5E9A40,
                    last_rr: 0xD1FCDDDD,
                    dlrr: 65536,
                }],
            })],
        };
        let raw = xr.marshal().unwrap();
        let parsed = ExtendedReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, xr);
    }

    #[test]
    fn test_unknown_block_preserved() {
        let xr = ExtendedReport {
            sender_ssrc: 1,
            blocks: vec![ReportBlock::Unknown(UnknownBlock {
                block_type: 6,
                type_specific: 0,
                block: Bytes::from_static(&[0; 8]),
            })],
        };
        let raw = xr.marshal().unwrap();
        let parsed = ExtendedReport::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, xr);
    }
}
