use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_NACK, HEADER_LENGTH, Header, PacketType};

/// A NACK pair: one lost packet id plus a bitmask covering the following 16
/// sequence numbers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct NackPair {
    pub packet_id: u16,
    pub lost_packets: u16,
}

impl NackPair {
    /// All sequence numbers this pair declares lost.
    pub fn packet_list(&self) -> Vec<u16> {
        let mut out = vec![self.packet_id];
        let mut mask = self.lost_packets;
        let mut i = 0u16;
        while mask != 0 {
            if mask & 1 != 0 {
                out.push(self.packet_id.wrapping_add(i + 1));
            }
            mask >>= 1;
            i += 1;
        }
        out
    }
}

/// Packs a sorted run of lost sequence numbers into the minimum set of NACK
/// pairs.
pub fn nack_pairs_from_sequence_numbers(seqs: &[u16]) -> Vec<NackPair> {
    let mut pairs: Vec<NackPair> = vec![];
    for &seq in seqs {
        match pairs.last_mut() {
            Some(pair) => {
                let distance = seq.wrapping_sub(pair.packet_id);
                if distance != 0 && distance <= 16 {
                    pair.lost_packets |= 1 << (distance - 1);
                    continue;
                }
                pairs.push(NackPair {
                    packet_id: seq,
                    lost_packets: 0,
                });
            }
            None => pairs.push(NackPair {
                packet_id: seq,
                lost_packets: 0,
            }),
        }
    }
    pairs
}

/// Transport-layer NACK per RFC 4585 §6.2.1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl TransportLayerNack {
    pub fn header(&self) -> Header {
        Header {
            padding: false,
            count: FORMAT_NACK,
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }
}

impl MarshalSize for TransportLayerNack {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.nacks.len() * 4
    }
}

impl Marshal for TransportLayerNack {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        rest.put_u32(self.media_ssrc);
        for pair in &self.nacks {
            rest.put_u16(pair.packet_id);
            rest.put_u16(pair.lost_packets);
        }
        Ok(size)
    }
}

impl Unmarshal for TransportLayerNack {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_NACK
        {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < 8 || (body_len - 8) % 4 != 0 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut nacks = Vec::with_capacity((body_len - 8) / 4);
        for _ in 0..(body_len - 8) / 4 {
            nacks.push(NackPair {
                packet_id: buf.get_u16(),
                lost_packets: buf.get_u16(),
            });
        }
        Ok(TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let nack = TransportLayerNack {
            sender_ssrc: 0x902F9E2E,
            media_ssrc: 0xBC5E9A40,
            nacks: vec![NackPair {
                packet_id: 1000,
                lost_packets: 0b0101_0101_0101_0101,
            }],
        };
        let raw = nack.marshal().unwrap();
        let parsed = TransportLayerNack::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, nack);
    }

    #[test]
    fn test_packet_list() {
        let pair = NackPair {
            packet_id: 100,
            lost_packets: 0b101,
        };
        assert_eq!(pair.packet_list(), vec![100, 101, 103]);
    }

    #[test]
    fn test_packet_list_wraps() {
        let pair = NackPair {
            packet_id: 65534,
            lost_packets: 0b11,
        };
        assert_eq!(pair.packet_list(), vec![65534, 65535, 0]);
    }

    #[test]
    fn test_pairs_from_sequence_numbers() {
        let pairs = nack_pairs_from_sequence_numbers(&[10, 11, 13, 40]);
        assert_eq!(
            pairs,
            vec![
                NackPair {
                    packet_id: 10,
                    lost_packets: 0b101,
                },
                NackPair {
                    packet_id: 40,
                    lost_packets: 0,
                },
            ]
        );
    }

    #[test]
    fn test_pairs_span_wraparound() {
        let pairs = nack_pairs_from_sequence_numbers(&[65535, 0, 1]);
        assert_eq!(
            pairs,
            vec![NackPair {
                packet_id: 65535,
                lost_packets: 0b11,
            }]
        );
    }
}
