use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TCC, HEADER_LENGTH, Header, PacketType};

/// Delta fields are in multiples of 250 microseconds.
pub const TYPE_TCC_DELTA_SCALE_FACTOR: i64 = 250;

/// Reference time is in multiples of 64 milliseconds.
pub const TYPE_TCC_REFERENCE_TIME_UNIT_MS: u64 = 64;

const PACKET_STATUS_CHUNK_LENGTH: usize = 2;
const MAX_RUN_LENGTH: u16 = 0x1FFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum StatusChunkTypeTcc {
    #[default]
    RunLengthChunk = 0,
    StatusVectorChunk = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SymbolTypeTcc {
    #[default]
    PacketNotReceived = 0,
    PacketReceivedSmallDelta = 1,
    PacketReceivedLargeDelta = 2,
    PacketReceivedWithoutDelta = 3,
}

impl From<u16> for SymbolTypeTcc {
    fn from(v: u16) -> Self {
        match v & 0x3 {
            1 => SymbolTypeTcc::PacketReceivedSmallDelta,
            2 => SymbolTypeTcc::PacketReceivedLargeDelta,
            3 => SymbolTypeTcc::PacketReceivedWithoutDelta,
            _ => SymbolTypeTcc::PacketNotReceived,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SymbolSizeTypeTcc {
    #[default]
    OneBit = 0,
    TwoBit = 1,
}

/// A run of identical statuses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunLengthChunk {
    pub type_tcc: StatusChunkTypeTcc,
    pub packet_status_symbol: SymbolTypeTcc,
    /// 13 bits.
    pub run_length: u16,
}

/// Individual statuses, 14 one-bit or 7 two-bit symbols.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusVectorChunk {
    pub type_tcc: StatusChunkTypeTcc,
    pub symbol_size: SymbolSizeTypeTcc,
    pub symbol_list: Vec<SymbolTypeTcc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketStatusChunk {
    RunLengthChunk(RunLengthChunk),
    StatusVectorChunk(StatusVectorChunk),
}

impl PacketStatusChunk {
    /// How many packet statuses this chunk covers.
    pub fn status_count(&self) -> u16 {
        match self {
            PacketStatusChunk::RunLengthChunk(c) => c.run_length,
            PacketStatusChunk::StatusVectorChunk(c) => c.symbol_list.len() as u16,
        }
    }

    fn encode(&self) -> Result<u16> {
        match self {
            PacketStatusChunk::RunLengthChunk(c) => {
                if c.run_length > MAX_RUN_LENGTH {
                    return Err(Error::ErrPacketStatusChunkLength);
                }
                Ok(((c.packet_status_symbol as u16) << 13) | c.run_length)
            }
            PacketStatusChunk::StatusVectorChunk(c) => {
                let mut word = 1u16 << 15;
                match c.symbol_size {
                    SymbolSizeTypeTcc::OneBit => {
                        if c.symbol_list.len() != 14 {
                            return Err(Error::ErrPacketStatusChunkLength);
                        }
                        for (i, s) in c.symbol_list.iter().enumerate() {
                            let bit = match s {
                                SymbolTypeTcc::PacketNotReceived => 0u16,
                                SymbolTypeTcc::PacketReceivedSmallDelta => 1,
                                _ => return Err(Error::ErrPacketStatusChunkLength),
                            };
                            word |= bit << (13 - i);
                        }
                    }
                    SymbolSizeTypeTcc::TwoBit => {
                        if c.symbol_list.len() != 7 {
                            return Err(Error::ErrPacketStatusChunkLength);
                        }
                        word |= 1 << 14;
                        for (i, s) in c.symbol_list.iter().enumerate() {
                            word |= (*s as u16) << (12 - 2 * i);
                        }
                    }
                }
                Ok(word)
            }
        }
    }

    fn decode(word: u16) -> Self {
        if word >> 15 == 0 {
            PacketStatusChunk::RunLengthChunk(RunLengthChunk {
                type_tcc: StatusChunkTypeTcc::RunLengthChunk,
                packet_status_symbol: SymbolTypeTcc::from(word >> 13),
                run_length: word & MAX_RUN_LENGTH,
            })
        } else if (word >> 14) & 0x1 == 0 {
            let symbol_list = (0..14)
                .map(|i| {
                    if (word >> (13 - i)) & 0x1 == 1 {
                        SymbolTypeTcc::PacketReceivedSmallDelta
                    } else {
                        SymbolTypeTcc::PacketNotReceived
                    }
                })
                .collect();
            PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::OneBit,
                symbol_list,
            })
        } else {
            let symbol_list = (0..7)
                .map(|i| SymbolTypeTcc::from(word >> (12 - 2 * i)))
                .collect();
            PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::TwoBit,
                symbol_list,
            })
        }
    }
}

/// One receive-time delta, in microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecvDelta {
    pub type_tcc: SymbolTypeTcc,
    pub delta: i64,
}

impl RecvDelta {
    fn wire_size(&self) -> usize {
        match self.type_tcc {
            SymbolTypeTcc::PacketReceivedSmallDelta => 1,
            SymbolTypeTcc::PacketReceivedLargeDelta => 2,
            _ => 0,
        }
    }
}

/// Transport-wide congestion control feedback.
///
/// <https://tools.ietf.org/html/draft-holmer-rmcat-transport-wide-cc-extensions-01>
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportLayerCc {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub packet_status_count: u16,
    /// 24 bits, in 64 ms units.
    pub reference_time: u32,
    pub fb_pkt_count: u8,
    pub packet_chunks: Vec<PacketStatusChunk>,
    pub recv_deltas: Vec<RecvDelta>,
}

impl TransportLayerCc {
    pub fn header(&self) -> Header {
        Header {
            padding: self.padding_len() > 0,
            count: FORMAT_TCC,
            packet_type: PacketType::TransportSpecificFeedback,
            length: ((self.marshal_size() / 4) - 1) as u16,
        }
    }

    fn payload_len(&self) -> usize {
        8 + 8
            + self.packet_chunks.len() * PACKET_STATUS_CHUNK_LENGTH
            + self.recv_deltas.iter().map(|d| d.wire_size()).sum::<usize>()
    }

    fn padding_len(&self) -> usize {
        self.payload_len().div_ceil(4) * 4 - self.payload_len()
    }
}

impl MarshalSize for TransportLayerCc {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.payload_len() + self.padding_len()
    }
}

impl Marshal for TransportLayerCc {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrBufferTooShort);
        }
        let n = self.header().marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        rest.put_u32(self.sender_ssrc);
        rest.put_u32(self.media_ssrc);
        rest.put_u16(self.base_sequence_number);
        rest.put_u16(self.packet_status_count);
        rest.put_u8(((self.reference_time >> 16) & 0xFF) as u8);
        rest.put_u16((self.reference_time & 0xFFFF) as u16);
        rest.put_u8(self.fb_pkt_count);
        for chunk in &self.packet_chunks {
            rest.put_u16(chunk.encode()?);
        }
        for delta in &self.recv_deltas {
            let scaled = delta.delta / TYPE_TCC_DELTA_SCALE_FACTOR;
            match delta.type_tcc {
                SymbolTypeTcc::PacketReceivedSmallDelta => {
                    if !(0..=255).contains(&scaled) {
                        return Err(Error::ErrDeltaExceedLimit);
                    }
                    rest.put_u8(scaled as u8);
                }
                SymbolTypeTcc::PacketReceivedLargeDelta => {
                    if !(i16::MIN as i64..=i16::MAX as i64).contains(&scaled) {
                        return Err(Error::ErrDeltaExceedLimit);
                    }
                    rest.put_i16(scaled as i16);
                }
                _ => {}
            }
        }
        let pad = self.padding_len();
        for i in 0..pad {
            rest.put_u8(if i == pad - 1 { pad as u8 } else { 0 });
        }
        Ok(size)
    }
}

impl Unmarshal for TransportLayerCc {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type != PacketType::TransportSpecificFeedback
            || header.count != FORMAT_TCC
        {
            return Err(Error::ErrWrongType);
        }
        let body_len = (header.length as usize) * 4;
        if buf.remaining() < body_len || body_len < 16 {
            return Err(Error::ErrPacketTooShort);
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence_number = buf.get_u16();
        let packet_status_count = buf.get_u16();
        let reference_time = ((buf.get_u8() as u32) << 16) | buf.get_u16() as u32;
        let fb_pkt_count = buf.get_u8();

        let mut remaining = body_len - 16;
        let mut packet_chunks = vec![];
        let mut statuses = 0u16;
        while statuses < packet_status_count {
            if remaining < PACKET_STATUS_CHUNK_LENGTH {
                return Err(Error::ErrPacketTooShort);
            }
            let chunk = PacketStatusChunk::decode(buf.get_u16());
            remaining -= PACKET_STATUS_CHUNK_LENGTH;
            statuses = statuses.saturating_add(chunk.status_count());
            packet_chunks.push(chunk);
        }

        let mut symbols = vec![];
        for chunk in &packet_chunks {
            match chunk {
                PacketStatusChunk::RunLengthChunk(c) => {
                    for _ in 0..c.run_length {
                        symbols.push(c.packet_status_symbol);
                    }
                }
                PacketStatusChunk::StatusVectorChunk(c) => {
                    symbols.extend_from_slice(&c.symbol_list);
                }
            }
        }
        symbols.truncate(packet_status_count as usize);

        let mut recv_deltas = vec![];
        for symbol in symbols {
            match symbol {
                SymbolTypeTcc::PacketReceivedSmallDelta => {
                    if remaining < 1 {
                        return Err(Error::ErrPacketTooShort);
                    }
                    recv_deltas.push(RecvDelta {
                        type_tcc: symbol,
                        delta: buf.get_u8() as i64 * TYPE_TCC_DELTA_SCALE_FACTOR,
                    });
                    remaining -= 1;
                }
                SymbolTypeTcc::PacketReceivedLargeDelta => {
                    if remaining < 2 {
                        return Err(Error::ErrPacketTooShort);
                    }
                    recv_deltas.push(RecvDelta {
                        type_tcc: symbol,
                        delta: buf.get_i16() as i64 * TYPE_TCC_DELTA_SCALE_FACTOR,
                    });
                    remaining -= 2;
                }
                _ => {}
            }
        }
        // trailing padding
        buf.advance(remaining);

        Ok(TransportLayerCc {
            sender_ssrc,
            media_ssrc,
            base_sequence_number,
            packet_status_count,
            reference_time,
            fb_pkt_count,
            packet_chunks,
            recv_deltas,
        })
    }
}
