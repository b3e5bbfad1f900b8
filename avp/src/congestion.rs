//! Transport-wide congestion feedback: tags outbound packets with a
//! session-scoped sequence number, records arrival times of tagged inbound
//! packets, and periodically folds them into transport-layer feedback
//! reports (draft-holmer-rmcat-transport-wide-cc-extensions).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rtcp::transport_feedbacks::transport_layer_cc::{
    PacketStatusChunk, RecvDelta, RunLengthChunk, StatusChunkTypeTcc, StatusVectorChunk,
    SymbolSizeTypeTcc, SymbolTypeTcc, TYPE_TCC_DELTA_SCALE_FACTOR, TransportLayerCc,
};

/// Arrival records older than this are dropped before building feedback.
const RECORD_WINDOW: Duration = Duration::from_millis(500);

/// How far back missing sequence numbers are reported.
const MAX_MISSING_RANGE: i64 = 0x7FFE;

const MAX_ONE_BIT_SYMBOLS: usize = 14;
const MAX_TWO_BIT_SYMBOLS: usize = 7;
const MAX_RUN_LENGTH: usize = 0x1FFF;

/// Widens 16-bit transport sequence numbers into a monotone i64 space.
#[derive(Debug, Default)]
struct SequenceUnwrapper {
    last: Option<i64>,
}

impl SequenceUnwrapper {
    fn unwrap(&mut self, seq: u16) -> i64 {
        let unwrapped = match self.last {
            None => seq as i64,
            Some(last) => {
                let mut diff = seq as i64 - (last & 0xFFFF);
                if diff > 0x8000 {
                    diff -= 0x10000;
                } else if diff < -0x8000 {
                    diff += 0x10000;
                }
                last + diff
            }
        };
        self.last = Some(unwrapped);
        unwrapped
    }
}

/// Per-session congestion state, behind the session lock.
#[derive(Debug)]
pub(crate) struct CongestionFeedbackHandler {
    created: Instant,
    next_transmit_sequence: u16,
    unwrapper: SequenceUnwrapper,
    /// Unwrapped sequence number to arrival time in microseconds.
    arrivals: BTreeMap<i64, i64>,
    feedback_count: u8,
}

impl CongestionFeedbackHandler {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            created: now,
            next_transmit_sequence: 0,
            unwrapper: SequenceUnwrapper::default(),
            arrivals: BTreeMap::new(),
            feedback_count: 0,
        }
    }

    /// The next strictly increasing transport-wide sequence number to stamp
    /// on an outbound packet.
    pub(crate) fn next_transmit_sequence(&mut self) -> u16 {
        let seq = self.next_transmit_sequence;
        self.next_transmit_sequence = self.next_transmit_sequence.wrapping_add(1);
        seq
    }

    pub(crate) fn has_arrivals(&self) -> bool {
        !self.arrivals.is_empty()
    }

    /// Records the arrival of a packet carrying a transport-wide sequence
    /// number. Only the first arrival of each sequence counts.
    pub(crate) fn record_arrival(&mut self, transport_sequence: u16, now: Instant) {
        let unwrapped = self.unwrapper.unwrap(transport_sequence);
        let arrival_us = now.saturating_duration_since(self.created).as_micros() as i64;
        self.arrivals.entry(unwrapped).or_insert(arrival_us);
    }

    /// Drains recorded arrivals into feedback packets. Several packets come
    /// back when a delta overflows 16 bits and forces a fresh reference time.
    pub(crate) fn build_feedback(
        &mut self,
        sender_ssrc: u32,
        media_ssrc: u32,
        now: Instant,
    ) -> Vec<TransportLayerCc> {
        let now_us = now.saturating_duration_since(self.created).as_micros() as i64;
        let horizon = now_us - RECORD_WINDOW.as_micros() as i64;
        self.arrivals.retain(|_, &mut at| at >= horizon);

        let mut feedbacks = vec![];
        let mut pending: Vec<(i64, i64)> = self.arrivals.iter().map(|(&s, &t)| (s, t)).collect();
        self.arrivals.clear();

        // limit how far back missing packets are reported
        if let Some(&(last_seq, _)) = pending.last() {
            pending.retain(|&(s, _)| s >= last_seq - MAX_MISSING_RANGE);
        }

        while !pending.is_empty() {
            let (first_seq, first_time) = pending[0];
            let mut builder = FeedbackBuilder::new(
                sender_ssrc,
                media_ssrc,
                self.feedback_count,
                first_seq as u16,
                first_time,
            );
            self.feedback_count = self.feedback_count.wrapping_add(1);

            let mut taken = 0;
            for &(seq, time) in &pending {
                if !builder.push_received(seq as u16, time) {
                    break;
                }
                taken += 1;
            }
            pending.drain(..taken);
            if taken == 0 {
                break;
            }
            feedbacks.push(builder.finish());
        }
        feedbacks
    }

    /// Interprets a received feedback packet about our own transmissions:
    /// returns `(sequence, delay since the first packet in the batch)` for
    /// each received packet, plus the sequence numbers reported missing.
    pub(crate) fn consume_feedback(
        tcc: &TransportLayerCc,
    ) -> (Vec<(u32, Duration)>, Vec<u32>) {
        let mut received = vec![];
        let mut lost = vec![];
        let mut seq = tcc.base_sequence_number as u32;
        let mut deltas = tcc.recv_deltas.iter();
        // reference time is in 64 ms units, deltas refine it
        let mut at_us = tcc.reference_time as i64 * 64_000;
        let mut first_us: Option<i64> = None;
        let mut remaining = tcc.packet_status_count;

        let mut symbols = vec![];
        for chunk in &tcc.packet_chunks {
            match chunk {
                PacketStatusChunk::RunLengthChunk(c) => {
                    for _ in 0..c.run_length {
                        symbols.push(c.packet_status_symbol);
                    }
                }
                PacketStatusChunk::StatusVectorChunk(c) => {
                    symbols.extend(c.symbol_list.iter().copied());
                }
            }
        }

        for symbol in symbols {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            match symbol {
                SymbolTypeTcc::PacketNotReceived => lost.push(seq),
                SymbolTypeTcc::PacketReceivedWithoutDelta => {}
                _ => {
                    if let Some(delta) = deltas.next() {
                        at_us += delta.delta;
                    }
                    let base = *first_us.get_or_insert(at_us);
                    let delay = (at_us - base).max(0) as u64;
                    received.push((seq, Duration::from_micros(delay)));
                }
            }
            seq = seq.wrapping_add(1) & 0xFFFF;
        }
        (received, lost)
    }
}

/// Accumulates one feedback packet's chunks and deltas.
struct FeedbackBuilder {
    sender_ssrc: u32,
    media_ssrc: u32,
    feedback_count: u8,
    base_sequence: u16,
    reference_time_64ms: i64,
    last_time_us: i64,
    next_sequence: u16,
    status_count: u16,
    run: SymbolRun,
    chunks: Vec<PacketStatusChunk>,
    deltas: Vec<RecvDelta>,
}

impl FeedbackBuilder {
    fn new(
        sender_ssrc: u32,
        media_ssrc: u32,
        feedback_count: u8,
        base_sequence: u16,
        first_time_us: i64,
    ) -> Self {
        let reference_time_64ms = first_time_us / 64_000;
        Self {
            sender_ssrc,
            media_ssrc,
            feedback_count,
            base_sequence,
            reference_time_64ms,
            last_time_us: reference_time_64ms * 64_000,
            next_sequence: base_sequence,
            status_count: 0,
            run: SymbolRun::default(),
            chunks: vec![],
            deltas: vec![],
        }
    }

    /// Appends one received packet, first padding the not-received range up
    /// to it. Returns false when the time delta no longer fits 16 bits and
    /// the packet must start a new feedback.
    fn push_received(&mut self, sequence: u16, time_us: i64) -> bool {
        let delta_us = time_us - self.last_time_us;
        let half = TYPE_TCC_DELTA_SCALE_FACTOR / 2;
        let delta_250us = if delta_us >= 0 {
            (delta_us + half) / TYPE_TCC_DELTA_SCALE_FACTOR
        } else {
            (delta_us - half) / TYPE_TCC_DELTA_SCALE_FACTOR
        };
        if delta_250us < i16::MIN as i64 || delta_250us > i16::MAX as i64 {
            return false;
        }

        while self.next_sequence != sequence {
            self.push_symbol(SymbolTypeTcc::PacketNotReceived);
        }

        let symbol = if (0..=0xFF).contains(&delta_250us) {
            SymbolTypeTcc::PacketReceivedSmallDelta
        } else {
            SymbolTypeTcc::PacketReceivedLargeDelta
        };
        self.push_symbol(symbol);
        let rounded = delta_250us * TYPE_TCC_DELTA_SCALE_FACTOR;
        self.deltas.push(RecvDelta {
            type_tcc: symbol,
            delta: rounded,
        });
        self.last_time_us += rounded;
        true
    }

    fn push_symbol(&mut self, symbol: SymbolTypeTcc) {
        if !self.run.fits(symbol) {
            self.chunks.push(self.run.encode());
        }
        self.run.push(symbol);
        self.status_count += 1;
        self.next_sequence = self.next_sequence.wrapping_add(1);
    }

    fn finish(mut self) -> TransportLayerCc {
        while !self.run.symbols.is_empty() {
            self.chunks.push(self.run.encode());
        }
        TransportLayerCc {
            sender_ssrc: self.sender_ssrc,
            media_ssrc: self.media_ssrc,
            base_sequence_number: self.base_sequence,
            packet_status_count: self.status_count,
            reference_time: self.reference_time_64ms as u32,
            fb_pkt_count: self.feedback_count,
            packet_chunks: self.chunks,
            recv_deltas: self.deltas,
        }
    }
}

/// A run of status symbols not yet committed to a chunk. Encodes as a
/// run-length chunk while uniform, otherwise as one- or two-bit status
/// vectors.
#[derive(Default)]
struct SymbolRun {
    symbols: Vec<SymbolTypeTcc>,
    mixed: bool,
    has_large: bool,
}

impl SymbolRun {
    fn fits(&self, symbol: SymbolTypeTcc) -> bool {
        if self.symbols.len() < MAX_TWO_BIT_SYMBOLS {
            return true;
        }
        if self.symbols.len() < MAX_ONE_BIT_SYMBOLS
            && !self.has_large
            && symbol != SymbolTypeTcc::PacketReceivedLargeDelta
        {
            return true;
        }
        self.symbols.len() < MAX_RUN_LENGTH && !self.mixed && symbol == self.symbols[0]
    }

    fn push(&mut self, symbol: SymbolTypeTcc) {
        if !self.symbols.is_empty() && symbol != self.symbols[0] {
            self.mixed = true;
        }
        if symbol == SymbolTypeTcc::PacketReceivedLargeDelta {
            self.has_large = true;
        }
        self.symbols.push(symbol);
    }

    fn encode(&mut self) -> PacketStatusChunk {
        if !self.mixed {
            let chunk = PacketStatusChunk::RunLengthChunk(RunLengthChunk {
                type_tcc: StatusChunkTypeTcc::RunLengthChunk,
                packet_status_symbol: self.symbols[0],
                run_length: self.symbols.len() as u16,
            });
            self.reset();
            return chunk;
        }

        if self.symbols.len() == MAX_ONE_BIT_SYMBOLS {
            let chunk = PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::OneBit,
                symbol_list: self.symbols.clone(),
            });
            self.reset();
            return chunk;
        }

        let take = MAX_TWO_BIT_SYMBOLS.min(self.symbols.len());
        let chunk = PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
            type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
            symbol_size: SymbolSizeTypeTcc::TwoBit,
            symbol_list: self.symbols[..take].to_vec(),
        });
        self.symbols = self.symbols[take..].to_vec();
        self.mixed = false;
        self.has_large = false;
        if let Some(&first) = self.symbols.first() {
            for &s in &self.symbols {
                if s != first {
                    self.mixed = true;
                }
                if s == SymbolTypeTcc::PacketReceivedLargeDelta {
                    self.has_large = true;
                }
            }
        }
        chunk
    }

    fn reset(&mut self) {
        self.symbols.clear();
        self.mixed = false;
        self.has_large = false;
    }
}
