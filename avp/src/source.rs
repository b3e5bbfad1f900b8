//! Per-SSRC state: sequencing, loss and reorder recovery, jitter, interval
//! statistics, report bookkeeping and the retransmission buffer.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::Rng;

use rtcp::reception_report::ReceptionReport;
use rtp::extension::abs_send_time_extension::AbsSendTimeExtension;
use rtp::extension::transport_cc_extension::TransportCcExtension;
use shared::error::Result;
use shared::marshal::Marshal;
use shared::time::{SystemInstant, dlsr_to_duration, duration_to_dlsr, ntp_middle32};

use crate::config::{
    LATE_OOO_ADAPT_MAX, LATE_OOO_PERIOD, LATE_OOO_WAIT_BOOST, MediaKind, SEQ_REORDER_THRESHOLD,
    SEQ_RESTART_COUNT, SEQ_RESTART_PERIOD, SEQ_RESTART_THRESHOLD, SessionConfig,
};
use crate::stats::SourceStatistics;
use crate::{Direction, Status};

/// How many sent sender-report timestamps are kept for RTT correlation.
const SENT_SR_HISTORY: usize = 32;

/// How long a NACKed sequence number stays eligible for retransmission
/// delivery before the expectation lapses.
const RETRANSMIT_EXPECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Round-trip estimates beyond this are treated as measurement garbage.
const MAX_ROUND_TRIP_TIME: Duration = Duration::from_secs(2);

/// Where an inbound packet came from, which decides whether it may be held
/// for resequencing and whether late arrivals adapt the reorder window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum RxKind {
    /// Fresh off the wire.
    FromNetwork,
    /// Released from the pending reorder queue.
    Resequenced,
    /// Recovered via an RFC 4588 retransmission stream.
    FromRtx,
}

/// Min/avg/max wall-clock spacing of qualifying packets, folded up once per
/// statistics interval so snapshots stay stable between folds.
#[derive(Debug, Default)]
struct IntervalStats {
    count: u32,
    window_start: Option<Instant>,
    last: Option<Instant>,
    min: Option<Duration>,
    max: Option<Duration>,
    folded_min: Option<Duration>,
    folded_avg: Option<Duration>,
    folded_max: Option<Duration>,
}

impl IntervalStats {
    fn tick(&mut self, now: Instant, every: u32) {
        if let Some(last) = self.last {
            let gap = now.saturating_duration_since(last);
            self.min = Some(self.min.map_or(gap, |m| m.min(gap)));
            self.max = Some(self.max.map_or(gap, |m| m.max(gap)));
        } else {
            self.window_start = Some(now);
        }
        self.last = Some(now);
        self.count += 1;

        if every > 0 && self.count >= every {
            if let Some(start) = self.window_start {
                let elapsed = now.saturating_duration_since(start);
                self.folded_avg = Some(elapsed / self.count.max(1));
            }
            self.folded_min = self.min.take();
            self.folded_max = self.max.take();
            self.count = 0;
            self.window_start = Some(now);
        }
    }
}

/// Circular buffer of recently sent packets, indexed by sequence number, so
/// NACKed packets can be replayed. Capacity must be a power of two.
#[derive(Debug)]
pub(crate) struct RetransmitBuffer {
    slots: Vec<Option<rtp::Packet>>,
    mask: u16,
    newest: u16,
    primed: bool,
}

impl RetransmitBuffer {
    pub(crate) fn new(capacity: u16) -> Option<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return None;
        }
        Some(Self {
            slots: vec![None; capacity as usize],
            mask: capacity - 1,
            newest: 0,
            primed: false,
        })
    }

    pub(crate) fn save(&mut self, packet: rtp::Packet) {
        let seq = packet.header.sequence_number;
        if !self.primed {
            self.primed = true;
            self.newest = seq;
            self.slots[(seq & self.mask) as usize] = Some(packet);
            return;
        }

        let ahead = seq.wrapping_sub(self.newest);
        if ahead == 0 {
            return;
        }
        if ahead < 1 << 15 {
            // forward jump: invalidate skipped slots so stale packets are not
            // replayed under a recycled sequence number
            let mut s = self.newest.wrapping_add(1);
            while s != seq {
                self.slots[(s & self.mask) as usize] = None;
                s = s.wrapping_add(1);
            }
            self.newest = seq;
        }
        self.slots[(seq & self.mask) as usize] = Some(packet);
    }

    pub(crate) fn lookup(&self, seq: u16) -> Option<&rtp::Packet> {
        if !self.primed {
            return None;
        }
        let age = self.newest.wrapping_sub(seq);
        if age >= 1 << 15 || age > self.mask {
            return None;
        }
        self.slots[(seq & self.mask) as usize]
            .as_ref()
            .filter(|p| p.header.sequence_number == seq)
    }
}

/// State for one synchronization source, local or remote.
///
/// A source is capability-tagged rather than subclassed: `direction` says
/// whether it describes our transmit stream or a remote one, `is_rtx` marks
/// retransmission streams, and `rtx_ssrc` links a primary source to its
/// retransmission partner (and back) by id.
#[derive(Debug)]
pub(crate) struct SyncSource {
    pub(crate) ssrc: u32,
    pub(crate) direction: Direction,
    pub(crate) is_rtx: bool,
    pub(crate) rtx_ssrc: Option<u32>,
    pub(crate) rtx_payload_type: Option<u8>,
    /// Payload type seen on the most recent packet, used to restore
    /// retransmitted packets to their original framing.
    pub(crate) payload_type: Option<u8>,
    /// CNAME learned from the peer's SDES, if any.
    pub(crate) cname: Option<String>,

    created: Instant,
    last_activity: Instant,

    // sequencing
    started: bool,
    next_send_sequence: u16,
    extended_first: u32,
    extended_last: u32,
    restart_candidates: u32,
    restart_sequence: u16,
    restart_deadline: Option<Instant>,

    // reorder queue, ascending by distance from the next expected sequence
    pending: VecDeque<rtp::Packet>,
    pending_deadline: Option<Instant>,
    extra_wait: Duration,
    late_window_start: Option<Instant>,
    late_in_window: u32,

    // counters
    pub(crate) packets: u32,
    pub(crate) octets: u64,
    pub(crate) packets_missing: u32,
    pub(crate) max_consecutive_lost: u32,
    pub(crate) packets_out_of_order: u32,
    pub(crate) late_out_of_order: u32,
    pub(crate) retransmissions: u32,
    pub(crate) duplicate_retransmissions: u32,
    pub(crate) nacks: u32,

    // timing
    last_timestamp: Option<u32>,
    transit: Option<u32>,
    jitter_accum: u32,
    pub(crate) maximum_jitter: u32,
    intervals: IntervalStats,

    // report bookkeeping
    packets_at_last_report: u32,
    extended_at_last_report: u32,
    missing_at_last_report: u32,
    last_sr_middle32: u32,
    last_sr_at: Option<Instant>,
    sent_sr: VecDeque<(u32, Instant)>,
    /// Remote receiver-reference-time, for DLRR blocks.
    pub(crate) remote_reference_time: Option<(u32, Instant)>,
    pub(crate) round_trip_time: Option<Duration>,

    // feedback dedup and replay protection
    last_fir_sequence: Option<u8>,
    last_tsto_sequence: Option<u8>,
    expected_retransmits: HashMap<u16, Instant>,

    pub(crate) retransmit_buffer: Option<RetransmitBuffer>,
}

impl SyncSource {
    pub(crate) fn new(ssrc: u32, direction: Direction, now: Instant) -> Self {
        let mut rng = rand::rng();
        Self {
            ssrc,
            direction,
            is_rtx: false,
            rtx_ssrc: None,
            rtx_payload_type: None,
            payload_type: None,
            cname: None,
            created: now,
            last_activity: now,
            started: false,
            // low initial value so the sequence space does not wrap early
            next_send_sequence: rng.random_range(1..=32767),
            extended_first: 0,
            extended_last: 0,
            restart_candidates: 0,
            restart_sequence: 0,
            restart_deadline: None,
            pending: VecDeque::new(),
            pending_deadline: None,
            extra_wait: Duration::ZERO,
            late_window_start: None,
            late_in_window: 0,
            packets: 0,
            octets: 0,
            packets_missing: 0,
            max_consecutive_lost: 0,
            packets_out_of_order: 0,
            late_out_of_order: 0,
            retransmissions: 0,
            duplicate_retransmissions: 0,
            nacks: 0,
            last_timestamp: None,
            transit: None,
            jitter_accum: 0,
            maximum_jitter: 0,
            intervals: IntervalStats::default(),
            packets_at_last_report: 0,
            extended_at_last_report: 0,
            missing_at_last_report: 0,
            last_sr_middle32: 0,
            last_sr_at: None,
            sent_sr: VecDeque::new(),
            remote_reference_time: None,
            round_trip_time: None,
            last_fir_sequence: None,
            last_tsto_sequence: None,
            expected_retransmits: HashMap::new(),
            retransmit_buffer: None,
        }
    }

    /// Random SSRC; values below 4 collide with RTCP payload-type space when
    /// a misconfigured peer sends control on the data port.
    pub(crate) fn generate_ssrc() -> u32 {
        let mut rng = rand::rng();
        loop {
            let ssrc: u32 = rng.random();
            if ssrc >= 4 {
                return ssrc;
            }
        }
    }

    pub(crate) fn last_sequence_number(&self) -> u16 {
        self.extended_last as u16
    }

    pub(crate) fn extended_sequence_number(&self) -> u32 {
        self.extended_last
    }

    pub(crate) fn next_send_sequence(&mut self) -> u16 {
        let seq = self.next_send_sequence;
        self.next_send_sequence = self.next_send_sequence.wrapping_add(1);
        seq
    }

    pub(crate) fn current_jitter(&self) -> u32 {
        self.jitter_accum >> crate::config::JITTER_GUARD_BITS
    }

    pub(crate) fn pending_deadline(&self) -> Option<Instant> {
        self.pending_deadline
    }

    /// A remote source that produced no data and no sender report for the
    /// configured timeout is presumed gone. Retransmission streams are
    /// legitimately silent and never purged on their own.
    pub(crate) fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.direction == Direction::Receiver
            && !self.is_rtx
            && now.saturating_duration_since(self.last_activity) > timeout
    }

    // ---- receive path ----

    /// Classifies and absorbs one inbound data packet. Returns the processing
    /// status plus every packet released for delivery, in sequence order:
    /// the packet itself may be held back, and a gap fill can release several
    /// previously pending ones at once.
    pub(crate) fn on_receive_data(
        &mut self,
        packet: rtp::Packet,
        kind: RxKind,
        now: Instant,
        cfg: &SessionConfig,
    ) -> (Status, Vec<rtp::Packet>) {
        self.last_activity = now;
        let seq = packet.header.sequence_number;

        if kind == RxKind::FromRtx {
            if self.expected_retransmits.remove(&seq).is_none() {
                // unsolicited or repeated retransmission
                self.duplicate_retransmissions += 1;
                return (Status::Ignore, vec![]);
            }
            self.retransmissions += 1;
        }

        if !self.started {
            self.started = true;
            self.extended_first = seq as u32;
            self.extended_last = seq as u32;
            self.absorb(&packet, now, cfg);
            return (Status::Process, vec![packet]);
        }

        let expected = (self.extended_last as u16).wrapping_add(1);
        let delta = seq.wrapping_sub(expected);

        if delta == 0 {
            self.restart_candidates = 0;
            self.extended_last = self.extended_last.wrapping_add(1);
            self.absorb(&packet, now, cfg);
            let mut delivered = vec![packet];
            self.drain_pending(now, cfg, &mut delivered);
            return (Status::Process, delivered);
        }

        if delta < SEQ_RESTART_THRESHOLD {
            self.restart_candidates = 0;
            return self.on_forward_gap(packet, delta, kind, now, cfg);
        }

        if delta >= SEQ_REORDER_THRESHOLD {
            return self.on_behind(packet, kind, now, cfg);
        }

        self.on_suspected_restart(packet, now, cfg)
    }

    /// Forward jump of less than the restart threshold: either hold the
    /// packet for resequencing or accept the gap as loss.
    fn on_forward_gap(
        &mut self,
        packet: rtp::Packet,
        _delta: u16,
        kind: RxKind,
        now: Instant,
        cfg: &SessionConfig,
    ) -> (Status, Vec<rtp::Packet>) {
        let expected = (self.extended_last as u16).wrapping_add(1);
        let key = |p: &rtp::Packet| p.header.sequence_number.wrapping_sub(expected);
        let this_key = key(&packet);
        let mut at = self.pending.len();
        for (i, held) in self.pending.iter().enumerate() {
            let k = key(held);
            if k == this_key {
                return (Status::Ignore, vec![]);
            }
            if k > this_key {
                at = i;
                break;
            }
        }

        let may_hold = cfg.resequence_out_of_order
            && kind == RxKind::FromNetwork
            && self.pending.len() < cfg.max_out_of_order_packets;
        self.pending.insert(at, packet);
        if may_hold {
            if self.pending_deadline.is_none() {
                self.pending_deadline =
                    Some(now + cfg.out_of_order_wait_time + self.extra_wait);
            }
            return (Status::Process, vec![]);
        }

        // no holding: release everything queued, charging each hole as loss.
        // The packet that triggered this was never actually out of order.
        let trigger = this_key;
        let delivered = self.release_pending(now, cfg, Some(trigger));
        (Status::Process, delivered)
    }

    /// Delivers every queued packet in sequence order, charging the holes
    /// between them as loss. `skip_ooo_key` marks a packet that should not
    /// count towards the out-of-order tally.
    fn release_pending(
        &mut self,
        now: Instant,
        cfg: &SessionConfig,
        skip_ooo_key: Option<u16>,
    ) -> Vec<rtp::Packet> {
        let base = (self.extended_last as u16).wrapping_add(1);
        let mut delivered = vec![];
        while let Some(p) = self.pending.pop_front() {
            let next = (self.extended_last as u16).wrapping_add(1);
            let gap = p.header.sequence_number.wrapping_sub(next);
            if gap > 0 {
                self.packets_missing += gap as u32;
                self.max_consecutive_lost = self.max_consecutive_lost.max(gap as u32);
            }
            self.extended_last = self.extended_last.wrapping_add(1 + gap as u32);
            if skip_ooo_key != Some(p.header.sequence_number.wrapping_sub(base)) {
                self.packets_out_of_order += 1;
            }
            self.absorb(&p, now, cfg);
            delivered.push(p);
        }
        self.pending_deadline = None;
        delivered
    }

    /// Sequence numbers just behind the expected one: a recovered late
    /// packet if there is outstanding loss, otherwise a duplicate.
    fn on_behind(
        &mut self,
        packet: rtp::Packet,
        kind: RxKind,
        now: Instant,
        cfg: &SessionConfig,
    ) -> (Status, Vec<rtp::Packet>) {
        self.late_out_of_order += 1;
        if kind == RxKind::FromNetwork {
            self.adapt_reorder_window(now);
        }
        if self.packets_missing == 0 {
            // straight duplicate
            return (Status::Ignore, vec![]);
        }
        self.packets_missing -= 1;
        self.absorb(&packet, now, cfg);
        (Status::Process, vec![packet])
    }

    /// Large forward jump: keep delivering until enough consecutive packets
    /// confirm the peer genuinely restarted its numbering, then snap over
    /// without charging the jump as loss. The run must complete within
    /// [SEQ_RESTART_PERIOD].
    fn on_suspected_restart(
        &mut self,
        packet: rtp::Packet,
        now: Instant,
        cfg: &SessionConfig,
    ) -> (Status, Vec<rtp::Packet>) {
        let seq = packet.header.sequence_number;
        let run_alive = self.restart_candidates > 0
            && seq == self.restart_sequence.wrapping_add(1)
            && self.restart_deadline.is_some_and(|d| now <= d);
        if run_alive {
            self.restart_candidates += 1;
        } else {
            self.restart_candidates = 1;
            self.restart_deadline = Some(now + SEQ_RESTART_PERIOD);
        }
        self.restart_sequence = seq;

        if self.restart_candidates < SEQ_RESTART_COUNT {
            // could just be a burst of extreme reordering: hand the packet
            // on as out of order and let the run decide
            self.packets_out_of_order += 1;
            self.absorb(&packet, now, cfg);
            return (Status::Process, vec![packet]);
        }

        self.restart_candidates = 0;
        self.restart_deadline = None;
        self.pending.clear();
        self.pending_deadline = None;
        self.extended_last = (self.extended_last & 0xFFFF_0000) | seq as u32;
        self.absorb(&packet, now, cfg);
        // rebase so the cumulative expected-vs-received arithmetic does not
        // charge the jump as loss
        self.extended_first = self
            .extended_last
            .wrapping_add(1)
            .wrapping_sub(self.packets)
            .wrapping_sub(self.packets_missing);
        (Status::Process, vec![packet])
    }

    /// Releases every held packet whose sequence number is now next in line.
    fn drain_pending(&mut self, now: Instant, cfg: &SessionConfig, delivered: &mut Vec<rtp::Packet>) {
        loop {
            let next = (self.extended_last as u16).wrapping_add(1);
            match self.pending.front() {
                Some(p) if p.header.sequence_number == next => {}
                _ => break,
            }
            let Some(p) = self.pending.pop_front() else {
                break;
            };
            self.extended_last = self.extended_last.wrapping_add(1);
            self.packets_out_of_order += 1;
            self.absorb(&p, now, cfg);
            delivered.push(p);
        }
        if self.pending.is_empty() {
            self.pending_deadline = None;
        }
    }

    /// Gives up waiting for the missing packets in front of the reorder
    /// queue: the gaps become loss and everything held is released.
    pub(crate) fn expire_pending(&mut self, now: Instant, cfg: &SessionConfig) -> Vec<rtp::Packet> {
        if self.pending.is_empty() || self.pending_deadline.map(|d| d > now).unwrap_or(false) {
            return vec![];
        }
        self.release_pending(now, cfg, None)
    }

    /// Too many late stragglers inside one period means the reorder window
    /// is shorter than what the path actually does, so widen it.
    fn adapt_reorder_window(&mut self, now: Instant) {
        match self.late_window_start {
            Some(start) if now.saturating_duration_since(start) < LATE_OOO_PERIOD => {
                self.late_in_window += 1;
                if self.late_in_window > LATE_OOO_ADAPT_MAX {
                    self.extra_wait += LATE_OOO_WAIT_BOOST;
                    self.late_window_start = Some(now);
                    self.late_in_window = 0;
                }
            }
            _ => {
                self.late_window_start = Some(now);
                self.late_in_window = 1;
            }
        }
    }

    /// Counts a delivered packet and, when it qualifies for timing, folds it
    /// into the jitter and interval statistics.
    fn absorb(&mut self, packet: &rtp::Packet, now: Instant, cfg: &SessionConfig) {
        self.packets += 1;
        self.octets += packet.payload.len() as u64;
        self.payload_type = Some(packet.header.payload_type);

        let qualifies = match cfg.kind {
            // the marker opens a talk burst after silence, so its spacing
            // says nothing about the path
            MediaKind::Audio => !packet.header.marker,
            MediaKind::Video => self.last_timestamp != Some(packet.header.timestamp),
            MediaKind::Other => true,
        };
        self.last_timestamp = Some(packet.header.timestamp);
        if !qualifies {
            return;
        }

        let elapsed_ms = now.saturating_duration_since(self.created).as_millis() as u32;
        let arrival = elapsed_ms.wrapping_mul(cfg.kind.time_units());
        let transit = arrival.wrapping_sub(packet.header.timestamp);
        if let Some(prev) = self.transit {
            let d = (transit.wrapping_sub(prev) as i32).unsigned_abs();
            let guard = crate::config::JITTER_GUARD_BITS;
            let decay = (self.jitter_accum + (1 << (guard - 1))) >> guard;
            self.jitter_accum = self.jitter_accum.saturating_add(d).saturating_sub(decay);
            self.maximum_jitter = self.maximum_jitter.max(self.current_jitter());
        }
        self.transit = Some(transit);

        let every = match self.direction {
            Direction::Sender => cfg.tx_statistics_interval,
            Direction::Receiver => cfg.rx_statistics_interval,
        };
        self.intervals.tick(now, every);
    }

    // ---- send path ----

    /// Stamps an outbound packet with this source's identity, the next
    /// sequence number and any negotiated header extensions, then records it
    /// for statistics and possible retransmission.
    pub(crate) fn on_send_data(
        &mut self,
        packet: &mut rtp::Packet,
        now: Instant,
        base: &SystemInstant,
        cfg: &SessionConfig,
        transport_sequence: Option<u16>,
    ) -> Result<()> {
        packet.header.ssrc = self.ssrc;
        let seq = self.next_send_sequence();
        if (self.extended_last as u16) > seq {
            // wrapped
            self.extended_last = ((self.extended_last >> 16) + 1) << 16;
        }
        self.extended_last = (self.extended_last & 0xFFFF_0000) | seq as u32;
        packet.header.sequence_number = seq;
        if !self.started {
            self.started = true;
            self.extended_first = self.extended_last;
        }

        if let Some(id) = cfg.abs_send_time_id {
            let ext = AbsSendTimeExtension::new(base.ntp(now));
            packet.header.set_extension(id, ext.marshal()?)?;
        }
        if let (Some(id), Some(seq)) = (cfg.transport_wide_seq_id, transport_sequence) {
            let ext = TransportCcExtension {
                transport_sequence: seq,
            };
            packet.header.set_extension(id, ext.marshal()?)?;
        }

        self.absorb(packet, now, cfg);
        self.last_activity = now;
        if let Some(buffer) = self.retransmit_buffer.as_mut() {
            buffer.save(packet.clone());
        }
        Ok(())
    }

    // ---- report handling ----

    /// Builds the reception report block describing this remote source, or
    /// `None` when nothing arrived since the previous report (suppression:
    /// repeating a stale block would reset the peer's loss deltas).
    pub(crate) fn build_reception_report(&mut self, now: Instant) -> Option<ReceptionReport> {
        if self.packets == self.packets_at_last_report {
            return None;
        }

        let expected_interval = self
            .extended_last
            .wrapping_sub(self.extended_at_last_report) as u64;
        let received_interval = (self.packets - self.packets_at_last_report) as u64;
        let lost_interval = expected_interval.saturating_sub(received_interval);
        let fraction_lost = if expected_interval == 0 {
            0
        } else {
            ((lost_interval * 256) / expected_interval).min(255) as u8
        };

        let (last_sender_report, delay) = match self.last_sr_at {
            Some(at) => (
                self.last_sr_middle32,
                duration_to_dlsr(now.saturating_duration_since(at)),
            ),
            None => (0, 0),
        };

        let report = ReceptionReport {
            ssrc: self.ssrc,
            fraction_lost,
            total_lost: self.packets_missing.min(0x00FF_FFFF),
            last_sequence_number: self.extended_last,
            jitter: self.current_jitter(),
            last_sender_report,
            delay,
        };

        self.packets_at_last_report = self.packets;
        self.extended_at_last_report = self.extended_last;
        self.missing_at_last_report = self.packets_missing;
        Some(report)
    }

    /// Remembers the NTP timestamp of a sender report we just emitted so a
    /// returning reception report can be matched up for RTT.
    pub(crate) fn record_sender_report_sent(&mut self, ntp: u64, now: Instant) {
        self.sent_sr.push_back((ntp_middle32(ntp), now));
        while self.sent_sr.len() > SENT_SR_HISTORY {
            self.sent_sr.pop_front();
        }
    }

    pub(crate) fn on_rx_sender_report(&mut self, ntp: u64, now: Instant) {
        self.last_sr_middle32 = ntp_middle32(ntp);
        self.last_sr_at = Some(now);
        self.last_activity = now;
    }

    /// Correlates a reception report about our stream with the sender report
    /// it references and derives a round-trip estimate. Nonsensical values
    /// are discarded, sub-millisecond ones clamp to 1 ms.
    pub(crate) fn on_rx_reception_report(
        &mut self,
        report: &ReceptionReport,
        now: Instant,
    ) -> Option<Duration> {
        if report.last_sender_report == 0 {
            return None;
        }
        let (_, sent_at) = *self
            .sent_sr
            .iter()
            .rev()
            .find(|(m, _)| *m == report.last_sender_report)?;
        let elapsed = now.saturating_duration_since(sent_at);
        let dlsr = dlsr_to_duration(report.delay);
        let rtt = elapsed
            .checked_sub(dlsr)
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_millis(1));
        if rtt > MAX_ROUND_TRIP_TIME {
            return None;
        }
        self.round_trip_time = Some(rtt);
        Some(rtt)
    }

    // ---- feedback ----

    /// Looks up the packets a NACK asks for. The caller decides whether they
    /// go out re-sent as-is or wrapped on a retransmission stream.
    pub(crate) fn on_rx_nack(&mut self, sequence_numbers: &[u16]) -> Vec<rtp::Packet> {
        self.nacks += 1;
        let Some(buffer) = self.retransmit_buffer.as_ref() else {
            return vec![];
        };
        sequence_numbers
            .iter()
            .filter_map(|&seq| buffer.lookup(seq).cloned())
            .collect()
    }

    /// Marks sequence numbers we just NACKed as eligible retransmissions.
    pub(crate) fn note_nack_sent(&mut self, sequence_numbers: &[u16], now: Instant) {
        self.nacks += 1;
        self.expected_retransmits
            .retain(|_, at| now.saturating_duration_since(*at) < RETRANSMIT_EXPECT_TIMEOUT);
        for &seq in sequence_numbers {
            self.expected_retransmits.entry(seq).or_insert(now);
        }
    }

    pub(crate) fn is_expecting_retransmit(&mut self, seq: u16, now: Instant) -> bool {
        match self.expected_retransmits.get(&seq) {
            Some(at) => now.saturating_duration_since(*at) < RETRANSMIT_EXPECT_TIMEOUT,
            None => false,
        }
    }

    /// FIR and TSTO carry a sequence number so retransmitted requests can be
    /// told apart from new ones.
    pub(crate) fn accepts_fir(&mut self, sequence: u8) -> bool {
        if self.last_fir_sequence == Some(sequence) {
            return false;
        }
        self.last_fir_sequence = Some(sequence);
        true
    }

    pub(crate) fn accepts_tsto(&mut self, sequence: u8) -> bool {
        if self.last_tsto_sequence == Some(sequence) {
            return false;
        }
        self.last_tsto_sequence = Some(sequence);
        true
    }

    // ---- snapshot ----

    pub(crate) fn statistics(&self) -> SourceStatistics {
        SourceStatistics {
            ssrc: self.ssrc,
            is_sender: self.direction == Direction::Sender,
            cname: self.cname.clone().unwrap_or_default(),
            packets: self.packets,
            octets: self.octets,
            packets_lost: if self.is_rtx {
                None
            } else {
                Some(self.packets_missing)
            },
            max_consecutive_lost: self.max_consecutive_lost,
            packets_out_of_order: self.packets_out_of_order,
            late_out_of_order: self.late_out_of_order,
            retransmissions: self.retransmissions,
            duplicate_retransmissions: self.duplicate_retransmissions,
            nacks: self.nacks,
            jitter: self.current_jitter(),
            maximum_jitter: self.maximum_jitter,
            minimum_packet_interval: self.intervals.folded_min,
            average_packet_interval: self.intervals.folded_avg,
            maximum_packet_interval: self.intervals.folded_max,
            round_trip_time: self.round_trip_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::time::unix2ntp;

    fn cfg() -> SessionConfig {
        SessionConfig::default()
    }

    fn no_reseq() -> SessionConfig {
        let mut c = SessionConfig::default();
        c.resequence_out_of_order = false;
        c
    }

    fn rx_source(now: Instant) -> SyncSource {
        SyncSource::new(0x1234_5678, Direction::Receiver, now)
    }

    fn packet(seq: u16) -> rtp::Packet {
        rtp::Packet {
            header: rtp::Header {
                version: 2,
                payload_type: 96,
                sequence_number: seq,
                timestamp: seq as u32 * 160,
                ssrc: 0x1234_5678,
                ..Default::default()
            },
            payload: bytes::Bytes::from_static(&[0u8; 10]),
        }
    }

    fn feed(src: &mut SyncSource, seq: u16, now: Instant, cfg: &SessionConfig) -> (Status, usize) {
        let (status, delivered) = src.on_receive_data(packet(seq), RxKind::FromNetwork, now, cfg);
        (status, delivered.len())
    }

    #[test]
    fn test_extended_sequence_monotonic_across_wrap() {
        let now = Instant::now();
        let cfg = cfg();
        let mut src = rx_source(now);

        let mut previous = None;
        for seq in [65533u16, 65534, 65535, 0, 1, 2] {
            let (status, n) = feed(&mut src, seq, now, &cfg);
            assert_eq!(status, Status::Process);
            assert_eq!(n, 1);
            let extended = src.extended_sequence_number();
            if let Some(p) = previous {
                assert!(extended > p, "extended must grow: {p} -> {extended}");
            }
            previous = Some(extended);
        }
        assert_eq!(src.extended_sequence_number() >> 16, 1);
        assert_eq!(src.last_sequence_number(), 2);
    }

    #[test]
    fn test_loss_identity() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);

        for seq in [10u16, 11, 12, 15, 16, 20] {
            feed(&mut src, seq, now, &cfg);
        }
        // holes: 13, 14, 17, 18, 19
        assert_eq!(src.packets_missing, 5);
        assert_eq!(src.max_consecutive_lost, 3);
        let expected = src
            .extended_sequence_number()
            .wrapping_sub(src.extended_first)
            + 1;
        assert_eq!(src.packets_missing, expected - src.packets);
    }

    #[test]
    fn test_duplicate_not_counted_as_recovery() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);

        for seq in [1u16, 2, 3] {
            feed(&mut src, seq, now, &cfg);
        }
        let (status, n) = feed(&mut src, 2, now, &cfg);
        assert_eq!(status, Status::Ignore);
        assert_eq!(n, 0);
        assert_eq!(src.packets_missing, 0);
        assert_eq!(src.packets, 3);
    }

    #[test]
    fn test_network_duplicates_count_late_and_widen_window() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);
        for seq in [1u16, 2, 3] {
            feed(&mut src, seq, now, &cfg);
        }
        for _ in 0..5 {
            let (status, n) = feed(&mut src, 2, now, &cfg);
            assert_eq!(status, Status::Ignore);
            assert_eq!(n, 0);
        }
        assert_eq!(src.late_out_of_order, 5);
        assert_eq!(src.packets_missing, 0);
        assert_eq!(src.packets, 3);
        // repeated stragglers inside one period ratchet the wait time
        assert_eq!(src.extra_wait, LATE_OOO_WAIT_BOOST);
    }

    #[test]
    fn test_late_packet_recovers_loss() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);

        feed(&mut src, 1, now, &cfg);
        feed(&mut src, 3, now, &cfg); // 2 lost
        assert_eq!(src.packets_missing, 1);

        let (status, n) = feed(&mut src, 2, now, &cfg);
        assert_eq!(status, Status::Process);
        assert_eq!(n, 1);
        assert_eq!(src.packets_missing, 0);
        assert_eq!(src.late_out_of_order, 1);
    }

    #[test]
    fn test_resequence_1_2_3_5_4() {
        let now = Instant::now();
        let cfg = cfg();
        let mut src = rx_source(now);

        assert_eq!(feed(&mut src, 1, now, &cfg), (Status::Process, 1));
        assert_eq!(feed(&mut src, 2, now, &cfg), (Status::Process, 1));
        assert_eq!(feed(&mut src, 3, now, &cfg), (Status::Process, 1));
        // 5 goes on the reorder queue
        assert_eq!(feed(&mut src, 5, now, &cfg), (Status::Process, 0));
        assert!(src.pending_deadline().is_some());
        // 4 fills the gap and releases 5 with it
        let (status, delivered) =
            src.on_receive_data(packet(4), RxKind::FromNetwork, now, &cfg);
        assert_eq!(status, Status::Process);
        assert_eq!(
            delivered
                .iter()
                .map(|p| p.header.sequence_number)
                .collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert_eq!(src.packets_missing, 0);
        assert_eq!(src.packets_out_of_order, 1);
        assert!(src.pending_deadline().is_none());
    }

    #[test]
    fn test_reorder_deadline_expiry_turns_gap_into_loss() {
        let now = Instant::now();
        let cfg = cfg();
        let mut src = rx_source(now);

        feed(&mut src, 1, now, &cfg);
        feed(&mut src, 2, now, &cfg);
        assert_eq!(feed(&mut src, 4, now, &cfg), (Status::Process, 0));

        let deadline = src.pending_deadline().unwrap();
        assert!(src.expire_pending(now, &cfg).is_empty());

        let released = src.expire_pending(deadline, &cfg);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].header.sequence_number, 4);
        assert_eq!(src.packets_missing, 1);
        assert_eq!(src.last_sequence_number(), 4);
        assert!(src.pending_deadline().is_none());
    }

    #[test]
    fn test_reorder_queue_overflow_accepts_gap() {
        let now = Instant::now();
        let mut cfg = cfg();
        cfg.max_out_of_order_packets = 2;
        let mut src = rx_source(now);

        feed(&mut src, 1, now, &cfg);
        assert_eq!(feed(&mut src, 3, now, &cfg), (Status::Process, 0));
        assert_eq!(feed(&mut src, 4, now, &cfg), (Status::Process, 0));
        // queue is full: everything held is released, holes become loss
        let (status, delivered) =
            src.on_receive_data(packet(6), RxKind::FromNetwork, now, &cfg);
        assert_eq!(status, Status::Process);
        assert_eq!(
            delivered
                .iter()
                .map(|p| p.header.sequence_number)
                .collect::<Vec<_>>(),
            vec![3, 4, 6]
        );
        assert_eq!(src.packets_missing, 2);
        assert_eq!(src.packets_out_of_order, 2);
    }

    #[test]
    fn test_sequence_restart_needs_consecutive_run() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);

        feed(&mut src, 100, now, &cfg);
        feed(&mut src, 101, now, &cfg);

        // jump way ahead: candidates are delivered as out of order while
        // the numbering stays put
        for i in 0..9u16 {
            let (status, n) = feed(&mut src, 20_000 + i, now, &cfg);
            assert_eq!(status, Status::Process, "candidate {i}");
            assert_eq!(n, 1);
        }
        assert_eq!(src.last_sequence_number(), 101);
        assert_eq!(src.packets_out_of_order, 9);
        let (status, n) = feed(&mut src, 20_009, now, &cfg);
        assert_eq!(status, Status::Process);
        assert_eq!(n, 1);
        assert_eq!(src.last_sequence_number(), 20_009);
        // the jump is not loss
        assert_eq!(src.packets_missing, 0);
        let expected = src
            .extended_sequence_number()
            .wrapping_sub(src.extended_first)
            + 1;
        assert_eq!(expected - src.packets, src.packets_missing);
    }

    #[test]
    fn test_restart_run_broken_by_unrelated_jump() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);

        feed(&mut src, 100, now, &cfg);
        for i in 0..5u16 {
            feed(&mut src, 20_000 + i, now, &cfg);
        }
        // a non-consecutive jump restarts the candidate count
        for i in 0..9u16 {
            feed(&mut src, 40_000 + i, now, &cfg);
            assert_eq!(src.last_sequence_number(), 100, "candidate {i}");
        }
        feed(&mut src, 40_009, now, &cfg);
        assert_eq!(src.last_sequence_number(), 40_009);
    }

    #[test]
    fn test_restart_run_expires_after_window() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);
        feed(&mut src, 100, now, &cfg);

        // consecutive numbering, but each candidate arrives after the run
        // window lapsed, so the stream never snaps over
        let mut t = now;
        for i in 0..20u16 {
            t += Duration::from_millis(1100);
            let (status, n) = feed(&mut src, 20_000 + i, t, &cfg);
            assert_eq!(status, Status::Process);
            assert_eq!(n, 1);
            assert_eq!(src.last_sequence_number(), 100);
        }
    }

    #[test]
    fn test_audio_jitter_measured_on_marker_off_packets() {
        let start = Instant::now();
        let cfg = cfg();
        assert_eq!(cfg.kind, MediaKind::Audio);

        let mut src = rx_source(start);
        let mut now = start;
        for seq in 1u16..=50 {
            now += Duration::from_millis(if seq % 2 == 0 { 5 } else { 45 });
            src.on_receive_data(packet(seq), RxKind::FromNetwork, now, &cfg);
        }
        assert!(src.maximum_jitter > 0);

        // talkspurt starts carry the marker and are excluded from timing
        let mut bursts = rx_source(start);
        let mut now = start;
        for seq in 1u16..=50 {
            now += Duration::from_millis(if seq % 2 == 0 { 5 } else { 45 });
            let mut p = packet(seq);
            p.header.marker = true;
            bursts.on_receive_data(p, RxKind::FromNetwork, now, &cfg);
        }
        assert_eq!(bursts.maximum_jitter, 0);
    }

    #[test]
    fn test_jitter_never_negative_and_tracks_max() {
        let start = Instant::now();
        let mut cfg = cfg();
        cfg.kind = MediaKind::Other; // every packet qualifies
        let mut src = rx_source(start);

        let mut now = start;
        for seq in 1u16..=50 {
            // irregular arrival spacing
            now += Duration::from_millis(if seq % 3 == 0 { 35 } else { 15 });
            src.on_receive_data(packet(seq), RxKind::FromNetwork, now, &cfg);
            let j = src.current_jitter();
            assert!(j <= src.maximum_jitter);
        }
        assert!(src.maximum_jitter > 0);
    }

    #[test]
    fn test_reception_report_suppressed_without_new_data() {
        let now = Instant::now();
        let cfg = cfg();
        let mut src = rx_source(now);

        assert!(src.build_reception_report(now).is_none());

        feed(&mut src, 1, now, &cfg);
        feed(&mut src, 2, now, &cfg);
        let report = src.build_reception_report(now).unwrap();
        assert_eq!(report.ssrc, src.ssrc);
        assert_eq!(report.fraction_lost, 0);

        // nothing new arrived, so no block goes out
        assert!(src.build_reception_report(now).is_none());

        feed(&mut src, 3, now, &cfg);
        assert!(src.build_reception_report(now).is_some());
    }

    #[test]
    fn test_fraction_lost_reflects_interval_only() {
        let now = Instant::now();
        let cfg = no_reseq();
        let mut src = rx_source(now);

        for seq in 1u16..=8 {
            feed(&mut src, seq, now, &cfg);
        }
        src.build_reception_report(now);

        // second interval: half the packets vanish
        feed(&mut src, 10, now, &cfg);
        feed(&mut src, 12, now, &cfg);
        let report = src.build_reception_report(now).unwrap();
        assert_eq!(report.total_lost, 2);
        assert_eq!(report.fraction_lost, 128);
    }

    #[test]
    fn test_round_trip_from_reception_report() {
        let now = Instant::now();
        let mut src = SyncSource::new(1, Direction::Sender, now);

        let ntp = unix2ntp(Duration::from_secs(1_700_000_000));
        src.record_sender_report_sent(ntp, now);

        let later = now + Duration::from_millis(350);
        let report = ReceptionReport {
            ssrc: 1,
            last_sender_report: ntp_middle32(ntp),
            delay: duration_to_dlsr(Duration::from_millis(100)),
            ..Default::default()
        };
        let rtt = src.on_rx_reception_report(&report, later).unwrap();
        assert!(rtt >= Duration::from_millis(240) && rtt <= Duration::from_millis(260));
        assert_eq!(src.round_trip_time, Some(rtt));
    }

    #[test]
    fn test_round_trip_clamps_and_discards() {
        let now = Instant::now();
        let mut src = SyncSource::new(1, Direction::Sender, now);
        let ntp = unix2ntp(Duration::from_secs(1_700_000_000));
        src.record_sender_report_sent(ntp, now);

        // peer claims more delay than actually elapsed: clamp to 1 ms
        let report = ReceptionReport {
            ssrc: 1,
            last_sender_report: ntp_middle32(ntp),
            delay: duration_to_dlsr(Duration::from_secs(1)),
            ..Default::default()
        };
        let rtt = src
            .on_rx_reception_report(&report, now + Duration::from_millis(10))
            .unwrap();
        assert_eq!(rtt, Duration::from_millis(1));

        // implausibly large estimates are dropped
        let report = ReceptionReport {
            ssrc: 1,
            last_sender_report: ntp_middle32(ntp),
            delay: 0,
            ..Default::default()
        };
        assert!(src
            .on_rx_reception_report(&report, now + Duration::from_secs(5))
            .is_none());
    }

    #[test]
    fn test_retransmit_expectation_gates_rtx() {
        let now = Instant::now();
        let cfg = cfg();
        let mut src = rx_source(now);

        feed(&mut src, 1, now, &cfg);
        feed(&mut src, 3, now, &cfg); // 2 pending on the reorder queue
        src.expire_pending(now + Duration::from_secs(1), &cfg);
        assert_eq!(src.packets_missing, 1);

        // unsolicited retransmission is dropped
        let (status, _) = src.on_receive_data(packet(2), RxKind::FromRtx, now, &cfg);
        assert_eq!(status, Status::Ignore);
        assert_eq!(src.duplicate_retransmissions, 1);

        src.note_nack_sent(&[2], now);
        assert!(src.is_expecting_retransmit(2, now));
        let (status, delivered) = src.on_receive_data(packet(2), RxKind::FromRtx, now, &cfg);
        assert_eq!(status, Status::Process);
        assert_eq!(delivered.len(), 1);
        assert_eq!(src.retransmissions, 1);
        assert_eq!(src.packets_missing, 0);

        // the expectation was consumed
        let (status, _) = src.on_receive_data(packet(2), RxKind::FromRtx, now, &cfg);
        assert_eq!(status, Status::Ignore);
        assert_eq!(src.duplicate_retransmissions, 2);
    }

    #[test]
    fn test_retransmit_buffer_replays_nacked_packets() {
        let now = Instant::now();
        let base = SystemInstant::now();
        let cfg = cfg();
        let mut src = SyncSource::new(99, Direction::Sender, now);
        src.retransmit_buffer = RetransmitBuffer::new(64);

        let mut sent = vec![];
        for _ in 0..5 {
            let mut p = packet(0);
            src.on_send_data(&mut p, now, &base, &cfg, None).unwrap();
            sent.push(p.header.sequence_number);
        }
        assert_eq!(sent[4], sent[0].wrapping_add(4));

        let replayed = src.on_rx_nack(&[sent[1], sent[3]]);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].header.sequence_number, sent[1]);
        assert_eq!(replayed[1].header.sequence_number, sent[3]);
        assert_eq!(src.nacks, 1);

        // never sent, nothing to replay
        assert!(src.on_rx_nack(&[sent[4].wrapping_add(100)]).is_empty());
    }

    #[test]
    fn test_retransmit_buffer_gap_invalidates_slots() {
        let mut buf = RetransmitBuffer::new(8).unwrap();
        for seq in 0u16..3 {
            buf.save(packet(seq));
        }
        buf.save(packet(6));
        assert!(buf.lookup(2).is_some());
        assert!(buf.lookup(4).is_none());
        assert!(buf.lookup(6).is_some());
        // older than the buffer holds
        for seq in 7u16..20 {
            buf.save(packet(seq));
        }
        assert!(buf.lookup(6).is_none());
        assert!(buf.lookup(19).is_some());
    }

    #[test]
    fn test_fir_tsto_sequence_dedup() {
        let now = Instant::now();
        let mut src = SyncSource::new(1, Direction::Sender, now);
        assert!(src.accepts_fir(7));
        assert!(!src.accepts_fir(7));
        assert!(src.accepts_fir(8));
        assert!(src.accepts_tsto(7));
        assert!(!src.accepts_tsto(7));
    }

    #[test]
    fn test_send_path_stamps_extensions() {
        let now = Instant::now();
        let base = SystemInstant::now();
        let mut cfg = cfg();
        cfg.abs_send_time_id = Some(3);
        cfg.transport_wide_seq_id = Some(5);
        let mut src = SyncSource::new(0xABCD, Direction::Sender, now);

        let mut p = packet(0);
        src.on_send_data(&mut p, now, &base, &cfg, Some(42)).unwrap();
        assert_eq!(p.header.ssrc, 0xABCD);
        assert!(p.header.get_extension(3).is_some());
        let tcc = p.header.get_extension(5).unwrap();
        assert_eq!(&tcc[..], &[0, 42]);
    }

    #[test]
    fn test_stale_detection() {
        let now = Instant::now();
        let cfg = cfg();
        let mut src = rx_source(now);
        feed(&mut src, 1, now, &cfg);

        let timeout = Duration::from_secs(60);
        assert!(!src.is_stale(now + Duration::from_secs(59), timeout));
        assert!(src.is_stale(now + Duration::from_secs(61), timeout));

        // a sender report also counts as activity
        src.on_rx_sender_report(0, now + Duration::from_secs(61));
        assert!(!src.is_stale(now + Duration::from_secs(100), timeout));

        // a silent retransmission stream is not stale
        let mut rtx = rx_source(now);
        rtx.is_rtx = true;
        assert!(!rtx.is_stale(now + Duration::from_secs(120), timeout));
    }

    #[test]
    fn test_generated_ssrc_avoids_reserved_values() {
        for _ in 0..64 {
            assert!(SyncSource::generate_ssrc() >= 4);
        }
    }
}
