//! The session coordinator: owns every synchronization source, the report
//! scheduler and the congestion handler behind one lock, and keeps all
//! transport I/O outside of it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, info, warn};

use rtcp::payload_feedbacks::full_intra_request::{FirEntry, FullIntraRequest};
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use rtcp::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use rtcp::payload_feedbacks::temporal_spatial_trade_off::{TemporalSpatialTradeOff, TstoEntry};
use rtcp::transport_feedbacks::tmmb::{TmmbEntry, TransportLayerTmmb};
use rtcp::transport_feedbacks::transport_layer_nack::{
    TransportLayerNack, nack_pairs_from_sequence_numbers,
};
use rtp::extension::transport_cc_extension::TransportCcExtension;
use shared::error::{Error, Result};
use shared::marshal::{Marshal, Unmarshal};
use shared::time::SystemInstant;

use crate::config::{CONGESTION_FEEDBACK_INTERVAL, MediaKind, SessionConfig};
use crate::congestion::CongestionFeedbackHandler;
use crate::report;
use crate::scheduler::{Action, Scheduler};
use crate::source::{RetransmitBuffer, RxKind, SyncSource};
use crate::stats::SessionStatistics;
use crate::transport::{CryptoContext, MediaTransport, SubChannel};
use crate::{Direction, SessionEvent, Status};

/// Sent packets kept for NACK replay, per sender. Power of two.
const RETRANSMIT_BUFFER_SIZE: u16 = 1024;

/// Everything the lock protects.
pub(crate) struct SessionInner {
    pub(crate) config: SessionConfig,
    pub(crate) sources: HashMap<u32, SyncSource>,
    pub(crate) default_send_ssrc: Option<u32>,
    pub(crate) default_recv_ssrc: Option<u32>,
    pub(crate) transport: Option<Arc<dyn MediaTransport>>,
    pub(crate) crypto: Option<Arc<dyn CryptoContext>>,
    pub(crate) congestion: CongestionFeedbackHandler,
    pub(crate) congestion_flush_armed: bool,
    pub(crate) scheduler: Scheduler,
    pub(crate) base_time: SystemInstant,
    pub(crate) created: Instant,
    pub(crate) closed: bool,
    pub(crate) round_trip_time: Option<Duration>,
    pub(crate) events: VecDeque<SessionEvent>,
    pub(crate) warned_ssrcs: HashSet<u32>,
    pub(crate) fir_sequence: u8,
    pub(crate) tsto_sequence: u8,
}

impl SessionInner {
    /// The SSRC this session identifies itself with in outgoing reports,
    /// creating a local sender entry on first use.
    pub(crate) fn local_ssrc(&mut self, now: Instant) -> u32 {
        if let Some(ssrc) = self.default_send_ssrc {
            return ssrc;
        }
        if let Some(ssrc) = self
            .sources
            .values()
            .find(|s| s.direction == Direction::Sender && !s.is_rtx)
            .map(|s| s.ssrc)
        {
            self.default_send_ssrc = Some(ssrc);
            return ssrc;
        }
        let ssrc = self.unused_ssrc();
        info!(
            "session {}: created local source {ssrc:08x}",
            self.config.session_id
        );
        self.insert_source(ssrc, Direction::Sender, now);
        self.default_send_ssrc = Some(ssrc);
        ssrc
    }

    fn unused_ssrc(&self) -> u32 {
        loop {
            let ssrc = SyncSource::generate_ssrc();
            if !self.sources.contains_key(&ssrc) {
                return ssrc;
            }
        }
    }

    fn insert_source(&mut self, ssrc: u32, direction: Direction, now: Instant) {
        let mut source = SyncSource::new(ssrc, direction, now);
        if direction == Direction::Sender && self.config.feedback.nack {
            source.retransmit_buffer = RetransmitBuffer::new(RETRANSMIT_BUFFER_SIZE);
        }
        self.sources.insert(ssrc, source);
    }

    /// Removes a source together with its retransmission partner.
    pub(crate) fn remove_source(&mut self, ssrc: u32) -> bool {
        let Some(source) = self.sources.remove(&ssrc) else {
            return false;
        };
        if let Some(partner) = source.rtx_ssrc {
            self.sources.remove(&partner);
        }
        if self.default_send_ssrc == Some(ssrc) {
            self.default_send_ssrc = None;
        }
        if self.default_recv_ssrc == Some(ssrc) {
            self.default_recv_ssrc = None;
        }
        true
    }

    /// Classifies one parsed inbound data packet and collects everything it
    /// releases for delivery.
    fn receive_data_packet(
        &mut self,
        packet: rtp::Packet,
        now: Instant,
    ) -> (Status, Vec<rtp::Packet>) {
        let cfg = self.config.clone();

        if let Some(id) = cfg.transport_wide_seq_id {
            if let Some(raw) = packet.header.get_extension(id) {
                if let Ok(ext) = TransportCcExtension::unmarshal(&mut raw.clone()) {
                    self.congestion.record_arrival(ext.transport_sequence, now);
                    if !self.congestion_flush_armed {
                        self.scheduler.schedule(
                            now + CONGESTION_FEEDBACK_INTERVAL,
                            Action::FlushCongestionFeedback,
                        );
                        self.congestion_flush_armed = true;
                    }
                }
            }
        }

        let ssrc = packet.header.ssrc;
        if !self.sources.contains_key(&ssrc) {
            if !cfg.any_ssrc_allowed {
                if self.warned_ssrcs.insert(ssrc) {
                    warn!(
                        "session {}: data from unexpected source {ssrc:08x}",
                        cfg.session_id
                    );
                }
                return (Status::Ignore, vec![]);
            }
            info!(
                "session {}: new remote source {ssrc:08x}",
                cfg.session_id
            );
            self.sources
                .insert(ssrc, SyncSource::new(ssrc, Direction::Receiver, now));
            if self.default_recv_ssrc.is_none() {
                self.default_recv_ssrc = Some(ssrc);
            }
        }

        // retransmission streams carry the primary stream's packets wrapped
        // under their own identity
        let rtx_link = self
            .sources
            .get(&ssrc)
            .filter(|s| s.is_rtx)
            .map(|s| s.rtx_ssrc);
        let (target_ssrc, packet, kind) = match rtx_link {
            None => (ssrc, packet, RxKind::FromNetwork),
            Some(link) => {
                if let Some(rtx) = self.sources.get_mut(&ssrc) {
                    rtx.packets += 1;
                    rtx.octets += packet.payload.len() as u64;
                }
                let Some(primary_ssrc) = link else {
                    return (Status::Ignore, vec![]);
                };
                let payload_type = self
                    .sources
                    .get(&primary_ssrc)
                    .and_then(|p| p.payload_type)
                    .unwrap_or(packet.header.payload_type);
                match rtp::rtx::unwrap(&packet, primary_ssrc, payload_type) {
                    Ok(original) => (primary_ssrc, original, RxKind::FromRtx),
                    Err(e) => {
                        debug!("session {}: bad rtx payload: {e}", cfg.session_id);
                        return (Status::Ignore, vec![]);
                    }
                }
            }
        };

        let Some(source) = self.sources.get_mut(&target_ssrc) else {
            return (Status::Ignore, vec![]);
        };
        let had_deadline = source.pending_deadline().is_some();
        let (status, delivered) = source.on_receive_data(packet, kind, now, &cfg);
        if let Some(deadline) = source.pending_deadline() {
            if !had_deadline {
                self.scheduler
                    .schedule(deadline, Action::ExpirePending { ssrc: target_ssrc });
            }
        }
        (status, delivered)
    }
}

/// An RTP/RTCP session over one media and one control subchannel.
///
/// All state sits behind a single `RwLock`; every transport write happens
/// after the lock is released so slow I/O never blocks other callers.
pub struct RtpSession {
    inner: RwLock<SessionInner>,
}

impl RtpSession {
    pub fn new(config: SessionConfig) -> Self {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(now + config.report_interval, Action::SendReport);
        scheduler.schedule(now + config.stale_receiver_timeout, Action::CheckStaleReceivers);
        RtpSession {
            inner: RwLock::new(SessionInner {
                config,
                sources: HashMap::new(),
                default_send_ssrc: None,
                default_recv_ssrc: None,
                transport: None,
                crypto: None,
                congestion: CongestionFeedbackHandler::new(now),
                congestion_flush_armed: false,
                scheduler,
                base_time: SystemInstant::now(),
                created: now,
                closed: false,
                round_trip_time: None,
                events: VecDeque::new(),
                warned_ssrcs: HashSet::new(),
                fir_sequence: 0,
                tsto_sequence: 0,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn inner_for_tests(&self) -> RwLockWriteGuard<'_, SessionInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock(&self) -> Result<RwLockWriteGuard<'_, SessionInner>> {
        self.inner
            .write()
            .map_err(|_| Error::Other("session lock poisoned".to_owned()))
    }

    /// Attaches the transport this session sends and receives through.
    pub fn open(&self, transport: Arc<dyn MediaTransport>) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(Error::ErrSessionClosed);
        }
        inner.transport = Some(transport);
        Ok(())
    }

    pub fn set_crypto(&self, crypto: Arc<dyn CryptoContext>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.crypto = Some(crypto);
        Ok(())
    }

    pub fn detach_transport(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.transport = None;
        Ok(())
    }

    pub fn set_remote_address(&self, addr: SocketAddr, subchannel: SubChannel) -> Result<()> {
        let inner = self.lock()?;
        let Some(transport) = inner.transport.clone() else {
            return Err(Error::ErrNoTransport);
        };
        drop(inner);
        transport.set_remote_address(addr, subchannel);
        Ok(())
    }

    /// Says goodbye and shuts the session down. Idempotent.
    pub fn close(&self, reason: &str) -> Result<()> {
        let now = Instant::now();
        let (payload, transport, crypto) = {
            let mut inner = self.lock()?;
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;
            inner.scheduler.clear();
            let packets = report::build_bye(&mut inner, reason, now);
            let payload = rtcp::marshal_compound(&packets)?;
            (payload, inner.transport.take(), inner.crypto.clone())
        };
        if let Some(transport) = transport {
            self.protect_and_send(
                BytesMut::from(&payload[..]),
                SubChannel::Control,
                transport,
                crypto,
            )?;
        }
        Ok(())
    }

    /// Registers a local or remote source. Pass `ssrc == 0` to have one
    /// generated. Re-adding an SSRC with the same role and CNAME is a
    /// no-op; any other collision is an error.
    pub fn add_sync_source(&self, ssrc: u32, direction: Direction, cname: &str) -> Result<u32> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        if inner.closed {
            return Err(Error::ErrSessionClosed);
        }
        if ssrc != 0 {
            if let Some(existing) = inner.sources.get(&ssrc) {
                if existing.direction == direction
                    && existing.cname.as_deref().unwrap_or("") == cname
                {
                    return Ok(ssrc);
                }
                return Err(Error::ErrSsrcInUse);
            }
        }
        let ssrc = if ssrc == 0 { inner.unused_ssrc() } else { ssrc };
        inner.insert_source(ssrc, direction, now);
        if !cname.is_empty() {
            if let Some(source) = inner.sources.get_mut(&ssrc) {
                source.cname = Some(cname.to_owned());
            }
        }
        match direction {
            Direction::Sender if inner.default_send_ssrc.is_none() => {
                inner.default_send_ssrc = Some(ssrc)
            }
            Direction::Receiver if inner.default_recv_ssrc.is_none() => {
                inner.default_recv_ssrc = Some(ssrc)
            }
            _ => {}
        }
        Ok(ssrc)
    }

    /// Pairs `primary_ssrc` with a retransmission stream carrying the given
    /// payload type. Returns the retransmission SSRC.
    pub fn enable_rtx(
        &self,
        primary_ssrc: u32,
        rtx_ssrc: u32,
        rtx_payload_type: u8,
    ) -> Result<u32> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        if !inner.sources.contains_key(&primary_ssrc) {
            return Err(Error::ErrUnknownSsrc);
        }
        let rtx_ssrc = if rtx_ssrc == 0 {
            inner.unused_ssrc()
        } else if inner.sources.contains_key(&rtx_ssrc) {
            return Err(Error::ErrSsrcInUse);
        } else {
            rtx_ssrc
        };
        let direction = inner.sources[&primary_ssrc].direction;
        let mut rtx = SyncSource::new(rtx_ssrc, direction, now);
        rtx.is_rtx = true;
        rtx.rtx_ssrc = Some(primary_ssrc);
        rtx.rtx_payload_type = Some(rtx_payload_type);
        inner.sources.insert(rtx_ssrc, rtx);
        if let Some(primary) = inner.sources.get_mut(&primary_ssrc) {
            primary.rtx_ssrc = Some(rtx_ssrc);
            primary.rtx_payload_type = Some(rtx_payload_type);
            if direction == Direction::Sender && primary.retransmit_buffer.is_none() {
                primary.retransmit_buffer = RetransmitBuffer::new(RETRANSMIT_BUFFER_SIZE);
            }
        }
        Ok(rtx_ssrc)
    }

    pub fn remove_sync_source(&self, ssrc: u32) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.remove_source(ssrc) {
            Ok(())
        } else {
            Err(Error::ErrUnknownSsrc)
        }
    }

    /// Adopts the media kind of a renegotiated format, rescaling the
    /// timestamp units and reorder tolerances that hang off it.
    pub fn update_media_format(&self, kind: MediaKind) -> Result<()> {
        let mut inner = self.lock()?;
        inner.config.kind = kind;
        inner.config.out_of_order_wait_time = kind.default_out_of_order_wait();
        Ok(())
    }

    /// Stamps and sends one data packet. The header's SSRC selects the
    /// sending source; zero means the session default.
    pub fn write_data(&self, mut packet: rtp::Packet) -> Result<Status> {
        let now = Instant::now();
        let (buf, transport, crypto) = {
            let mut inner = self.lock()?;
            if inner.closed {
                return Err(Error::ErrSessionClosed);
            }
            let Some(transport) = inner.transport.clone() else {
                return Err(Error::ErrNoTransport);
            };
            if !transport.is_established() {
                return Ok(Status::Ignore);
            }
            let cfg = inner.config.clone();
            let base = inner.base_time;
            let ssrc = if packet.header.ssrc == 0 {
                inner.local_ssrc(now)
            } else {
                packet.header.ssrc
            };
            let transport_sequence = cfg
                .transport_wide_seq_id
                .map(|_| inner.congestion.next_transmit_sequence());
            let Some(source) = inner.sources.get_mut(&ssrc) else {
                return Err(Error::ErrUnknownSsrc);
            };
            if source.direction != Direction::Sender {
                return Err(Error::ErrSsrcInUse);
            }
            source.on_send_data(&mut packet, now, &base, &cfg, transport_sequence)?;
            let raw = packet.marshal()?;
            (
                BytesMut::from(&raw[..]),
                transport,
                inner.crypto.clone(),
            )
        };
        self.protect_and_send(buf, SubChannel::Data, transport, crypto)
    }

    /// Feeds one raw data-subchannel datagram into the session. Returns the
    /// processing status and every packet released for delivery, in order.
    pub fn on_received_data(&self, data: &mut BytesMut) -> Result<(Status, Vec<rtp::Packet>)> {
        let now = Instant::now();
        let mut buf = data.split();
        let crypto = {
            let inner = self.lock()?;
            if inner.closed {
                return Err(Error::ErrSessionClosed);
            }
            inner.crypto.clone()
        };
        if let Some(crypto) = &crypto {
            match crypto.unprotect(&mut buf, SubChannel::Data) {
                Status::Process => {}
                other => return Ok((other, vec![])),
            }
        }
        let mut raw = buf.freeze();
        let packet = rtp::Packet::unmarshal(&mut raw)?;

        let mut inner = self.lock()?;
        Ok(inner.receive_data_packet(packet, now))
    }

    /// Feeds one raw control-subchannel datagram into the session. A
    /// truncated compound is processed up to the damage.
    pub fn on_received_control(&self, data: &mut BytesMut) -> Result<Status> {
        let now = Instant::now();
        let mut buf = data.split();
        let crypto = {
            let inner = self.lock()?;
            if inner.closed {
                return Err(Error::ErrSessionClosed);
            }
            inner.crypto.clone()
        };
        if let Some(crypto) = &crypto {
            match crypto.unprotect(&mut buf, SubChannel::Control) {
                Status::Process => {}
                other => return Ok(other),
            }
        }

        let mut raw = buf.freeze();
        let mut packets = vec![];
        while !raw.is_empty() {
            match rtcp::Packet::unmarshal_one(&mut raw) {
                Ok(p) => packets.push(p),
                Err(e) => {
                    debug!("damaged control compound, keeping {} packets: {e}", packets.len());
                    break;
                }
            }
        }
        if packets.is_empty() {
            return Ok(Status::Ignore);
        }

        let (outcome, transport, crypto) = {
            let mut inner = self.lock()?;
            let outcome = report::process_compound(&mut inner, &packets, now);
            (outcome, inner.transport.clone(), inner.crypto.clone())
        };

        if let Some(transport) = transport {
            for compound in &outcome.reply_compounds {
                let payload = rtcp::marshal_compound(compound)?;
                self.protect_and_send(
                    BytesMut::from(&payload[..]),
                    SubChannel::Control,
                    transport.clone(),
                    crypto.clone(),
                )?;
            }
            for replay in &outcome.replays {
                let raw = replay.marshal()?;
                self.protect_and_send(
                    BytesMut::from(&raw[..]),
                    SubChannel::Data,
                    transport.clone(),
                    crypto.clone(),
                )?;
            }
        }
        Ok(outcome.status)
    }

    /// The next instant [RtpSession::handle_timeout] wants to run.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.inner.read().ok()?.scheduler.next_deadline()
    }

    /// Drains the application-facing event queue.
    pub fn poll_event(&self) -> Option<SessionEvent> {
        self.inner.write().ok()?.events.pop_front()
    }

    /// Runs every scheduled action whose deadline has passed. Returns data
    /// packets released by expired reorder windows.
    pub fn handle_timeout(&self, now: Instant) -> Result<Vec<rtp::Packet>> {
        let mut released = vec![];
        let mut control_payloads = vec![];
        let (transport, crypto) = {
            let mut inner = self.lock()?;
            if inner.closed {
                return Ok(vec![]);
            }
            let cfg = inner.config.clone();
            for action in inner.scheduler.poll(now) {
                match action {
                    Action::SendReport => {
                        let packets = report::build_report(&mut inner, now, false);
                        if !packets.is_empty() {
                            control_payloads.push(rtcp::marshal_compound(&packets)?);
                        }
                        let interval = inner.config.report_interval;
                        inner.scheduler.schedule(now + interval, Action::SendReport);
                    }
                    Action::ExpirePending { ssrc } => {
                        if let Some(source) = inner.sources.get_mut(&ssrc) {
                            released.extend(source.expire_pending(now, &cfg));
                            if let Some(deadline) = source.pending_deadline() {
                                inner
                                    .scheduler
                                    .schedule(deadline, Action::ExpirePending { ssrc });
                            }
                        }
                    }
                    Action::FlushCongestionFeedback => {
                        inner.congestion_flush_armed = false;
                        if inner.congestion.has_arrivals() {
                            let packets = report::build_congestion_feedback(&mut inner, now);
                            if !packets.is_empty() {
                                control_payloads.push(rtcp::marshal_compound(&packets)?);
                            }
                        }
                    }
                    Action::CheckStaleReceivers => {
                        let timeout = cfg.stale_receiver_timeout;
                        let stale: Vec<u32> = inner
                            .sources
                            .values()
                            .filter(|s| s.is_stale(now, timeout))
                            .map(|s| s.ssrc)
                            .collect();
                        for ssrc in stale {
                            info!(
                                "session {}: purging stale source {ssrc:08x}",
                                cfg.session_id
                            );
                            inner.remove_source(ssrc);
                        }
                        inner
                            .scheduler
                            .schedule(now + timeout, Action::CheckStaleReceivers);
                    }
                }
            }
            (inner.transport.clone(), inner.crypto.clone())
        };

        if let Some(transport) = transport {
            for payload in control_payloads {
                self.protect_and_send(
                    BytesMut::from(&payload[..]),
                    SubChannel::Control,
                    transport.clone(),
                    crypto.clone(),
                )?;
            }
        }
        Ok(released)
    }

    /// Builds and sends a report compound immediately, regardless of the
    /// periodic schedule.
    pub fn send_report(&self) -> Result<Status> {
        let now = Instant::now();
        self.send_control(|inner| Ok(report::build_report(inner, now, true)))
    }

    /// NACKs the given sequence numbers of a remote source and starts
    /// expecting their retransmissions.
    pub fn send_nack(&self, ssrc: u32, sequence_numbers: &[u16]) -> Result<Status> {
        if sequence_numbers.is_empty() {
            return Ok(Status::Ignore);
        }
        let now = Instant::now();
        self.send_control(|inner| {
            if !inner.config.feedback.nack {
                return Ok(vec![]);
            }
            let sender_ssrc = inner.local_ssrc(now);
            let Some(source) = inner.sources.get_mut(&ssrc) else {
                return Err(Error::ErrUnknownSsrc);
            };
            source.note_nack_sent(sequence_numbers, now);
            let mut packets = report::feedback_preamble(inner, now);
            packets.push(rtcp::Packet::TransportLayerNack(TransportLayerNack {
                sender_ssrc,
                media_ssrc: ssrc,
                nacks: nack_pairs_from_sequence_numbers(sequence_numbers),
            }));
            Ok(packets)
        })
    }

    /// Asks the remote sender for a picture refresh: a full intra request
    /// when `full`, otherwise a picture loss indication.
    pub fn send_intra_frame_request(&self, ssrc: u32, full: bool) -> Result<Status> {
        let now = Instant::now();
        self.send_control(|inner| {
            let feedback = inner.config.feedback;
            let sender_ssrc = inner.local_ssrc(now);
            let mut packets = report::feedback_preamble(inner, now);
            if full && feedback.fir {
                inner.fir_sequence = inner.fir_sequence.wrapping_add(1);
                packets.push(rtcp::Packet::FullIntraRequest(FullIntraRequest {
                    sender_ssrc,
                    media_ssrc: ssrc,
                    fir: vec![FirEntry {
                        ssrc,
                        sequence_number: inner.fir_sequence,
                    }],
                }));
            } else if feedback.pli {
                packets.push(rtcp::Packet::PictureLossIndication(PictureLossIndication {
                    sender_ssrc,
                    media_ssrc: ssrc,
                }));
            } else {
                return Ok(vec![]);
            }
            Ok(packets)
        })
    }

    /// Sends a bitrate cap for the remote sender, as TMMBR when negotiated
    /// and REMB otherwise. `notification` answers a request instead.
    pub fn send_flow_control(
        &self,
        bitrate: u64,
        overhead: u16,
        notification: bool,
    ) -> Result<Status> {
        let now = Instant::now();
        self.send_control(|inner| {
            let feedback = inner.config.feedback;
            let sender_ssrc = inner.local_ssrc(now);
            let media_ssrc = inner.default_recv_ssrc.unwrap_or(0);
            let mut packets = report::feedback_preamble(inner, now);
            if feedback.tmmbr {
                packets.push(rtcp::Packet::TransportLayerTmmb(TransportLayerTmmb {
                    notification,
                    sender_ssrc,
                    media_ssrc,
                    entries: vec![TmmbEntry {
                        ssrc: media_ssrc,
                        bitrate,
                        overhead,
                    }],
                }));
            } else if feedback.remb && !notification {
                let ssrcs: Vec<u32> = inner
                    .sources
                    .values()
                    .filter(|s| s.direction == Direction::Receiver && !s.is_rtx)
                    .map(|s| s.ssrc)
                    .collect();
                packets.push(rtcp::Packet::ReceiverEstimatedMaximumBitrate(
                    ReceiverEstimatedMaximumBitrate {
                        sender_ssrc,
                        bitrate,
                        ssrcs,
                    },
                ));
            } else {
                return Ok(vec![]);
            }
            Ok(packets)
        })
    }

    /// Asks the remote sender to rebalance temporal versus spatial quality.
    pub fn send_temporal_spatial_trade_off(&self, ssrc: u32, index: u8) -> Result<Status> {
        let now = Instant::now();
        self.send_control(|inner| {
            if !inner.config.feedback.tsto {
                return Ok(vec![]);
            }
            let sender_ssrc = inner.local_ssrc(now);
            inner.tsto_sequence = inner.tsto_sequence.wrapping_add(1);
            let entry = TstoEntry {
                ssrc,
                sequence_number: inner.tsto_sequence,
                index,
            };
            let mut packets = report::feedback_preamble(inner, now);
            packets.push(rtcp::Packet::TemporalSpatialTradeOff(
                TemporalSpatialTradeOff {
                    notification: false,
                    sender_ssrc,
                    media_ssrc: ssrc,
                    entries: vec![entry],
                },
            ));
            Ok(packets)
        })
    }

    pub fn statistics(&self) -> Result<SessionStatistics> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::Other("session lock poisoned".to_owned()))?;
        let mut stats = SessionStatistics {
            session_id: inner.config.session_id,
            label: inner.config.label.clone(),
            round_trip_time: inner.round_trip_time,
            senders: vec![],
            receivers: vec![],
        };
        for source in inner.sources.values() {
            match source.direction {
                Direction::Sender => stats.senders.push(source.statistics()),
                Direction::Receiver => stats.receivers.push(source.statistics()),
            }
        }
        stats.senders.sort_by_key(|s| s.ssrc);
        stats.receivers.sort_by_key(|s| s.ssrc);
        Ok(stats)
    }

    /// Builds a control compound under the lock and sends it outside of it.
    fn send_control(
        &self,
        build: impl FnOnce(&mut SessionInner) -> Result<Vec<rtcp::Packet>>,
    ) -> Result<Status> {
        let (payload, transport, crypto) = {
            let mut inner = self.lock()?;
            if inner.closed {
                return Err(Error::ErrSessionClosed);
            }
            let packets = build(&mut inner)?;
            if packets.is_empty() {
                return Ok(Status::Ignore);
            }
            let Some(transport) = inner.transport.clone() else {
                return Err(Error::ErrNoTransport);
            };
            (
                rtcp::marshal_compound(&packets)?,
                transport,
                inner.crypto.clone(),
            )
        };
        self.protect_and_send(
            BytesMut::from(&payload[..]),
            SubChannel::Control,
            transport,
            crypto,
        )
    }

    fn protect_and_send(
        &self,
        mut buf: BytesMut,
        subchannel: SubChannel,
        transport: Arc<dyn MediaTransport>,
        crypto: Option<Arc<dyn CryptoContext>>,
    ) -> Result<Status> {
        if let Some(crypto) = crypto {
            match crypto.protect(&mut buf, subchannel) {
                Status::Process => {}
                other => return Ok(other),
            }
        }
        if let Err(e) = transport.write(&buf, subchannel, None) {
            warn!("transport write failed: {e}");
            return Ok(Status::Abort);
        }
        Ok(Status::Process)
    }
}
