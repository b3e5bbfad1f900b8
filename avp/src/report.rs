//! Assembles outbound RTCP compounds and interprets inbound ones.
//!
//! Compounds always open with an SR or RR and carry an SDES, per RFC 3550
//! §6.1; feedback goes out behind an empty RR preamble the same way.

use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};

use rtcp::extended_report::{
    DlrrBlock, DlrrReport, ExtendedReport, ReceiverReferenceTimeBlock, ReportBlock,
};
use rtcp::goodbye::Goodbye;
use rtcp::receiver_report::ReceiverReport;
use rtcp::reception_report::ReceptionReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::{
    SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};
use rtcp::transport_feedbacks::tmmb::TransportLayerTmmb;
use shared::time::{duration_to_dlsr, ntp_middle32};

use crate::congestion::CongestionFeedbackHandler;
use crate::session::SessionInner;
use crate::source::SyncSource;
use crate::{Direction, SessionEvent, Status};

/// What processing one control compound produced: feedback replies to send
/// on the control subchannel and data packets to retransmit.
pub(crate) struct ControlOutcome {
    pub(crate) status: Status,
    pub(crate) reply_compounds: Vec<Vec<rtcp::Packet>>,
    pub(crate) replays: Vec<rtp::Packet>,
}

/// Builds the periodic report compound. Comes back empty when there is
/// nothing to say and the report is not forced.
pub(crate) fn build_report(
    inner: &mut SessionInner,
    now: Instant,
    force: bool,
) -> Vec<rtcp::Packet> {
    let cfg = inner.config.clone();
    let local = inner.local_ssrc(now);

    let mut blocks: Vec<ReceptionReport> = vec![];
    let remote_ssrcs: Vec<u32> = inner
        .sources
        .values()
        .filter(|s| s.direction == Direction::Receiver && !s.is_rtx)
        .map(|s| s.ssrc)
        .collect();
    for ssrc in remote_ssrcs {
        if let Some(source) = inner.sources.get_mut(&ssrc) {
            if let Some(block) = source.build_reception_report(now) {
                blocks.push(block);
            }
        }
    }

    let mut sender_ssrcs: Vec<u32> = inner
        .sources
        .values()
        .filter(|s| s.direction == Direction::Sender && !s.is_rtx && s.packets > 0)
        .map(|s| s.ssrc)
        .collect();
    sender_ssrcs.sort_unstable();

    if !force && sender_ssrcs.is_empty() && blocks.is_empty() {
        return vec![];
    }

    let ntp = inner.base_time.ntp(now);
    let rtp_time = now
        .saturating_duration_since(inner.created)
        .as_millis() as u32
        * cfg.kind.time_units();

    let mut packets = vec![];
    if sender_ssrcs.is_empty() {
        packets.push(rtcp::Packet::ReceiverReport(ReceiverReport {
            ssrc: local,
            reports: std::mem::take(&mut blocks),
            ..Default::default()
        }));
    } else {
        for (i, ssrc) in sender_ssrcs.iter().enumerate() {
            let Some(source) = inner.sources.get_mut(ssrc) else {
                continue;
            };
            packets.push(rtcp::Packet::SenderReport(SenderReport {
                ssrc: *ssrc,
                ntp_time: ntp,
                rtp_time,
                packet_count: source.packets,
                octet_count: source.octets as u32,
                reports: if i == 0 {
                    std::mem::take(&mut blocks)
                } else {
                    vec![]
                },
                ..Default::default()
            }));
            source.record_sender_report_sent(ntp, now);
        }
    }

    if let Some(sdes) = source_description(&cfg.cname, &cfg.tool, local) {
        packets.push(sdes);
    }

    if cfg.extended_reports {
        let mut xr_blocks = vec![ReportBlock::ReceiverReferenceTime(
            ReceiverReferenceTimeBlock { ntp_timestamp: ntp },
        )];
        let dlrr: Vec<DlrrReport> = inner
            .sources
            .values()
            .filter_map(|s| {
                let (last_rr, at) = s.remote_reference_time?;
                Some(DlrrReport {
                    ssrc: s.ssrc,
                    last_rr,
                    dlrr: duration_to_dlsr(now.saturating_duration_since(at)),
                })
            })
            .collect();
        if !dlrr.is_empty() {
            xr_blocks.push(ReportBlock::Dlrr(DlrrBlock { reports: dlrr }));
        }
        packets.push(rtcp::Packet::ExtendedReport(ExtendedReport {
            sender_ssrc: local,
            blocks: xr_blocks,
        }));
    }

    packets
}

/// The empty RR plus SDES that RFC 4585 requires in front of feedback.
pub(crate) fn feedback_preamble(inner: &mut SessionInner, now: Instant) -> Vec<rtcp::Packet> {
    let local = inner.local_ssrc(now);
    let mut packets = vec![rtcp::Packet::ReceiverReport(ReceiverReport {
        ssrc: local,
        ..Default::default()
    })];
    if let Some(sdes) = source_description(&inner.config.cname, "", local) {
        packets.push(sdes);
    }
    packets
}

/// The goodbye compound sent when the session closes.
pub(crate) fn build_bye(inner: &mut SessionInner, reason: &str, now: Instant) -> Vec<rtcp::Packet> {
    let local = inner.local_ssrc(now);
    let mut leaving: Vec<u32> = inner
        .sources
        .values()
        .filter(|s| s.direction == Direction::Sender && s.packets > 0 && !s.is_rtx)
        .map(|s| s.ssrc)
        .collect();
    leaving.sort_unstable();
    if leaving.is_empty() {
        leaving.push(local);
    }

    let mut packets = feedback_preamble(inner, now);
    packets.push(rtcp::Packet::Goodbye(Goodbye {
        sources: leaving,
        reason: Bytes::copy_from_slice(reason.as_bytes()),
    }));
    packets
}

/// Drains queued congestion arrival records into one or more feedback
/// packets behind the usual preamble.
pub(crate) fn build_congestion_feedback(
    inner: &mut SessionInner,
    now: Instant,
) -> Vec<rtcp::Packet> {
    let local = inner.local_ssrc(now);
    let media = inner.default_recv_ssrc.unwrap_or(0);
    let feedbacks = inner.congestion.build_feedback(local, media, now);
    if feedbacks.is_empty() {
        return vec![];
    }
    let mut packets = feedback_preamble(inner, now);
    packets.extend(feedbacks.into_iter().map(rtcp::Packet::TransportLayerCc));
    packets
}

/// Dispatches every sub-packet of a received control compound.
pub(crate) fn process_compound(
    inner: &mut SessionInner,
    packets: &[rtcp::Packet],
    now: Instant,
) -> ControlOutcome {
    let mut outcome = ControlOutcome {
        status: Status::Ignore,
        reply_compounds: vec![],
        replays: vec![],
    };

    for packet in packets {
        let handled = match packet {
            rtcp::Packet::SenderReport(sr) => {
                if let Some(source) = remote_source(inner, sr.ssrc, now) {
                    source.on_rx_sender_report(sr.ntp_time, now);
                    handle_reception_reports(inner, &sr.reports, now);
                    true
                } else {
                    false
                }
            }
            rtcp::Packet::ReceiverReport(rr) => {
                handle_reception_reports(inner, &rr.reports, now);
                true
            }
            rtcp::Packet::SourceDescription(sdes) => {
                for chunk in &sdes.chunks {
                    let Some(source) = inner.sources.get_mut(&chunk.source) else {
                        continue;
                    };
                    for item in &chunk.items {
                        if item.sdes_type == SdesType::SdesCname {
                            source.cname =
                                Some(String::from_utf8_lossy(&item.text).into_owned());
                        }
                    }
                }
                true
            }
            rtcp::Packet::Goodbye(bye) => {
                let reason = String::from_utf8_lossy(&bye.reason).into_owned();
                for &ssrc in &bye.sources {
                    if inner.remove_source(ssrc) {
                        inner.events.push_back(SessionEvent::ByeReceived {
                            ssrc,
                            reason: reason.clone(),
                        });
                    }
                }
                true
            }
            rtcp::Packet::ApplicationDefined(app) => {
                debug!(
                    "ignoring application-defined packet {:?} from {:08x}",
                    app.name, app.ssrc
                );
                false
            }
            rtcp::Packet::ExtendedReport(xr) => {
                handle_extended_report(inner, xr, now);
                true
            }
            rtcp::Packet::TransportLayerNack(nack) => handle_nack(inner, nack, &mut outcome),
            rtcp::Packet::TransportLayerTmmb(tmmb) => {
                let Some(entry) = tmmb.entries.first() else {
                    continue;
                };
                inner.events.push_back(SessionEvent::FlowControl {
                    bitrate: entry.bitrate,
                    notification: tmmb.notification,
                });
                if !tmmb.notification {
                    // answer the request with the bounding set we accepted
                    let local = inner.local_ssrc(now);
                    let mut reply = feedback_preamble(inner, now);
                    reply.push(rtcp::Packet::TransportLayerTmmb(TransportLayerTmmb {
                        notification: true,
                        sender_ssrc: local,
                        media_ssrc: tmmb.media_ssrc,
                        entries: tmmb.entries.clone(),
                    }));
                    outcome.reply_compounds.push(reply);
                }
                true
            }
            rtcp::Packet::TransportLayerCc(tcc) => {
                let (received, lost) = CongestionFeedbackHandler::consume_feedback(tcc);
                inner
                    .events
                    .push_back(SessionEvent::CongestionFeedback { packets: received, lost });
                true
            }
            rtcp::Packet::PictureLossIndication(pli) => {
                if local_sender(inner, pli.media_ssrc) {
                    inner.events.push_back(SessionEvent::IntraFrameRequest {
                        ssrc: pli.media_ssrc,
                        full: false,
                    });
                    true
                } else {
                    warn_spoofed(inner, pli.media_ssrc, "pli");
                    false
                }
            }
            rtcp::Packet::FullIntraRequest(fir) => {
                let mut any = false;
                for entry in &fir.fir {
                    if !local_sender(inner, entry.ssrc) {
                        warn_spoofed(inner, entry.ssrc, "fir");
                        continue;
                    }
                    let Some(source) = inner.sources.get_mut(&entry.ssrc) else {
                        continue;
                    };
                    if source.accepts_fir(entry.sequence_number) {
                        inner.events.push_back(SessionEvent::IntraFrameRequest {
                            ssrc: entry.ssrc,
                            full: true,
                        });
                    }
                    any = true;
                }
                any
            }
            rtcp::Packet::TemporalSpatialTradeOff(tsto) => {
                if tsto.notification {
                    debug!("trade-off notification from {:08x}", tsto.sender_ssrc);
                    false
                } else {
                    let mut entries = vec![];
                    for entry in &tsto.entries {
                        if !local_sender(inner, entry.ssrc) {
                            continue;
                        }
                        let Some(source) = inner.sources.get_mut(&entry.ssrc) else {
                            continue;
                        };
                        if source.accepts_tsto(entry.sequence_number) {
                            inner
                                .events
                                .push_back(SessionEvent::TemporalSpatialTradeOff {
                                    ssrc: entry.ssrc,
                                    index: entry.index,
                                });
                        }
                        entries.push(*entry);
                    }
                    if !entries.is_empty() {
                        let local = inner.local_ssrc(now);
                        let mut reply = feedback_preamble(inner, now);
                        reply.push(rtcp::Packet::TemporalSpatialTradeOff(
                            rtcp::payload_feedbacks::temporal_spatial_trade_off::TemporalSpatialTradeOff {
                                notification: true,
                                sender_ssrc: local,
                                media_ssrc: tsto.sender_ssrc,
                                entries,
                            },
                        ));
                        outcome.reply_compounds.push(reply);
                        true
                    } else {
                        false
                    }
                }
            }
            rtcp::Packet::ReceiverEstimatedMaximumBitrate(remb) => {
                inner.events.push_back(SessionEvent::FlowControl {
                    bitrate: remb.bitrate,
                    notification: false,
                });
                true
            }
            rtcp::Packet::Raw(raw) => {
                debug!("ignoring unrecognized control packet, {} bytes", raw.0.len());
                false
            }
        };
        if handled {
            outcome.status = Status::Process;
        }
    }
    outcome
}

fn source_description(cname: &str, tool: &str, ssrc: u32) -> Option<rtcp::Packet> {
    let mut items = vec![];
    if !cname.is_empty() {
        items.push(SourceDescriptionItem {
            sdes_type: SdesType::SdesCname,
            text: Bytes::copy_from_slice(cname.as_bytes()),
        });
    }
    if !tool.is_empty() {
        items.push(SourceDescriptionItem {
            sdes_type: SdesType::SdesTool,
            text: Bytes::copy_from_slice(tool.as_bytes()),
        });
    }
    if items.is_empty() {
        return None;
    }
    Some(rtcp::Packet::SourceDescription(SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source: ssrc,
            items,
        }],
    }))
}

fn remote_source<'a>(
    inner: &'a mut SessionInner,
    ssrc: u32,
    now: Instant,
) -> Option<&'a mut SyncSource> {
    if !inner.sources.contains_key(&ssrc) {
        if !inner.config.any_ssrc_allowed {
            warn_spoofed(inner, ssrc, "report");
            return None;
        }
        inner
            .sources
            .insert(ssrc, SyncSource::new(ssrc, Direction::Receiver, now));
        if inner.default_recv_ssrc.is_none() {
            inner.default_recv_ssrc = Some(ssrc);
        }
    }
    inner.sources.get_mut(&ssrc)
}

fn local_sender(inner: &SessionInner, ssrc: u32) -> bool {
    inner
        .sources
        .get(&ssrc)
        .map(|s| s.direction == Direction::Sender)
        .unwrap_or(false)
}

fn warn_spoofed(inner: &mut SessionInner, ssrc: u32, what: &str) {
    if inner.warned_ssrcs.insert(ssrc) {
        warn!(
            "session {}: {what} for unknown or foreign source {ssrc:08x}",
            inner.config.session_id
        );
    }
}

fn handle_reception_reports(inner: &mut SessionInner, reports: &[ReceptionReport], now: Instant) {
    for report in reports {
        let Some(source) = inner
            .sources
            .get_mut(&report.ssrc)
            .filter(|s| s.direction == Direction::Sender)
        else {
            continue;
        };
        if let Some(rtt) = source.on_rx_reception_report(report, now) {
            inner.round_trip_time = Some(rtt);
            inner
                .events
                .push_back(SessionEvent::RoundTripTime { rtt });
        }
    }
}

fn handle_extended_report(inner: &mut SessionInner, xr: &ExtendedReport, now: Instant) {
    for block in &xr.blocks {
        match block {
            ReportBlock::ReceiverReferenceTime(rrtr) => {
                if let Some(source) = remote_source(inner, xr.sender_ssrc, now) {
                    source.remote_reference_time =
                        Some((ntp_middle32(rrtr.ntp_timestamp), now));
                }
            }
            ReportBlock::Dlrr(dlrr) => {
                let now_middle = ntp_middle32(inner.base_time.ntp(now));
                for report in &dlrr.reports {
                    if !local_sender(inner, report.ssrc) {
                        continue;
                    }
                    // all three terms are in 1/65536 s units
                    let units = now_middle
                        .wrapping_sub(report.last_rr)
                        .wrapping_sub(report.dlrr);
                    let rtt = Duration::from_secs_f64(units as f64 / 65536.0)
                        .max(Duration::from_millis(1));
                    if rtt > Duration::from_secs(2) {
                        continue;
                    }
                    inner.round_trip_time = Some(rtt);
                    inner.events.push_back(SessionEvent::RoundTripTime { rtt });
                }
            }
            ReportBlock::Unknown(b) => {
                debug!("ignoring extended report block type {}", b.block_type);
            }
        }
    }
}

fn handle_nack(
    inner: &mut SessionInner,
    nack: &rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack,
    outcome: &mut ControlOutcome,
) -> bool {
    let sequence_numbers: Vec<u16> = nack.nacks.iter().flat_map(|p| p.packet_list()).collect();
    let valid = inner
        .sources
        .get(&nack.media_ssrc)
        .map(|s| s.direction == Direction::Sender && !s.is_rtx)
        .unwrap_or(false);
    if !valid {
        warn_spoofed(inner, nack.media_ssrc, "nack");
        return false;
    }
    let Some(source) = inner.sources.get_mut(&nack.media_ssrc) else {
        return false;
    };
    let originals = source.on_rx_nack(&sequence_numbers);
    let link = (source.rtx_ssrc, source.rtx_payload_type);
    match link {
        (Some(rtx_ssrc), Some(rtx_payload_type)) => {
            if let Some(rtx) = inner.sources.get_mut(&rtx_ssrc) {
                for original in originals {
                    let seq = rtx.next_send_sequence();
                    outcome
                        .replays
                        .push(rtp::rtx::wrap(&original, rtx_ssrc, rtx_payload_type, seq));
                }
            }
        }
        _ => outcome.replays.extend(originals),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::RtpSession;
    use crate::source::RxKind;
    use shared::time::unix2ntp;

    fn inner_of(session: &RtpSession) -> std::sync::RwLockWriteGuard<'_, SessionInner> {
        session.inner_for_tests()
    }

    fn data_packet(ssrc: u32, seq: u16) -> rtp::Packet {
        rtp::Packet {
            header: rtp::Header {
                version: 2,
                payload_type: 96,
                sequence_number: seq,
                timestamp: seq as u32 * 160,
                ssrc,
                ..Default::default()
            },
            payload: Bytes::from_static(&[1, 2, 3]),
        }
    }

    fn session_with_cname() -> RtpSession {
        RtpSession::new(SessionConfig::default().with_cname("user@host"))
    }

    #[test]
    fn test_receiver_only_report_is_rr_sdes() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        // a remote source with fresh data
        let cfg = inner.config.clone();
        inner
            .sources
            .insert(7, SyncSource::new(7, Direction::Receiver, now));
        if let Some(s) = inner.sources.get_mut(&7) {
            s.on_receive_data(data_packet(7, 1), RxKind::FromNetwork, now, &cfg);
        }

        let packets = build_report(&mut inner, now, false);
        assert!(matches!(
            &packets[0],
            rtcp::Packet::ReceiverReport(rr) if rr.reports.len() == 1 && rr.reports[0].ssrc == 7
        ));
        assert!(matches!(
            &packets[1],
            rtcp::Packet::SourceDescription(sdes)
                if sdes.chunks[0].items[0].text == Bytes::from_static(b"user@host")
        ));
    }

    #[test]
    fn test_report_suppressed_when_nothing_new() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        let cfg = inner.config.clone();
        inner
            .sources
            .insert(7, SyncSource::new(7, Direction::Receiver, now));
        if let Some(s) = inner.sources.get_mut(&7) {
            s.on_receive_data(data_packet(7, 1), RxKind::FromNetwork, now, &cfg);
        }
        assert!(!build_report(&mut inner, now, false).is_empty());
        // same state again: nothing to report
        assert!(build_report(&mut inner, now, false).is_empty());
        // but a forced report still goes out, as an empty RR
        let forced = build_report(&mut inner, now, true);
        assert!(matches!(
            &forced[0],
            rtcp::Packet::ReceiverReport(rr) if rr.reports.is_empty()
        ));
    }

    #[test]
    fn test_sender_report_carries_counts_and_blocks() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        let cfg = inner.config.clone();
        let base = inner.base_time;
        inner
            .sources
            .insert(0x51, SyncSource::new(0x51, Direction::Sender, now));
        if let Some(s) = inner.sources.get_mut(&0x51) {
            let mut p = data_packet(0, 0);
            s.on_send_data(&mut p, now, &base, &cfg, None).unwrap();
        }
        inner
            .sources
            .insert(7, SyncSource::new(7, Direction::Receiver, now));
        if let Some(s) = inner.sources.get_mut(&7) {
            s.on_receive_data(data_packet(7, 1), RxKind::FromNetwork, now, &cfg);
        }

        let packets = build_report(&mut inner, now, false);
        let rtcp::Packet::SenderReport(sr) = &packets[0] else {
            panic!("expected a sender report");
        };
        assert_eq!(sr.ssrc, 0x51);
        assert_eq!(sr.packet_count, 1);
        assert_eq!(sr.octet_count, 3);
        assert_eq!(sr.reports.len(), 1);
        assert!(sr.ntp_time > 0);
    }

    #[test]
    fn test_bye_compound_shape() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);
        inner
            .sources
            .insert(0x51, SyncSource::new(0x51, Direction::Sender, now));

        let packets = build_bye(&mut inner, "shutting down", now);
        assert!(matches!(&packets[0], rtcp::Packet::ReceiverReport(_)));
        let rtcp::Packet::Goodbye(bye) = packets.last().unwrap() else {
            panic!("expected goodbye last");
        };
        assert_eq!(bye.sources, vec![0x51]);
        assert_eq!(bye.reason, Bytes::from_static(b"shutting down"));
    }

    #[test]
    fn test_bye_skips_silent_and_rtx_senders() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        let cfg = inner.config.clone();
        let base = inner.base_time;
        for ssrc in [0x51u32, 0x52, 0x53] {
            inner
                .sources
                .insert(ssrc, SyncSource::new(ssrc, Direction::Sender, now));
        }
        // 0x51 sent media, 0x52 never did, 0x53 is a retransmission stream
        for ssrc in [0x51u32, 0x53] {
            if let Some(s) = inner.sources.get_mut(&ssrc) {
                let mut p = data_packet(ssrc, 0);
                s.on_send_data(&mut p, now, &base, &cfg, None).unwrap();
            }
        }
        if let Some(s) = inner.sources.get_mut(&0x53) {
            s.is_rtx = true;
        }

        let packets = build_bye(&mut inner, "", now);
        let rtcp::Packet::Goodbye(bye) = packets.last().unwrap() else {
            panic!("expected goodbye last");
        };
        assert_eq!(bye.sources, vec![0x51]);
    }

    #[test]
    fn test_goodbye_removes_source_and_raises_event() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);
        inner
            .sources
            .insert(7, SyncSource::new(7, Direction::Receiver, now));

        let packets = vec![rtcp::Packet::Goodbye(Goodbye {
            sources: vec![7],
            reason: Bytes::from_static(b"bye"),
        })];
        let outcome = process_compound(&mut inner, &packets, now);
        assert_eq!(outcome.status, Status::Process);
        assert!(!inner.sources.contains_key(&7));
        assert_eq!(
            inner.events.pop_front(),
            Some(SessionEvent::ByeReceived {
                ssrc: 7,
                reason: "bye".into()
            })
        );
    }

    #[test]
    fn test_reception_report_round_trip_event() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);
        inner
            .sources
            .insert(0x51, SyncSource::new(0x51, Direction::Sender, now));
        let ntp = unix2ntp(Duration::from_secs(1_700_000_000));
        if let Some(s) = inner.sources.get_mut(&0x51) {
            s.record_sender_report_sent(ntp, now);
        }

        let later = now + Duration::from_millis(80);
        let packets = vec![rtcp::Packet::ReceiverReport(ReceiverReport {
            ssrc: 9,
            reports: vec![ReceptionReport {
                ssrc: 0x51,
                last_sender_report: ntp_middle32(ntp),
                delay: duration_to_dlsr(Duration::from_millis(30)),
                ..Default::default()
            }],
            ..Default::default()
        })];
        process_compound(&mut inner, &packets, later);
        let rtt = inner.round_trip_time.unwrap();
        assert!(rtt >= Duration::from_millis(40) && rtt <= Duration::from_millis(60));
        assert!(matches!(
            inner.events.pop_front(),
            Some(SessionEvent::RoundTripTime { .. })
        ));
    }

    #[test]
    fn test_nack_replays_through_rtx_stream() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        let cfg = inner.config.clone();
        let base = inner.base_time;
        let mut sender = SyncSource::new(0x51, Direction::Sender, now);
        sender.retransmit_buffer = crate::source::RetransmitBuffer::new(64);
        sender.rtx_ssrc = Some(0x52);
        sender.rtx_payload_type = Some(97);
        let mut sent_seq = 0;
        for _ in 0..3 {
            let mut p = data_packet(0, 0);
            sender.on_send_data(&mut p, now, &base, &cfg, None).unwrap();
            sent_seq = p.header.sequence_number;
        }
        inner.sources.insert(0x51, sender);
        let mut rtx = SyncSource::new(0x52, Direction::Sender, now);
        rtx.is_rtx = true;
        rtx.rtx_ssrc = Some(0x51);
        rtx.rtx_payload_type = Some(97);
        inner.sources.insert(0x52, rtx);

        let packets = vec![rtcp::Packet::TransportLayerNack(
            rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack {
                sender_ssrc: 9,
                media_ssrc: 0x51,
                nacks: rtcp::transport_feedbacks::transport_layer_nack::nack_pairs_from_sequence_numbers(&[sent_seq]),
            },
        )];
        let outcome = process_compound(&mut inner, &packets, now);
        assert_eq!(outcome.status, Status::Process);
        assert_eq!(outcome.replays.len(), 1);
        let replay = &outcome.replays[0];
        assert_eq!(replay.header.ssrc, 0x52);
        assert_eq!(replay.header.payload_type, 97);
        assert_eq!(&replay.payload[..2], &sent_seq.to_be_bytes());
    }

    #[test]
    fn test_spoofed_nack_ignored() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        let packets = vec![rtcp::Packet::TransportLayerNack(
            rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack {
                sender_ssrc: 9,
                media_ssrc: 0xBAD,
                nacks: vec![],
            },
        )];
        let outcome = process_compound(&mut inner, &packets, now);
        assert_eq!(outcome.status, Status::Ignore);
        assert!(outcome.replays.is_empty());
    }

    #[test]
    fn test_tmmbr_raises_event_and_replies_tmmbn() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);

        let packets = vec![rtcp::Packet::TransportLayerTmmb(TransportLayerTmmb {
            notification: false,
            sender_ssrc: 9,
            media_ssrc: 0x51,
            entries: vec![rtcp::transport_feedbacks::tmmb::TmmbEntry {
                ssrc: 0x51,
                bitrate: 512_000,
                overhead: 40,
            }],
        })];
        let outcome = process_compound(&mut inner, &packets, now);
        assert_eq!(
            inner.events.pop_front(),
            Some(SessionEvent::FlowControl {
                bitrate: 512_000,
                notification: false
            })
        );
        assert_eq!(outcome.reply_compounds.len(), 1);
        let reply = outcome.reply_compounds[0].last().unwrap();
        assert!(matches!(
            reply,
            rtcp::Packet::TransportLayerTmmb(t) if t.notification
        ));
    }

    #[test]
    fn test_fir_deduplicates_by_sequence() {
        let session = session_with_cname();
        let now = Instant::now();
        let mut inner = inner_of(&session);
        inner
            .sources
            .insert(0x51, SyncSource::new(0x51, Direction::Sender, now));

        let fir = rtcp::Packet::FullIntraRequest(
            rtcp::payload_feedbacks::full_intra_request::FullIntraRequest {
                sender_ssrc: 9,
                media_ssrc: 0x51,
                fir: vec![rtcp::payload_feedbacks::full_intra_request::FirEntry {
                    ssrc: 0x51,
                    sequence_number: 3,
                }],
            },
        );
        process_compound(&mut inner, &[fir.clone()], now);
        assert!(matches!(
            inner.events.pop_front(),
            Some(SessionEvent::IntraFrameRequest { ssrc: 0x51, full: true })
        ));
        // a repeat with the same sequence number is swallowed
        process_compound(&mut inner, &[fir], now);
        assert!(inner.events.pop_front().is_none());
    }

    #[test]
    fn test_xr_rrtr_recorded_and_answered_with_dlrr() {
        let session = RtpSession::new(
            SessionConfig::default()
                .with_cname("user@host"),
        );
        let now = Instant::now();
        let mut inner = inner_of(&session);
        inner.config.extended_reports = true;

        let xr = rtcp::Packet::ExtendedReport(ExtendedReport {
            sender_ssrc: 7,
            blocks: vec![ReportBlock::ReceiverReferenceTime(
                ReceiverReferenceTimeBlock {
                    ntp_timestamp: unix2ntp(Duration::from_secs(1_700_000_000)),
                },
            )],
        });
        process_compound(&mut inner, &[xr], now);
        assert!(inner.sources[&7].remote_reference_time.is_some());

        let packets = build_report(&mut inner, now + Duration::from_millis(10), true);
        let Some(rtcp::Packet::ExtendedReport(out)) = packets.last() else {
            panic!("expected a trailing extended report");
        };
        assert!(out
            .blocks
            .iter()
            .any(|b| matches!(b, ReportBlock::Dlrr(d) if d.reports[0].ssrc == 7)));
    }
}
