use bytes::{Buf, Bytes, BytesMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::application_defined::ApplicationDefined;
use crate::extended_report::ExtendedReport;
use crate::goodbye::Goodbye;
use crate::header::{
    FORMAT_FIR, FORMAT_NACK, FORMAT_PLI, FORMAT_REMB, FORMAT_TCC, FORMAT_TMMBN, FORMAT_TMMBR,
    FORMAT_TSTN, FORMAT_TSTR, HEADER_LENGTH, Header, PacketType,
};
use crate::payload_feedbacks::full_intra_request::FullIntraRequest;
use crate::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use crate::payload_feedbacks::receiver_estimated_maximum_bitrate::ReceiverEstimatedMaximumBitrate;
use crate::payload_feedbacks::temporal_spatial_trade_off::TemporalSpatialTradeOff;
use crate::raw_packet::RawPacket;
use crate::receiver_report::ReceiverReport;
use crate::sender_report::SenderReport;
use crate::source_description::SourceDescription;
use crate::transport_feedbacks::tmmb::TransportLayerTmmb;
use crate::transport_feedbacks::transport_layer_cc::TransportLayerCc;
use crate::transport_feedbacks::transport_layer_nack::TransportLayerNack;

/// One RTCP sub-packet of any type this crate understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    ApplicationDefined(ApplicationDefined),
    TransportLayerNack(TransportLayerNack),
    TransportLayerTmmb(TransportLayerTmmb),
    TransportLayerCc(TransportLayerCc),
    PictureLossIndication(PictureLossIndication),
    FullIntraRequest(FullIntraRequest),
    TemporalSpatialTradeOff(TemporalSpatialTradeOff),
    ReceiverEstimatedMaximumBitrate(ReceiverEstimatedMaximumBitrate),
    ExtendedReport(ExtendedReport),
    Raw(RawPacket),
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        match self {
            Packet::SenderReport(p) => p.marshal_size(),
            Packet::ReceiverReport(p) => p.marshal_size(),
            Packet::SourceDescription(p) => p.marshal_size(),
            Packet::Goodbye(p) => p.marshal_size(),
            Packet::ApplicationDefined(p) => p.marshal_size(),
            Packet::TransportLayerNack(p) => p.marshal_size(),
            Packet::TransportLayerTmmb(p) => p.marshal_size(),
            Packet::TransportLayerCc(p) => p.marshal_size(),
            Packet::PictureLossIndication(p) => p.marshal_size(),
            Packet::FullIntraRequest(p) => p.marshal_size(),
            Packet::TemporalSpatialTradeOff(p) => p.marshal_size(),
            Packet::ReceiverEstimatedMaximumBitrate(p) => p.marshal_size(),
            Packet::ExtendedReport(p) => p.marshal_size(),
            Packet::Raw(p) => p.marshal_size(),
        }
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Packet::SenderReport(p) => p.marshal_to(buf),
            Packet::ReceiverReport(p) => p.marshal_to(buf),
            Packet::SourceDescription(p) => p.marshal_to(buf),
            Packet::Goodbye(p) => p.marshal_to(buf),
            Packet::ApplicationDefined(p) => p.marshal_to(buf),
            Packet::TransportLayerNack(p) => p.marshal_to(buf),
            Packet::TransportLayerTmmb(p) => p.marshal_to(buf),
            Packet::TransportLayerCc(p) => p.marshal_to(buf),
            Packet::PictureLossIndication(p) => p.marshal_to(buf),
            Packet::FullIntraRequest(p) => p.marshal_to(buf),
            Packet::TemporalSpatialTradeOff(p) => p.marshal_to(buf),
            Packet::ReceiverEstimatedMaximumBitrate(p) => p.marshal_to(buf),
            Packet::ExtendedReport(p) => p.marshal_to(buf),
            Packet::Raw(p) => p.marshal_to(buf),
        }
    }
}

impl Packet {
    /// Parses exactly one sub-packet off the front of `raw`, advancing it.
    /// Unknown packet or feedback types come back as [Packet::Raw].
    pub fn unmarshal_one(raw: &mut Bytes) -> Result<Packet> {
        if raw.len() < HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header::unmarshal(&mut raw.clone())?;
        let total = (header.length as usize + 1) * 4;
        if raw.len() < total {
            return Err(Error::ErrPacketTooShort);
        }
        let mut body = raw.slice(..total);
        raw.advance(total);

        let packet = match header.packet_type {
            PacketType::SenderReport => Packet::SenderReport(SenderReport::unmarshal(&mut body)?),
            PacketType::ReceiverReport => {
                Packet::ReceiverReport(ReceiverReport::unmarshal(&mut body)?)
            }
            PacketType::SourceDescription => {
                Packet::SourceDescription(SourceDescription::unmarshal(&mut body)?)
            }
            PacketType::Goodbye => Packet::Goodbye(Goodbye::unmarshal(&mut body)?),
            PacketType::ApplicationDefined => {
                Packet::ApplicationDefined(ApplicationDefined::unmarshal(&mut body)?)
            }
            PacketType::TransportSpecificFeedback => match header.count {
                FORMAT_NACK => {
                    Packet::TransportLayerNack(TransportLayerNack::unmarshal(&mut body)?)
                }
                FORMAT_TMMBR | FORMAT_TMMBN => {
                    Packet::TransportLayerTmmb(TransportLayerTmmb::unmarshal(&mut body)?)
                }
                FORMAT_TCC => Packet::TransportLayerCc(TransportLayerCc::unmarshal(&mut body)?),
                _ => Packet::Raw(RawPacket::unmarshal(&mut body)?),
            },
            PacketType::PayloadSpecificFeedback => match header.count {
                FORMAT_PLI => {
                    Packet::PictureLossIndication(PictureLossIndication::unmarshal(&mut body)?)
                }
                FORMAT_FIR => Packet::FullIntraRequest(FullIntraRequest::unmarshal(&mut body)?),
                FORMAT_TSTR | FORMAT_TSTN => Packet::TemporalSpatialTradeOff(
                    TemporalSpatialTradeOff::unmarshal(&mut body)?,
                ),
                FORMAT_REMB => match ReceiverEstimatedMaximumBitrate::unmarshal(&mut body.clone())
                {
                    Ok(remb) => Packet::ReceiverEstimatedMaximumBitrate(remb),
                    // FMT 15 without the REMB magic is some other AFB
                    Err(Error::ErrWrongFeedbackFormat) => {
                        Packet::Raw(RawPacket::unmarshal(&mut body)?)
                    }
                    Err(e) => return Err(e),
                },
                _ => Packet::Raw(RawPacket::unmarshal(&mut body)?),
            },
            PacketType::ExtendedReport => {
                Packet::ExtendedReport(ExtendedReport::unmarshal(&mut body)?)
            }
            PacketType::Unsupported => Packet::Raw(RawPacket::unmarshal(&mut body)?),
        };
        Ok(packet)
    }
}

/// Serializes sub-packets back to back into one compound datagram.
pub fn marshal_compound(packets: &[Packet]) -> Result<Bytes> {
    let size = packets.iter().map(|p| p.marshal_size()).sum();
    let mut buf = BytesMut::with_capacity(size);
    buf.resize(size, 0);
    let mut offset = 0;
    for packet in packets {
        offset += packet.marshal_to(&mut buf[offset..])?;
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reception_report::ReceptionReport;

    #[test]
    fn test_compound_round_trip() {
        let packets = vec![
            Packet::ReceiverReport(ReceiverReport {
                ssrc: 0x902F9E2E,
                reports: vec![ReceptionReport {
                    ssrc: 0xBC5E9A40,
                    last_sequence_number: 0x46E1,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            Packet::PictureLossIndication(PictureLossIndication {
                sender_ssrc: 0x902F9E2E,
                media_ssrc: 0xBC5E9A40,
            }),
            Packet::Goodbye(Goodbye {
                sources: vec![0x902F9E2E],
                ..Default::default()
            }),
        ];
        let raw = marshal_compound(&packets).unwrap();

        let mut rest = raw.clone();
        let mut parsed = vec![];
        while !rest.is_empty() {
            parsed.push(Packet::unmarshal_one(&mut rest).unwrap());
        }
        assert_eq!(parsed, packets);
    }

    #[test]
    fn test_unknown_type_becomes_raw() {
        // packet type 198, length 1 word body
        let mut raw = Bytes::from_static(&[0x80, 0xC6, 0x00, 0x01, 0x11, 0x22, 0x33, 0x44]);
        let p = Packet::unmarshal_one(&mut raw).unwrap();
        assert!(matches!(p, Packet::Raw(_)));
        assert!(raw.is_empty());
    }

    #[test]
    fn test_truncated_declared_length() {
        // header claims 4 words of body but only 2 bytes follow
        let mut raw = Bytes::from_static(&[0x80, 0xC8, 0x00, 0x04, 0x00, 0x00]);
        assert_eq!(
            Packet::unmarshal_one(&mut raw),
            Err(Error::ErrPacketTooShort)
        );
    }

    #[test]
    fn test_unknown_psfb_format_becomes_raw() {
        // PSFB with format 3 (RPSI), not interpreted
        let mut raw = Bytes::from_static(&[
            0x83, 0xCE, 0x00, 0x02, 0x90, 0x2F, 0x9E, 0x2E, 0xBC, 0x5E, 0x9A, 0x40,
        ]);
        let p = Packet::unmarshal_one(&mut raw).unwrap();
        assert!(matches!(p, Packet::Raw(_)));
    }
}
