use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::Header;

/// An RTP data packet: header plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RTP PACKET:")?;
        writeln!(f, "\tVersion: {}", self.header.version)?;
        writeln!(f, "\tMarker: {}", self.header.marker)?;
        writeln!(f, "\tPayload Type: {}", self.header.payload_type)?;
        writeln!(f, "\tSequence Number: {}", self.header.sequence_number)?;
        writeln!(f, "\tTimestamp: {}", self.header.timestamp)?;
        writeln!(f, "\tSSRC: {} ({:x})", self.header.ssrc, self.header.ssrc)?;
        writeln!(f, "\tPayload Length: {}", self.payload.len())
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let n = self.header.marshal_to(buf)?;
        let mut rest = &mut buf[n..];
        if rest.remaining_mut() < self.payload.len() {
            return Err(Error::ErrBufferTooShort);
        }
        rest.put_slice(&self.payload);
        Ok(n + self.payload.len())
    }
}

impl Unmarshal for Packet {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        let mut payload = buf.copy_to_bytes(buf.remaining());
        if header.padding {
            if payload.is_empty() {
                return Err(Error::ErrBadPadding);
            }
            let pad_len = payload[payload.len() - 1] as usize;
            if pad_len == 0 || pad_len > payload.len() {
                return Err(Error::ErrBadPadding);
            }
            payload = payload.slice(..payload.len() - pad_len);
        }
        Ok(Packet { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_round_trip() {
        let p = Packet {
            header: Header {
                marker: true,
                payload_type: 96,
                sequence_number: 1000,
                timestamp: 160_000,
                ssrc: 0xDEADBEEF,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
        };
        let raw = p.marshal().unwrap();
        let parsed = Packet::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn test_padding_stripped() {
        // header + payload [0xAA] + 3 padding octets, last = count
        let mut raw = Packet {
            header: Header {
                ssrc: 1,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xAA, 0x00, 0x00, 0x03]),
        }
        .marshal()
        .unwrap()
        .to_vec();
        raw[0] |= 1 << 5;
        let parsed = Packet::unmarshal(&mut Bytes::from(raw)).unwrap();
        assert_eq!(parsed.payload, Bytes::from_static(&[0xAA]));
    }

    #[test]
    fn test_bad_padding_rejected() {
        let mut raw = Packet {
            header: Header {
                ssrc: 1,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xFF]),
        }
        .marshal()
        .unwrap()
        .to_vec();
        raw[0] |= 1 << 5;
        // padding count 0xFF exceeds payload length
        assert_eq!(
            Packet::unmarshal(&mut Bytes::from(raw)),
            Err(Error::ErrBadPadding)
        );
    }

    #[test]
    fn test_truncated_packet() {
        let raw = Bytes::from_static(&[0x80, 0x60, 0x00]);
        assert_eq!(
            Packet::unmarshal(&mut raw.clone()),
            Err(Error::ErrPacketTooShort)
        );
    }
}
