//! RFC 4588 retransmission framing: the original 16-bit sequence number is
//! prepended big-endian to the original payload, and the packet is carried
//! under the retransmission SSRC and payload type.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::packet::Packet;

/// Packages `original` for retransmission.
pub fn wrap(
    original: &Packet,
    rtx_ssrc: u32,
    rtx_payload_type: u8,
    rtx_sequence_number: u16,
) -> Packet {
    let mut payload = BytesMut::with_capacity(2 + original.payload.len());
    payload.put_u16(original.header.sequence_number);
    payload.put_slice(&original.payload);

    let mut header = original.header.clone();
    header.ssrc = rtx_ssrc;
    header.payload_type = rtx_payload_type;
    header.sequence_number = rtx_sequence_number;

    Packet {
        header,
        payload: payload.freeze(),
    }
}

/// Restores the original packet from a retransmission.
pub fn unwrap(rtx: &Packet, original_ssrc: u32, original_payload_type: u8) -> Result<Packet> {
    if rtx.payload.len() < 2 {
        return Err(Error::ErrRtxPayloadTooShort);
    }
    let mut prefix: Bytes = rtx.payload.slice(..2);
    let original_sequence_number = prefix.get_u16();

    let mut header = rtx.header.clone();
    header.ssrc = original_ssrc;
    header.payload_type = original_payload_type;
    header.sequence_number = original_sequence_number;

    Ok(Packet {
        header,
        payload: rtx.payload.slice(2..),
    })
}
