use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LENGTH, Header};

/// An RTCP packet of a type this crate does not interpret, carried opaque so
/// compound packets survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPacket(pub Bytes);

impl RawPacket {
    pub fn header(&self) -> Result<Header> {
        Header::unmarshal(&mut self.0.clone())
    }
}

impl MarshalSize for RawPacket {
    fn marshal_size(&self) -> usize {
        self.0.len()
    }
}

impl Marshal for RawPacket {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.0.len() {
            return Err(Error::ErrBufferTooShort);
        }
        buf[..self.0.len()].copy_from_slice(&self.0);
        Ok(self.0.len())
    }
}

impl Unmarshal for RawPacket {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let raw = buf.copy_to_bytes(buf.remaining());
        // must still carry a valid header
        Header::unmarshal(&mut raw.clone())?;
        Ok(RawPacket(raw))
    }
}
