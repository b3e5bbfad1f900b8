use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const TRANSPORT_CC_EXTENSION_SIZE: usize = 2;

/// Transport-wide sequence number header extension.
///
/// <http://www.webrtc.org/experiments/rtp-hdrext/transport-wide-cc-extensions>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TransportCcExtension {
    pub transport_sequence: u16,
}

impl MarshalSize for TransportCcExtension {
    fn marshal_size(&self) -> usize {
        TRANSPORT_CC_EXTENSION_SIZE
    }
}

impl Marshal for TransportCcExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < TRANSPORT_CC_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooShort);
        }
        buf.put_u16(self.transport_sequence);
        Ok(TRANSPORT_CC_EXTENSION_SIZE)
    }
}

impl Unmarshal for TransportCcExtension {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < TRANSPORT_CC_EXTENSION_SIZE {
            return Err(Error::ErrPacketTooShort);
        }
        Ok(Self {
            transport_sequence: buf.get_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let ext = TransportCcExtension {
            transport_sequence: 0xBEEF,
        };
        let raw = ext.marshal().unwrap();
        assert_eq!(&raw[..], &[0xBE, 0xEF]);
        let parsed = TransportCcExtension::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, ext);
    }
}
