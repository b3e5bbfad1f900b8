use std::time::Duration;

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const ABS_SEND_TIME_EXTENSION_SIZE: usize = 3;

/// Absolute send time header extension: 24 bits of 6.18 fixed-point seconds,
/// wrapping every 64 seconds.
///
/// <http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time>
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct AbsSendTimeExtension {
    pub timestamp: u64,
}

impl AbsSendTimeExtension {
    /// Derives the 6.18 value from a 64-bit NTP timestamp.
    pub fn new(ntp: u64) -> Self {
        Self {
            timestamp: (ntp >> 14) & 0x00FF_FFFF,
        }
    }

    /// Reconstructs the send time as a duration since the unix epoch, given
    /// the receiver's wall clock. The 24-bit value wraps every 64 s, so the
    /// candidate closest to `receive` wins.
    pub fn estimate(&self, receive: Duration) -> Duration {
        let receive_ntp = shared::time::unix2ntp(receive);
        let mut ntp = (receive_ntp & !(0x00FF_FFFFu64 << 14)) | (self.timestamp << 14);

        // candidates one wrap either side, closest to the receive clock wins
        let wrap = 1u64 << 38;
        for candidate in [ntp.wrapping_sub(wrap), ntp.wrapping_add(wrap)] {
            if candidate.abs_diff(receive_ntp) < ntp.abs_diff(receive_ntp) {
                ntp = candidate;
            }
        }
        shared::time::ntp2unix(ntp)
    }
}

impl MarshalSize for AbsSendTimeExtension {
    fn marshal_size(&self) -> usize {
        ABS_SEND_TIME_EXTENSION_SIZE
    }
}

impl Marshal for AbsSendTimeExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < ABS_SEND_TIME_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooShort);
        }
        buf.put_u8(((self.timestamp >> 16) & 0xFF) as u8);
        buf.put_u8(((self.timestamp >> 8) & 0xFF) as u8);
        buf.put_u8((self.timestamp & 0xFF) as u8);
        Ok(ABS_SEND_TIME_EXTENSION_SIZE)
    }
}

impl Unmarshal for AbsSendTimeExtension {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < ABS_SEND_TIME_EXTENSION_SIZE {
            return Err(Error::ErrPacketTooShort);
        }
        let b0 = buf.get_u8() as u64;
        let b1 = buf.get_u8() as u64;
        let b2 = buf.get_u8() as u64;
        Ok(Self {
            timestamp: (b0 << 16) | (b1 << 8) | b2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let ext = AbsSendTimeExtension {
            timestamp: 0x00AB_CDEF,
        };
        let raw = ext.marshal().unwrap();
        assert_eq!(raw.len(), 3);
        let parsed = AbsSendTimeExtension::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, ext);
    }

    #[test]
    fn test_estimate_close_to_send_time() {
        let send = Duration::new(1_700_000_123, 250_000_000);
        let ext = AbsSendTimeExtension::new(shared::time::unix2ntp(send));
        // receiver clock 30ms later
        let estimated = ext.estimate(send + Duration::from_millis(30));
        let diff = if estimated > send {
            estimated - send
        } else {
            send - estimated
        };
        assert!(diff < Duration::from_millis(1), "diff {diff:?}");
    }
}
