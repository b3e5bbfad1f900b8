use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 4;
pub const VERSION: u8 = 2;

/// RFC 5285 one-byte extension element profile.
pub const EXTENSION_PROFILE_ONE_BYTE: u16 = 0xBEDE;
/// RFC 5285 two-byte extension element profile.
pub const EXTENSION_PROFILE_TWO_BYTE: u16 = 0x1000;

const VERSION_SHIFT: u8 = 6;
const PADDING_SHIFT: u8 = 5;
const EXTENSION_SHIFT: u8 = 4;
const CC_MASK: u8 = 0x0F;
const MARKER_SHIFT: u8 = 7;
const PT_MASK: u8 = 0x7F;

/// A single negotiated header extension element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extension {
    pub id: u8,
    pub payload: Bytes,
}

/// RTP packet header per RFC 3550 with RFC 5285 extension elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extensions: Vec<Extension>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: vec![],
            extension_profile: 0,
            extensions: vec![],
        }
    }
}

impl Header {
    /// Returns the payload of the extension element with the given id, if set.
    pub fn get_extension(&self, id: u8) -> Option<Bytes> {
        if !self.extension {
            return None;
        }
        self.extensions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.payload.clone())
    }

    /// Sets (or replaces) the extension element with the given id.
    pub fn set_extension(&mut self, id: u8, payload: Bytes) -> Result<()> {
        if self.extension {
            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    if !(1..=14).contains(&id) {
                        return Err(Error::ErrInvalidExtensionId);
                    }
                    // the one-byte element length field encodes len - 1
                    if payload.is_empty() {
                        return Err(Error::ErrWrongPayloadSize);
                    }
                    if payload.len() > 16 {
                        return Err(Error::ErrExtensionPayloadTooLarge);
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    if id < 1 {
                        return Err(Error::ErrInvalidExtensionId);
                    }
                    if payload.len() > 255 {
                        return Err(Error::ErrExtensionPayloadTooLarge);
                    }
                }
                _ => {
                    if id != 0 {
                        return Err(Error::ErrInvalidExtensionId);
                    }
                }
            }
            if let Some(e) = self.extensions.iter_mut().find(|e| e.id == id) {
                e.payload = payload;
            } else {
                self.extensions.push(Extension { id, payload });
            }
            return Ok(());
        }

        // No extension block yet. Pick the smallest profile that fits.
        self.extension = true;
        self.extension_profile = if (1..=14).contains(&id) && (1..=16).contains(&payload.len()) {
            EXTENSION_PROFILE_ONE_BYTE
        } else {
            EXTENSION_PROFILE_TWO_BYTE
        };
        self.extensions.push(Extension { id, payload });
        Ok(())
    }

    /// Removes the extension element with the given id.
    pub fn del_extension(&mut self, id: u8) -> Result<()> {
        if !self.extension {
            return Err(Error::ErrHeaderExtensionsNotEnabled);
        }
        let before = self.extensions.len();
        self.extensions.retain(|e| e.id != id);
        if self.extensions.len() == before {
            return Err(Error::ErrExtensionNotFound);
        }
        Ok(())
    }

    fn extension_payload_len(&self) -> usize {
        match self.extension_profile {
            EXTENSION_PROFILE_ONE_BYTE => self
                .extensions
                .iter()
                .map(|e| 1 + e.payload.len())
                .sum::<usize>(),
            EXTENSION_PROFILE_TWO_BYTE => self
                .extensions
                .iter()
                .map(|e| 2 + e.payload.len())
                .sum::<usize>(),
            _ => self.extensions.iter().map(|e| e.payload.len()).sum(),
        }
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        let mut n = 12 + self.csrc.len() * 4;
        if self.extension {
            let payload_len = self.extension_payload_len();
            // profile + length words, payload padded to a word boundary
            n += 4 + payload_len.div_ceil(4) * 4;
        }
        n
    }
}

impl Marshal for Header {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.remaining_mut() < size {
            return Err(Error::ErrBufferTooShort);
        }

        let b0 = (self.version << VERSION_SHIFT)
            | ((self.padding as u8) << PADDING_SHIFT)
            | ((self.extension as u8) << EXTENSION_SHIFT)
            | (self.csrc.len() as u8 & CC_MASK);
        buf.put_u8(b0);
        buf.put_u8(((self.marker as u8) << MARKER_SHIFT) | (self.payload_type & PT_MASK));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if self.extension {
            let payload_len = self.extension_payload_len();
            let padded = payload_len.div_ceil(4) * 4;
            buf.put_u16(self.extension_profile);
            buf.put_u16((padded / 4) as u16);
            match self.extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    for e in &self.extensions {
                        buf.put_u8((e.id << 4) | (e.payload.len() as u8 - 1));
                        buf.put_slice(&e.payload);
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    for e in &self.extensions {
                        buf.put_u8(e.id);
                        buf.put_u8(e.payload.len() as u8);
                        buf.put_slice(&e.payload);
                    }
                }
                _ => {
                    for e in &self.extensions {
                        buf.put_slice(&e.payload);
                    }
                }
            }
            for _ in payload_len..padded {
                buf.put_u8(0);
            }
        }

        Ok(size)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < 12 {
            return Err(Error::ErrPacketTooShort);
        }

        let b0 = buf.get_u8();
        let version = b0 >> VERSION_SHIFT;
        if version != VERSION {
            return Err(Error::ErrBadVersion);
        }
        let padding = (b0 >> PADDING_SHIFT) & 0x1 == 1;
        let extension = (b0 >> EXTENSION_SHIFT) & 0x1 == 1;
        let cc = (b0 & CC_MASK) as usize;

        let b1 = buf.get_u8();
        let marker = b1 >> MARKER_SHIFT == 1;
        let payload_type = b1 & PT_MASK;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc * 4 {
            return Err(Error::ErrPacketTooShort);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        let mut extension_profile = 0u16;
        let mut extensions = vec![];
        if extension {
            if buf.remaining() < 4 {
                return Err(Error::ErrPacketTooShort);
            }
            extension_profile = buf.get_u16();
            let extension_len = buf.get_u16() as usize * 4;
            if buf.remaining() < extension_len {
                return Err(Error::ErrPacketTooShort);
            }

            match extension_profile {
                EXTENSION_PROFILE_ONE_BYTE => {
                    let mut remaining = extension_len;
                    while remaining > 0 {
                        let b = buf.get_u8();
                        remaining -= 1;
                        if b == 0x00 {
                            // element padding
                            continue;
                        }
                        let id = b >> 4;
                        if id == 0x0F {
                            // reserved id, stop parsing elements
                            buf.advance(remaining);
                            remaining = 0;
                            continue;
                        }
                        let len = (b as usize & 0x0F) + 1;
                        if remaining < len {
                            return Err(Error::ErrPacketTooShort);
                        }
                        extensions.push(Extension {
                            id,
                            payload: buf.copy_to_bytes(len),
                        });
                        remaining -= len;
                    }
                }
                EXTENSION_PROFILE_TWO_BYTE => {
                    let mut remaining = extension_len;
                    while remaining > 0 {
                        let id = buf.get_u8();
                        remaining -= 1;
                        if id == 0x00 {
                            continue;
                        }
                        if remaining < 1 {
                            return Err(Error::ErrPacketTooShort);
                        }
                        let len = buf.get_u8() as usize;
                        remaining -= 1;
                        if remaining < len {
                            return Err(Error::ErrPacketTooShort);
                        }
                        extensions.push(Extension {
                            id,
                            payload: buf.copy_to_bytes(len),
                        });
                        remaining -= len;
                    }
                }
                _ => {
                    extensions.push(Extension {
                        id: 0,
                        payload: buf.copy_to_bytes(extension_len),
                    });
                }
            }
        }

        Ok(Header {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header_round_trip() {
        let h = Header {
            marker: true,
            payload_type: 96,
            sequence_number: 27023,
            timestamp: 3653407706,
            ssrc: 476325762,
            csrc: vec![0x11111111, 0x22222222],
            ..Default::default()
        };
        let raw = h.marshal().unwrap();
        assert_eq!(raw.len(), 12 + 8);
        let parsed = Header::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn test_one_byte_profile_rejects_empty_payload() {
        let mut h = Header {
            extension: true,
            extension_profile: EXTENSION_PROFILE_ONE_BYTE,
            ..Default::default()
        };
        assert_eq!(
            h.set_extension(1, Bytes::new()),
            Err(Error::ErrWrongPayloadSize)
        );

        // without a profile yet, an empty payload picks the two-byte form
        let mut h = Header::default();
        h.set_extension(1, Bytes::new()).unwrap();
        assert_eq!(h.extension_profile, EXTENSION_PROFILE_TWO_BYTE);
        let raw = h.marshal().unwrap();
        let parsed = Header::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.get_extension(1), Some(Bytes::new()));
    }

    #[test]
    fn test_reject_bad_version() {
        let raw = Bytes::from_static(&[
            0x40, 0x60, 0x69, 0x8f, 0xd9, 0xc2, 0x93, 0xda, 0x1c, 0x64, 0x27, 0x82,
        ]);
        assert_eq!(
            Header::unmarshal(&mut raw.clone()),
            Err(Error::ErrBadVersion)
        );
    }

    #[test]
    fn test_one_byte_extension_round_trip() {
        let mut h = Header {
            payload_type: 111,
            sequence_number: 100,
            ssrc: 0x1234,
            ..Default::default()
        };
        h.set_extension(3, Bytes::from_static(&[0xAA, 0xBB, 0xCC]))
            .unwrap();
        h.set_extension(5, Bytes::from_static(&[0x01, 0x02])).unwrap();
        assert_eq!(h.extension_profile, EXTENSION_PROFILE_ONE_BYTE);

        let raw = h.marshal().unwrap();
        assert_eq!(raw.len() % 4, 0);
        let parsed = Header::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(
            parsed.get_extension(3),
            Some(Bytes::from_static(&[0xAA, 0xBB, 0xCC]))
        );
        assert_eq!(parsed.get_extension(5), Some(Bytes::from_static(&[0x01, 0x02])));
        assert_eq!(parsed.get_extension(7), None);
    }

    #[test]
    fn test_two_byte_extension_selected_for_large_payload() {
        let mut h = Header::default();
        let payload = Bytes::from(vec![0u8; 17]);
        h.set_extension(1, payload.clone()).unwrap();
        assert_eq!(h.extension_profile, EXTENSION_PROFILE_TWO_BYTE);

        let raw = h.marshal().unwrap();
        let parsed = Header::unmarshal(&mut raw.clone()).unwrap();
        assert_eq!(parsed.get_extension(1), Some(payload));
    }

    #[test]
    fn test_one_byte_extension_id_range() {
        let mut h = Header::default();
        h.set_extension(2, Bytes::from_static(&[0x01])).unwrap();
        assert_eq!(
            h.set_extension(15, Bytes::from_static(&[0x01])),
            Err(Error::ErrInvalidExtensionId)
        );
    }

    #[test]
    fn test_del_extension() {
        let mut h = Header::default();
        h.set_extension(2, Bytes::from_static(&[0x01])).unwrap();
        h.del_extension(2).unwrap();
        assert_eq!(h.del_extension(2), Err(Error::ErrExtensionNotFound));
    }
}
