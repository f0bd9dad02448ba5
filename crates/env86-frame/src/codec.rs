use bytes::{Buf, BufMut, BytesMut};
use env86_transport::Message;

use crate::error::{FrameError, Result};

/// Envelope header: magic (2) + length (4) + channel (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "EV" (0x45 0x56).
pub const MAGIC: [u8; 2] = [0x45, 0x56];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode one message into the envelope wire format.
///
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Channel  │ Payload         │
/// │ 0x45 0x56    │ (4B LE)   │ (2B LE)  │ (Length bytes)  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_envelope(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_u16_le(channel);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one envelope from the front of `src`.
///
/// Returns `Ok(None)` until a whole envelope is buffered; on success the
/// envelope's bytes are consumed from `src`.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let channel = u16::from_le_bytes([src[6], src[7]]);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Message { channel, payload }))
}

/// Limits and timeouts for envelope streams.
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout applied to socket streams.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout applied to socket streams.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{GUEST, RPC};

    #[test]
    fn encode_then_decode() {
        let mut buf = BytesMut::new();
        encode_envelope(GUEST, &[106, 0, 0, 0, 0], &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 5);
        assert_eq!(&buf[..2], b"EV");

        let message = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(message.channel, GUEST);
        assert_eq!(message.payload.as_ref(), &[106, 0, 0, 0, 0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_waits() {
        let mut buf = BytesMut::from(&[0x45, 0x56, 0x00][..]);
        assert!(decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn incomplete_payload_waits() {
        let mut buf = BytesMut::new();
        encode_envelope(RPC, b"{\"kind\":\"call\"}", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 4);
        assert!(decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 0, 0, 0, 0, 1, 0][..]);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::InvalidMagic)
        ));
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(64);
        buf.put_u16_le(GUEST);
        assert!(matches!(
            decode_envelope(&mut buf, 32),
            Err(FrameError::PayloadTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn back_to_back_envelopes() {
        let mut buf = BytesMut::new();
        encode_envelope(RPC, b"first", &mut buf).unwrap();
        encode_envelope(GUEST, b"", &mut buf).unwrap();

        let first = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let second = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!((first.channel, first.payload.as_ref()), (RPC, b"first".as_ref()));
        assert_eq!(second.channel, GUEST);
        assert!(second.payload.is_empty());
        assert!(buf.is_empty());
    }
}
