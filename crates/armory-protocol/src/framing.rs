//! Message framing for transport links.
//!
//! Links run in one of two modes:
//!
//! - **Framed**: every message is a 4-byte big-endian length followed by
//!   exactly that many payload bytes. Partial frames stay buffered across
//!   reads and each complete frame yields exactly one message.
//! - **Raw**: whatever a single read returns is one message. The relay boards
//!   use this mode since their active reports carry no length prefix.
//!
//! # Architecture
//!
//! ```text
//! read chunk -> BytesMut buffer -> MessageCodec::decode -> message (Bytes)
//! message    -> MessageCodec::encode -> BytesMut -> write
//! ```
//!
//! # DoS Protection
//!
//! A length prefix above the configured maximum (default 64 KB) is rejected
//! with [`ProtocolError::FrameTooLarge`] before any payload is buffered, so a
//! corrupt prefix cannot make the link allocate unbounded memory.
//!
//! # Example
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use tokio_util::codec::{Decoder, Encoder};
//! use armory_protocol::MessageCodec;
//!
//! let mut codec = MessageCodec::framed();
//! let mut wire = BytesMut::new();
//! codec.encode(Bytes::from_static(b"HEARTBEAT"), &mut wire).unwrap();
//! assert_eq!(&wire[..4], &[0, 0, 0, 9]);
//!
//! let message = codec.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(&message[..], b"HEARTBEAT");
//! ```

use armory_core::constants::{DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{ProtocolError, Result};

/// Codec for 4-byte big-endian length-prefixed messages.
#[derive(Debug, Clone)]
pub struct LengthPrefixCodec {
    max_frame_size: usize,
}

impl LengthPrefixCodec {
    /// Create a codec with the default 64 KB limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom payload limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LengthPrefixCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let size = u32::from_be_bytes(prefix) as usize;

        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + size {
            src.reserve(LENGTH_PREFIX_SIZE + size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(size).freeze()))
    }
}

impl Encoder<Bytes> for LengthPrefixCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: item.len(),
                max_size: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Codec used by a transport link, chosen by its `framing` setting.
#[derive(Debug, Clone)]
pub enum MessageCodec {
    Framed(LengthPrefixCodec),
    Raw,
}

impl MessageCodec {
    #[must_use]
    pub fn framed() -> Self {
        Self::Framed(LengthPrefixCodec::new())
    }

    #[must_use]
    pub fn raw() -> Self {
        Self::Raw
    }

    #[must_use]
    pub fn for_framing(framing: bool) -> Self {
        if framing { Self::framed() } else { Self::raw() }
    }

    #[must_use]
    pub fn is_framed(&self) -> bool {
        matches!(self, Self::Framed(_))
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self {
            Self::Framed(codec) => codec.decode(src),
            Self::Raw if src.is_empty() => Ok(None),
            Self::Raw => Ok(Some(src.split().freeze())),
        }
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        match self {
            Self::Framed(codec) => codec.encode(item, dst),
            Self::Raw => {
                dst.extend_from_slice(&item);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_codec_default() {
        let codec = LengthPrefixCodec::default();
        assert_eq!(codec.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = LengthPrefixCodec::new();
        let mut buf = framed(b"status");

        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&message[..], b"status");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_frame_across_reads() {
        let mut codec = LengthPrefixCodec::new();
        let wire = framed(b"partial payload");
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&wire[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[2..9]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[9..]);
        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&message[..], b"partial payload");
    }

    #[test]
    fn test_decode_multiple_frames_in_buffer() {
        let mut codec = LengthPrefixCodec::new();
        let mut buf = framed(b"one");
        buf.extend_from_slice(&framed(b"two"));
        buf.extend_from_slice(&framed(b""));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = LengthPrefixCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);

        let result = codec.decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size: 17, max_size: 16 })
        ));
    }

    #[test]
    fn test_encode_frame_too_large() {
        let mut codec = LengthPrefixCodec::with_max_frame_size(4);
        let mut buf = BytesMut::new();
        let result = codec.encode(Bytes::from_static(b"too long"), &mut buf);
        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_raw_mode_passes_chunks_through() {
        let mut codec = MessageCodec::raw();
        let mut buf = BytesMut::from(&[0xEE, 0xFF, 0xC0][..]);

        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&message[..], &[0xEE, 0xFF, 0xC0]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut out = BytesMut::new();
        codec.encode(Bytes::from_static(&[0x01, 0x02]), &mut out).unwrap();
        assert_eq!(&out[..], &[0x01, 0x02]);
    }

    #[test]
    fn test_for_framing() {
        assert!(MessageCodec::for_framing(true).is_framed());
        assert!(!MessageCodec::for_framing(false).is_framed());
    }
}
