//! Fixed binary envelope header.
//!
//! Ten bytes, little-endian, zero-copy parsed: a two-byte magic for cheap
//! corruption detection, a version byte, the message-type tag, the length
//! of the stream-id string that immediately follows the header, and the
//! length of the CBOR body that follows the stream id.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::CodecError;
use crate::Result;

/// Message-type tags, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    /// Unrecognized or absent tag.
    Unknown = 0,
    /// Capability negotiation request.
    Init = 1,
    /// Capability negotiation response.
    InitOk = 2,
    /// Credit window resize.
    WindowUpdate = 3,
    /// A captured video frame.
    Frame = 4,
    /// An inference result.
    Result = 5,
    /// Keepalive with liveness counters.
    Heartbeat = 6,
    /// Worker-reported error.
    Error = 7,
    /// Graceful session termination.
    End = 8,
}

impl MessageTag {
    /// Maps a raw wire byte to a tag, never panicking: unrecognized values
    /// collapse to `Unknown` per the fail-closed decoding convention.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Init,
            2 => Self::InitOk,
            3 => Self::WindowUpdate,
            4 => Self::Frame,
            5 => Self::Result,
            6 => Self::Heartbeat,
            7 => Self::Error,
            8 => Self::End,
            _ => Self::Unknown,
        }
    }

    /// The raw wire byte for this tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Fixed 10-byte envelope header.
///
/// Layout: `magic[2] | version(1) | tag(1) | stream_id_len[2] | payload_len[4]`,
/// all multi-byte fields little-endian.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy)]
#[repr(C)]
pub struct EnvelopeHeader {
    magic: [u8; 2],
    version: u8,
    tag: u8,
    stream_id_len: [u8; 2],
    payload_len: [u8; 4],
}

impl EnvelopeHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 10;

    /// Magic bytes identifying an envelope header.
    pub const MAGIC: [u8; 2] = [0xE1, 0xF0];

    /// Upper bound on the CBOR body size, chosen generously above the
    /// largest expected frame payload (see the frame-cache TTL/size note).
    pub const MAX_PAYLOAD_SIZE: u32 = 8 * 1024 * 1024;

    /// Builds a header for `tag` with the given stream-id and payload
    /// lengths. Callers are expected to have already validated both lengths
    /// fit their field widths.
    #[must_use]
    pub fn new(tag: MessageTag, stream_id_len: u16, payload_len: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: crate::PROTOCOL_VERSION,
            tag: tag.as_u8(),
            stream_id_len: stream_id_len.to_le_bytes(),
            payload_len: payload_len.to_le_bytes(),
        }
    }

    /// Parses a header from the front of `bytes`, validating magic, version,
    /// and payload size in that cheap-to-expensive order.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < Self::SIZE {
            return Err(CodecError::BadMessage("envelope shorter than header".into()));
        }
        let (header, _) = Self::ref_from_prefix(bytes)
            .map_err(|_| CodecError::BadMessage("header alignment/size mismatch".into()))?;
        if header.magic != Self::MAGIC {
            return Err(CodecError::BadMessage("bad magic".into()));
        }
        if header.version != crate::PROTOCOL_VERSION {
            return Err(CodecError::VersionUnsupported(header.version));
        }
        if header.payload_len() > Self::MAX_PAYLOAD_SIZE {
            return Err(CodecError::BadMessage("payload exceeds maximum size".into()));
        }
        Ok(header)
    }

    /// The envelope's protocol version.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// The message-type tag.
    #[must_use]
    pub fn tag(&self) -> MessageTag {
        MessageTag::from_u8(self.tag)
    }

    /// Length in bytes of the stream-id string following the header.
    #[must_use]
    pub fn stream_id_len(&self) -> u16 {
        u16::from_le_bytes(self.stream_id_len)
    }

    /// Length in bytes of the CBOR body following the stream id.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        u32::from_le_bytes(self.payload_len)
    }
}

impl std::fmt::Debug for EnvelopeHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeHeader")
            .field("version", &self.version())
            .field("tag", &self.tag())
            .field("stream_id_len", &self.stream_id_len())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

impl PartialEq for EnvelopeHeader {
    fn eq(&self, other: &Self) -> bool {
        self.magic == other.magic
            && self.version == other.version
            && self.tag == other.tag
            && self.stream_id_len == other.stream_id_len
            && self.payload_len == other.payload_len
    }
}

impl Eq for EnvelopeHeader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fields() {
        let header = EnvelopeHeader::new(MessageTag::Init, 4, 128);
        let bytes = header.as_bytes();
        let parsed = EnvelopeHeader::from_bytes(bytes).unwrap();
        assert_eq!(parsed.version(), crate::PROTOCOL_VERSION);
        assert_eq!(parsed.tag(), MessageTag::Init);
        assert_eq!(parsed.stream_id_len(), 4);
        assert_eq!(parsed.payload_len(), 128);
    }

    #[test]
    fn rejects_short_input() {
        let err = EnvelopeHeader::from_bytes(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, CodecError::BadMessage(_)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = EnvelopeHeader::new(MessageTag::Frame, 0, 0).as_bytes().to_vec();
        bytes[0] = 0x00;
        let err = EnvelopeHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::BadMessage(_)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = EnvelopeHeader::new(MessageTag::Frame, 0, 0).as_bytes().to_vec();
        bytes[2] = 9;
        let err = EnvelopeHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::VersionUnsupported(9)));
    }

    #[test]
    fn rejects_oversized_payload() {
        let bytes =
            EnvelopeHeader::new(MessageTag::Frame, 0, EnvelopeHeader::MAX_PAYLOAD_SIZE + 1)
                .as_bytes()
                .to_vec();
        let err = EnvelopeHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::BadMessage(_)));
    }

    #[test]
    fn unknown_tag_decodes_to_unknown_variant() {
        assert_eq!(MessageTag::from_u8(200), MessageTag::Unknown);
    }
}
