//! The top-level wire message: header, stream id, and variant body.

use crate::header::EnvelopeHeader;
use crate::payload::EnvelopeBody;
use crate::{CodecError, Result};

/// Protocol metadata plus exactly one variant payload.
///
/// `Envelope::encode`/`decode` operate purely on envelope bytes; the 4-byte
/// big-endian length prefix described for the wire format is applied by the
/// transport layer around these bytes, not by this type.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Stream identifier, constant for the duration of one connection.
    pub stream_id: String,
    /// The decoded variant body.
    pub body: EnvelopeBody,
}

impl Envelope {
    /// Builds an envelope for `stream_id` carrying `body`.
    #[must_use]
    pub fn new(stream_id: impl Into<String>, body: EnvelopeBody) -> Self {
        Self { stream_id: stream_id.into(), body }
    }

    /// Encodes this envelope to its wire representation (header, stream id,
    /// CBOR body — no outer length prefix).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let stream_id_len = u16::try_from(self.stream_id.len())
            .map_err(|_| CodecError::SerializationFailed("stream id too long".into()))?;

        let mut body_bytes = Vec::new();
        self.body.encode(&mut body_bytes)?;
        let payload_len = u32::try_from(body_bytes.len())
            .map_err(|_| CodecError::SerializationFailed("payload too long".into()))?;

        let header = EnvelopeHeader::new(self.body.tag(), stream_id_len, payload_len);
        let mut out = Vec::with_capacity(EnvelopeHeader::SIZE + self.stream_id.len() + body_bytes.len());
        out.extend_from_slice(zerocopy::IntoBytes::as_bytes(&header));
        out.extend_from_slice(self.stream_id.as_bytes());
        out.extend_from_slice(&body_bytes);
        Ok(out)
    }

    /// Decodes an envelope from its wire representation.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = EnvelopeHeader::from_bytes(bytes)?;
        let stream_id_len = header.stream_id_len() as usize;
        let payload_len = header.payload_len() as usize;
        let tag = header.tag();

        let stream_id_start = EnvelopeHeader::SIZE;
        let stream_id_end = stream_id_start
            .checked_add(stream_id_len)
            .ok_or_else(|| CodecError::BadMessage("stream id length overflow".into()))?;
        let payload_end = stream_id_end
            .checked_add(payload_len)
            .ok_or_else(|| CodecError::BadMessage("payload length overflow".into()))?;
        if bytes.len() < payload_end {
            return Err(CodecError::BadMessage("envelope truncated".into()));
        }

        let stream_id = std::str::from_utf8(&bytes[stream_id_start..stream_id_end])
            .map_err(|_| CodecError::InvalidStreamId)?
            .to_owned();
        let body = EnvelopeBody::decode(tag, &bytes[stream_id_end..payload_end])?;

        Ok(Self { stream_id, body })
    }
}
