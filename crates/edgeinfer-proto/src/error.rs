//! Codec error taxonomy.

use thiserror::Error;

/// Errors produced while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input was truncated, malformed, or otherwise did not parse as an
    /// envelope.
    #[error("malformed envelope: {0}")]
    BadMessage(String),

    /// The envelope's protocol version field did not equal
    /// [`crate::PROTOCOL_VERSION`].
    #[error("unsupported protocol version {0}")]
    VersionUnsupported(u8),

    /// Encoding failed because a required field was missing or a value
    /// could not be represented on the wire.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The CBOR body did not match the shape expected for its tag.
    #[error("payload decode failed for tag {tag:?}: {detail}")]
    PayloadDecode {
        /// The message tag the payload was decoded against.
        tag: crate::header::MessageTag,
        /// The underlying CBOR error, as text (ciborium's error types are
        /// not `Clone`).
        detail: String,
    },

    /// The stream-id bytes were not valid UTF-8.
    #[error("stream id is not valid utf-8")]
    InvalidStreamId,
}

impl CodecError {
    /// Whether retrying the same operation might succeed. Codec errors are
    /// all deterministic functions of their input, so none are transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        false
    }
}
