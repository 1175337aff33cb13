//! Wire codec for the edge inference protocol.
//!
//! An [`Envelope`] is the unit of exchange between the edge client and the
//! inference worker: a fixed binary header (see [`header::EnvelopeHeader`])
//! followed by a CBOR-encoded variant body (see [`payload::EnvelopeBody`]).
//! The codec itself performs no I/O; framing the envelope bytes with a
//! length prefix on the wire is the transport layer's concern.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod error;
pub mod header;
pub mod payload;

pub use envelope::Envelope;
pub use error::CodecError;
pub use header::{EnvelopeHeader, MessageTag};
pub use payload::{
    BoundingBox, Capabilities, Chosen, CodecKind, Detection, EndPayload, EnvelopeBody,
    ErrorCode, ErrorPayload, FramePayload, FrameRef, HeartbeatPayload, InitOkPayload,
    InitPayload, LatencyBreakdown, PixelFormat, PlaneDescriptor, Policy, ResultPayload,
    WindowUpdatePayload,
};

/// Result type used throughout the codec.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Protocol version implemented by this codec. Only this value is accepted.
pub const PROTOCOL_VERSION: u8 = 1;
