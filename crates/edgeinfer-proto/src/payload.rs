//! Variant payload bodies carried by an [`crate::Envelope`].
//!
//! Each variant is CBOR-encoded independently of the others; the message
//! tag in the header, not a CBOR-level discriminant, selects which shape to
//! decode into. An attacker cannot smuggle a `Result` body past a `Frame`
//! tag, because decoding never looks at the bytes to decide the type.

use serde::{Deserialize, Serialize};

use crate::header::MessageTag;
use crate::{CodecError, Result};

/// Pixel formats the client or worker may advertise or choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar 4:2:0, Y plane then interleaved U/V.
    I420,
    /// Planar 4:2:0, Y plane then interleaved UV.
    Nv12,
    /// Packed 8-bit RGB.
    Rgb8,
}

/// Frame compression schemes the client or worker may advertise or choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    /// Uncompressed planar or packed bytes.
    None,
    /// Baseline JPEG.
    Jpeg,
    /// H.264 elementary stream.
    H264,
}

/// Backpressure policy. Only one variant exists on the wire today; it is
/// still an enum so a future policy can be added without breaking decode of
/// unrecognized values (they fail closed via CBOR's own enum matching).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    /// Newest pending frame replaces the older one; no queuing.
    LatestWins,
}

/// Capabilities advertised by the client in `Init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Pixel formats the client can produce, in preference order.
    pub pixel_formats: Vec<PixelFormat>,
    /// Codecs the client can produce, in preference order.
    pub codecs: Vec<CodecKind>,
    /// Maximum frame width the client will ever send.
    pub max_width: u32,
    /// Maximum frame height the client will ever send.
    pub max_height: u32,
    /// Maximum number of frames the client wants outstanding at once.
    pub max_inflight: u32,
    /// Whether the client can letterbox to a requested aspect ratio.
    pub supports_letterbox: bool,
    /// Whether the client can normalize pixel values before sending.
    pub supports_normalize: bool,
    /// Preferred tensor layout, e.g. `"NHWC"`.
    pub preferred_layout: String,
    /// Preferred tensor element type, e.g. `"uint8"`.
    pub preferred_dtype: String,
    /// Largest single-frame payload the client would like to send.
    pub desired_max_frame_bytes: u32,
}

/// Parameters the worker accepted, sent back in `InitOk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chosen {
    /// Pixel format the worker will decode.
    pub pixel_format: PixelFormat,
    /// Codec the worker expects frame payloads to be encoded with.
    pub codec: CodecKind,
    /// Frame width, in pixels.
    pub width: u32,
    /// Frame height, in pixels.
    pub height: u32,
    /// Target frames per second the worker wants to receive.
    pub target_fps: u32,
    /// Backpressure policy in effect; always [`Policy::LatestWins`].
    pub policy: Policy,
    /// Initial credit count for the window manager.
    pub initial_credits: u32,
    /// Hint for group-of-pictures size, when the codec is motion-compensated.
    pub gop_hint: Option<u32>,
    /// Color space label, e.g. `"bt709"`.
    pub color_space: String,
    /// Color range label, e.g. `"limited"` or `"full"`.
    pub color_range: String,
}

/// A contiguous byte range within a planar pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneDescriptor {
    /// Row stride in bytes.
    pub stride: u32,
    /// Byte offset of the plane within the frame payload.
    pub offset: u32,
    /// Size of the plane in bytes.
    pub size: u32,
}

/// `Init` payload: the client's advertised capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Capabilities being advertised.
    pub capabilities: Capabilities,
}

/// `InitOk` payload: the worker's chosen parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitOkPayload {
    /// The negotiated session parameters.
    pub chosen: Chosen,
    /// Maximum frame payload size the worker will accept.
    pub max_frame_bytes: u32,
}

/// `WindowUpdate` payload: resize the credit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUpdatePayload {
    /// New window size (absolute, not a delta).
    pub size: u32,
}

/// `Frame` payload: one captured video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    /// Monotonically increasing identifier assigned at admission.
    pub frame_id: u64,
    /// Monotonic clock timestamp, nanoseconds.
    pub mono_ns: u64,
    /// Presentation timestamp, nanoseconds.
    pub pts_ns: u64,
    /// Wall-clock timestamp, nanoseconds since Unix epoch.
    pub wall_ns: u64,
    /// Frame width, in pixels.
    pub width: u32,
    /// Frame height, in pixels.
    pub height: u32,
    /// Pixel format of `payload`.
    pub pixel_format: PixelFormat,
    /// Codec `payload` is encoded with.
    pub codec: CodecKind,
    /// Ordered plane descriptors; their sizes must sum to `payload.len()`.
    pub planes: Vec<PlaneDescriptor>,
    /// Whether this frame is independently decodable.
    pub keyframe: bool,
    /// Color space label.
    pub color_space: String,
    /// Color range label.
    pub color_range: String,
    /// Raw or compressed frame bytes.
    pub payload: Vec<u8>,
    /// Upstream correlation id for the recording session.
    pub session_id: String,
}

impl FramePayload {
    /// Whether the plane sizes sum to exactly the payload length, as
    /// required for every `Frame` envelope emitted on the wire.
    #[must_use]
    pub fn planes_consistent(&self) -> bool {
        let total: u64 = self.planes.iter().map(|p| u64::from(p.size)).sum();
        total == self.payload.len() as u64
    }
}

/// Axis-aligned bounding box, normalized to `[0, 1]` on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x1: f32,
    /// Top edge.
    pub y1: f32,
    /// Right edge.
    pub x2: f32,
    /// Bottom edge.
    pub y2: f32,
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Normalized bounding box.
    pub bbox: BoundingBox,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    /// Predicted class label.
    pub class: String,
    /// Stable identifier for tracking this object across frames, if the
    /// model supports tracking.
    pub track_id: Option<u64>,
}

/// Identifies the source frame a result was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRef {
    /// Monotonic clock timestamp of the source frame, nanoseconds.
    pub mono_ns: u64,
    /// Wall-clock timestamp of the source frame, nanoseconds.
    pub utc_ns: u64,
    /// Upstream correlation id for the recording session.
    pub session_id: String,
}

/// Per-stage latency, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    /// Preprocessing time.
    pub pre_ms: f32,
    /// Model inference time.
    pub infer_ms: f32,
    /// Postprocessing time.
    pub post_ms: f32,
    /// End-to-end time as measured by the worker.
    pub total_ms: f32,
}

/// `Result` payload: the worker's response to a `Frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Identifier of the frame this result was computed from.
    pub frame_id: u64,
    /// Reference back to the source frame's timestamps and session.
    pub frame_ref: FrameRef,
    /// Model family, e.g. `"yolo"`.
    pub model_family: String,
    /// Model name, e.g. `"yolov8s"`.
    pub model_name: String,
    /// Model version string.
    pub model_version: String,
    /// Per-stage timing.
    pub latency: LatencyBreakdown,
    /// Detected objects, possibly empty.
    pub detections: Vec<Detection>,
}

/// Worker-reported error codes, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unrecognized error; used for forward compatibility.
    Unknown,
    /// The envelope's protocol version is not supported.
    VersionUnsupported,
    /// The envelope was malformed.
    BadMessage,
    /// A message arrived in a state that does not permit it.
    BadSequence,
    /// The frame's pixel format is not supported for the active session.
    UnsupportedFormat,
    /// The frame failed structural validation (e.g. plane mismatch).
    InvalidFrame,
    /// The frame exceeds the worker's accepted payload size.
    FrameTooLarge,
    /// The worker's model is not yet ready to serve inference.
    ModelNotReady,
    /// The worker is out of memory.
    Oom,
    /// The worker shed load due to backpressure.
    BackpressureTimeout,
    /// An unclassified internal worker error.
    Internal,
}

/// `Error` payload: a worker-reported failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error classification.
    pub code: ErrorCode,
    /// Human-readable detail, for logs only.
    pub message: String,
    /// Seconds to wait before retrying, if the worker supplied one.
    pub retry_after: Option<u64>,
}

/// `Heartbeat` payload: periodic liveness and throughput counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Sender's monotonic clock at the time of sending, nanoseconds.
    pub mono_ns: u64,
    /// Identifier of the last frame the sender transmitted.
    pub last_frame_id: u64,
    /// Total bytes the sender has transmitted on this connection.
    pub tx_bytes: u64,
    /// Total bytes the sender has received on this connection.
    pub rx_bytes: u64,
}

/// `End` payload: graceful session termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndPayload {
    /// Human-readable reason for closing, for logs only.
    pub reason: String,
}

/// The decoded body of an envelope, one variant per message tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnvelopeBody {
    /// See [`InitPayload`].
    Init(InitPayload),
    /// See [`InitOkPayload`].
    InitOk(InitOkPayload),
    /// See [`WindowUpdatePayload`].
    WindowUpdate(WindowUpdatePayload),
    /// See [`FramePayload`].
    Frame(FramePayload),
    /// See [`ResultPayload`].
    Result(ResultPayload),
    /// See [`HeartbeatPayload`].
    Heartbeat(HeartbeatPayload),
    /// See [`ErrorPayload`].
    Error(ErrorPayload),
    /// See [`EndPayload`].
    End(EndPayload),
}

impl EnvelopeBody {
    /// The message tag this body encodes under.
    #[must_use]
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Init(_) => MessageTag::Init,
            Self::InitOk(_) => MessageTag::InitOk,
            Self::WindowUpdate(_) => MessageTag::WindowUpdate,
            Self::Frame(_) => MessageTag::Frame,
            Self::Result(_) => MessageTag::Result,
            Self::Heartbeat(_) => MessageTag::Heartbeat,
            Self::Error(_) => MessageTag::Error,
            Self::End(_) => MessageTag::End,
        }
    }

    /// CBOR-encodes the body into `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<()> {
        let result = match self {
            Self::Init(inner) => ciborium::ser::into_writer(inner, dst),
            Self::InitOk(inner) => ciborium::ser::into_writer(inner, dst),
            Self::WindowUpdate(inner) => ciborium::ser::into_writer(inner, dst),
            Self::Frame(inner) => ciborium::ser::into_writer(inner, dst),
            Self::Result(inner) => ciborium::ser::into_writer(inner, dst),
            Self::Heartbeat(inner) => ciborium::ser::into_writer(inner, dst),
            Self::Error(inner) => ciborium::ser::into_writer(inner, dst),
            Self::End(inner) => ciborium::ser::into_writer(inner, dst),
        };
        result.map_err(|err| CodecError::SerializationFailed(err.to_string()))
    }

    /// CBOR-decodes a body for the given `tag` from `bytes`.
    ///
    /// Decoding dispatches on `tag`, not on any self-describing marker in
    /// `bytes`: an unrecognized tag always fails with [`CodecError::BadMessage`]
    /// rather than guessing a shape.
    pub fn decode(tag: MessageTag, bytes: &[u8]) -> Result<Self> {
        let map_err = |source: ciborium::de::Error<std::io::Error>| CodecError::PayloadDecode {
            tag,
            detail: source.to_string(),
        };
        match tag {
            MessageTag::Init => {
                ciborium::de::from_reader(bytes).map(Self::Init).map_err(map_err)
            }
            MessageTag::InitOk => {
                ciborium::de::from_reader(bytes).map(Self::InitOk).map_err(map_err)
            }
            MessageTag::WindowUpdate => {
                ciborium::de::from_reader(bytes).map(Self::WindowUpdate).map_err(map_err)
            }
            MessageTag::Frame => {
                ciborium::de::from_reader(bytes).map(Self::Frame).map_err(map_err)
            }
            MessageTag::Result => {
                ciborium::de::from_reader(bytes).map(Self::Result).map_err(map_err)
            }
            MessageTag::Heartbeat => {
                ciborium::de::from_reader(bytes).map(Self::Heartbeat).map_err(map_err)
            }
            MessageTag::Error => {
                ciborium::de::from_reader(bytes).map(Self::Error).map_err(map_err)
            }
            MessageTag::End => {
                ciborium::de::from_reader(bytes).map(Self::End).map_err(map_err)
            }
            MessageTag::Unknown => {
                Err(CodecError::BadMessage("unrecognized message tag".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips() {
        let body = EnvelopeBody::Heartbeat(HeartbeatPayload {
            mono_ns: 123,
            last_frame_id: 7,
            tx_bytes: 4096,
            rx_bytes: 128,
        });
        let mut encoded = Vec::new();
        body.encode(&mut encoded).unwrap();
        let decoded = EnvelopeBody::decode(MessageTag::Heartbeat, &encoded).unwrap();
        assert_eq!(body, decoded);
    }

    #[test]
    fn frame_planes_consistency_check() {
        let frame = FramePayload {
            frame_id: 0,
            mono_ns: 0,
            pts_ns: 0,
            wall_ns: 0,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Nv12,
            codec: CodecKind::None,
            planes: vec![
                PlaneDescriptor { stride: 640, offset: 0, size: 307_200 },
                PlaneDescriptor { stride: 640, offset: 307_200, size: 153_600 },
            ],
            keyframe: true,
            color_space: "bt709".into(),
            color_range: "limited".into(),
            payload: vec![0u8; 460_800],
            session_id: "rec-1".into(),
        };
        assert!(frame.planes_consistent());
    }

    #[test]
    fn decode_wrong_tag_is_bad_message_not_panic() {
        let body = EnvelopeBody::Heartbeat(HeartbeatPayload {
            mono_ns: 0,
            last_frame_id: 0,
            tx_bytes: 0,
            rx_bytes: 0,
        });
        let mut encoded = Vec::new();
        body.encode(&mut encoded).unwrap();
        let err = EnvelopeBody::decode(MessageTag::Frame, &encoded).unwrap_err();
        assert!(matches!(err, CodecError::PayloadDecode { tag: MessageTag::Frame, .. }));
    }

    #[test]
    fn unknown_tag_never_decodes() {
        let err = EnvelopeBody::decode(MessageTag::Unknown, &[]).unwrap_err();
        assert!(matches!(err, CodecError::BadMessage(_)));
    }
}
