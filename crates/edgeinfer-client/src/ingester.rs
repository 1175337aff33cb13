//! JPEG encode + multipart POST to the external ingest sink.
//!
//! Unlike the rest of this crate, the ingester is not a Sans-IO state
//! machine: its work (pixel conversion, JPEG encoding, an HTTP round trip)
//! is inherently blocking I/O, so it runs off the feeder's event loop on
//! its own task. A failure here is local to one frame: logged and metered,
//! never propagated back to the inference stream.

#![cfg(feature = "ingest")]

use std::time::Duration;

use bytes::Bytes;
use edgeinfer_core::CacheMetadata;
use edgeinfer_proto::{CodecKind, PixelFormat};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::error::IngestError;
use crate::feeder::IngestJob;

const JPEG_QUALITY: u8 = 85;
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(200);

/// Configuration for the ingest sink.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Base URL of the ingest sink; `POST {base_url}/ingest` is used.
    pub base_url: String,
    /// Per-request deadline.
    pub request_timeout: Duration,
}

/// Normalized bounding box in the ingest payload's `{x, y, w, h}` shape,
/// distinct from the wire protocol's `{x1, y1, x2, y2}` shape.
#[derive(Debug, Clone, Serialize)]
struct IngestBoundingBox {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

#[derive(Debug, Clone, Serialize)]
struct IngestDetection {
    cls: String,
    conf: f32,
    bbox: IngestBoundingBox,
}

#[derive(Debug, Clone, Serialize)]
struct IngestMeta {
    session_id: String,
    seq_no: u64,
    capture_iso_timestamp: String,
    detections: Vec<IngestDetection>,
}

/// Encodes and posts one ingest job. Never returns an error for conditions
/// callers should retry themselves; all retryable failure is absorbed
/// internally: ingest is best-effort and must never block the result loop.
#[derive(Clone)]
pub struct Ingester {
    http: Client,
    config: IngesterConfig,
}

impl Ingester {
    /// Builds an ingester posting to `config.base_url`.
    #[must_use]
    pub fn new(config: IngesterConfig) -> Self {
        Self { http: Client::new(), config }
    }

    /// Runs the full encode + post pipeline for `job`. Returns whether the
    /// ingest ultimately succeeded; callers log/meter the result but never
    /// propagate it upstream.
    pub async fn ingest(&self, job: IngestJob) -> Result<(), IngestError> {
        let jpeg = encode_jpeg(&job.data, &job.metadata)?;
        let meta = build_meta(&job);
        self.post_with_retry(meta, jpeg).await
    }

    async fn post_with_retry(&self, meta: IngestMeta, jpeg: Vec<u8>) -> Result<(), IngestError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(&meta, &jpeg, attempt).await {
                Ok(()) => return Ok(()),
                Err(Outcome::Aborted(status)) => return Err(IngestError::Rejected(status.as_u16())),
                Err(Outcome::Retryable { wait, message }) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(IngestError::RequestFailed(message));
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    #[allow(clippy::expect_used, reason = "static mime strings are valid by construction")]
    async fn post_once(&self, meta: &IngestMeta, jpeg: &[u8], attempt: u32) -> Result<(), Outcome> {
        let linear_wait = BACKOFF_STEP * attempt;
        let meta_json = serde_json::to_vec(meta)
            .map_err(|err| Outcome::Retryable { wait: linear_wait, message: err.to_string() })?;
        let form = reqwest::multipart::Form::new()
            .part(
                "meta",
                reqwest::multipart::Part::bytes(meta_json)
                    .file_name("meta.json")
                    .mime_str("application/json")
                    .expect("static mime string is valid"),
            )
            .part(
                "frame",
                reqwest::multipart::Part::bytes(jpeg.to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")
                    .expect("static mime string is valid"),
            );

        let response = self
            .http
            .post(format!("{}/ingest", self.config.base_url))
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|err| Outcome::Retryable { wait: linear_wait, message: err.to_string() })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map_or(linear_wait, Duration::from_secs);
            return Err(Outcome::Retryable { wait, message: format!("429 from ingest sink: {status}") });
        }
        if status.is_server_error() {
            return Err(Outcome::Retryable { wait: linear_wait, message: format!("{status}") });
        }
        Err(Outcome::Aborted(status))
    }
}

enum Outcome {
    Retryable { wait: Duration, message: String },
    Aborted(StatusCode),
}

fn build_meta(job: &IngestJob) -> IngestMeta {
    let capture_iso_timestamp = iso8601_from_wall_ns(job.metadata.wall_ns);
    IngestMeta {
        session_id: job.result.frame_ref.session_id.clone(),
        seq_no: job.frame_id,
        capture_iso_timestamp,
        detections: job
            .result
            .detections
            .iter()
            .map(|detection| IngestDetection {
                cls: detection.class.clone(),
                conf: detection.confidence,
                bbox: IngestBoundingBox {
                    x: detection.bbox.x1,
                    y: detection.bbox.y1,
                    w: detection.bbox.x2 - detection.bbox.x1,
                    h: detection.bbox.y2 - detection.bbox.y1,
                },
            })
            .collect(),
    }
}

fn iso8601_from_wall_ns(wall_ns: u64) -> String {
    let secs = wall_ns / 1_000_000_000;
    let nanos = wall_ns % 1_000_000_000;
    humantime::format_rfc3339_nanos(std::time::UNIX_EPOCH + Duration::new(secs, nanos as u32))
        .to_string()
}

/// Converts `data` to JPEG per the chosen pixel format/codec, producing a
/// hard failure (never a raw-bytes fallback) on encode failure.
fn encode_jpeg(data: &Bytes, metadata: &CacheMetadata) -> Result<Vec<u8>, IngestError> {
    if matches!(metadata.codec, CodecKind::Jpeg) {
        return Ok(data.to_vec());
    }

    let width = metadata.planes.first().map_or(0, |p| p.stride);
    let rgb = match metadata.pixel_format {
        PixelFormat::Rgb8 => data.to_vec(),
        PixelFormat::Nv12 | PixelFormat::I420 => {
            planar_to_rgb(data, metadata.pixel_format, width)?
        }
    };

    if width == 0 {
        return Err(IngestError::JpegEncodeFailed("cannot infer width from plane layout".into()));
    }
    let height = (rgb.len() / 3) as u32 / width;

    let mut jpeg_bytes = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, JPEG_QUALITY);
    encoder
        .encode(&rgb, width, height, image::ExtendedColorType::Rgb8)
        .map_err(|err| IngestError::JpegEncodeFailed(err.to_string()))?;
    Ok(jpeg_bytes)
}

fn planar_to_rgb(data: &Bytes, format: PixelFormat, width: u32) -> Result<Vec<u8>, IngestError> {
    if width == 0 {
        return Err(IngestError::JpegEncodeFailed("cannot infer width from plane layout".into()));
    }
    let y_size = (width as usize) * (data.len() / (width as usize) * 2 / 3);
    let y_plane = data
        .get(..y_size)
        .ok_or_else(|| IngestError::JpegEncodeFailed("y plane shorter than expected".into()))?;
    let chroma = &data[y_size..];
    let height = y_plane.len() / width as usize;
    let mut rgb = Vec::with_capacity(y_plane.len() * 3);

    for row in 0..height {
        for col in 0..width as usize {
            let y = f32::from(y_plane[row * width as usize + col]);
            let (cb, cr) = sample_chroma(chroma, format, width as usize, height, row, col);
            let r = (y + 1.402 * (cr - 128.0)).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0)).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * (cb - 128.0)).clamp(0.0, 255.0) as u8;
            rgb.extend_from_slice(&[r, g, b]);
        }
    }
    Ok(rgb)
}

fn sample_chroma(
    chroma: &[u8],
    format: PixelFormat,
    width: usize,
    height: usize,
    row: usize,
    col: usize,
) -> (f32, f32) {
    let crow = row / 2;
    let ccol = col / 2;
    let chroma_width = width / 2;
    match format {
        PixelFormat::Nv12 => {
            let idx = (crow * chroma_width + ccol) * 2;
            let cb = chroma.get(idx).copied().unwrap_or(128);
            let cr = chroma.get(idx + 1).copied().unwrap_or(128);
            (f32::from(cb), f32::from(cr))
        }
        PixelFormat::I420 => {
            let plane_size = chroma_width * (height / 2);
            let u_idx = crow * chroma_width + ccol;
            let v_idx = plane_size + u_idx;
            let cb = chroma.get(u_idx).copied().unwrap_or(128);
            let cr = chroma.get(v_idx).copied().unwrap_or(128);
            (f32::from(cb), f32::from(cr))
        }
        PixelFormat::Rgb8 => (128.0, 128.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeinfer_proto::{BoundingBox, Detection, FrameRef, LatencyBreakdown, ResultPayload};

    fn sample_job() -> IngestJob {
        IngestJob {
            frame_id: 42,
            data: Bytes::from(vec![128u8; 640 * 480 + 640 * 240]),
            metadata: CacheMetadata {
                pixel_format: PixelFormat::Nv12,
                codec: CodecKind::None,
                planes: vec![
                    edgeinfer_proto::PlaneDescriptor { stride: 640, offset: 0, size: 307_200 },
                    edgeinfer_proto::PlaneDescriptor { stride: 640, offset: 307_200, size: 153_600 },
                ],
                mono_ns: 0,
                pts_ns: 0,
                wall_ns: 1_700_000_000_000_000_000,
                session_id: "rec-1".to_string(),
            },
            result: ResultPayload {
                frame_id: 42,
                frame_ref: FrameRef { mono_ns: 0, utc_ns: 0, session_id: "rec-1".to_string() },
                model_family: "yolo".to_string(),
                model_name: "yolov8s".to_string(),
                model_version: "1".to_string(),
                latency: LatencyBreakdown { pre_ms: 1.0, infer_ms: 2.0, post_ms: 0.5, total_ms: 3.5 },
                detections: vec![Detection {
                    bbox: BoundingBox { x1: 0.1, y1: 0.2, x2: 0.3, y2: 0.6 },
                    confidence: 0.95,
                    class: "person".to_string(),
                    track_id: None,
                }],
            },
        }
    }

    #[test]
    fn s6_roundtrip_with_result() {
        let job = sample_job();
        let meta = build_meta(&job);
        assert_eq!(meta.session_id, "rec-1");
        assert_eq!(meta.seq_no, 42);
        assert_eq!(meta.detections[0].cls, "person");
        assert!((meta.detections[0].conf - 0.95).abs() < 1e-6);
        let bbox = &meta.detections[0].bbox;
        assert!((bbox.x - 0.1).abs() < 1e-6);
        assert!((bbox.y - 0.2).abs() < 1e-6);
        assert!((bbox.w - 0.2).abs() < 1e-6);
        assert!((bbox.h - 0.4).abs() < 1e-6);

        let jpeg = encode_jpeg(&job.data, &job.metadata).unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn nv12_encodes_to_nonempty_jpeg() {
        let job = sample_job();
        let jpeg = encode_jpeg(&job.data, &job.metadata).unwrap();
        assert!(!jpeg.is_empty());
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn already_jpeg_passes_through() {
        let mut job = sample_job();
        job.metadata.codec = CodecKind::Jpeg;
        job.data = Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let jpeg = encode_jpeg(&job.data, &job.metadata).unwrap();
        assert_eq!(jpeg, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }
}
