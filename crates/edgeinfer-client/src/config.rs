//! Configuration surface for the client binary and library consumers.

use std::time::Duration;

use edgeinfer_proto::{Capabilities, CodecKind, PixelFormat};

use crate::connection::{ConnectionConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};

/// Required and defaulted configuration for one inference session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Model identifier the worker should load, e.g. `"yolov8s"`.
    pub model: String,
    /// Target frame width.
    pub width: u32,
    /// Target frame height.
    pub height: u32,
    /// Hint for how many frames may be outstanding at once.
    pub max_inflight: u32,
    /// Pixel format the capture pipeline will produce.
    pub pixel_format: PixelFormat,
    /// Frame cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Base URL of the ingest sink (`POST {base}/ingest`).
    pub ingest_base_url: String,
    /// Interval between heartbeats once `READY`.
    pub heartbeat_interval: Duration,
    /// Bound on how long the handshake may take.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    /// The capabilities this configuration advertises in `Init`.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            pixel_formats: vec![self.pixel_format, other_planar_format(self.pixel_format)],
            codecs: vec![CodecKind::None, CodecKind::Jpeg],
            max_width: self.width,
            max_height: self.height,
            max_inflight: self.max_inflight,
            supports_letterbox: false,
            supports_normalize: false,
            preferred_layout: "NHWC".to_string(),
            preferred_dtype: "uint8".to_string(),
            desired_max_frame_bytes: self.width * self.height * 3 / 2,
        }
    }

    /// The protocol client tunables derived from this configuration.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: self.handshake_timeout,
            heartbeat_interval: self.heartbeat_interval,
            target_width: self.width,
            target_height: self.height,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: "yolov8s".to_string(),
            width: 640,
            height: 480,
            max_inflight: 4,
            pixel_format: PixelFormat::Nv12,
            cache_ttl: edgeinfer_core::cache::DEFAULT_TTL,
            ingest_base_url: "http://localhost:8080".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

fn other_planar_format(primary: PixelFormat) -> PixelFormat {
    match primary {
        PixelFormat::Nv12 => PixelFormat::I420,
        PixelFormat::I420 | PixelFormat::Rgb8 => PixelFormat::Nv12,
    }
}
