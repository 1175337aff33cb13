//! Frame admission, draining, and graceful degradation.
//!
//! The feeder is the orchestrator described in the system overview: it
//! decides whether an incoming frame is written immediately or replaces
//! the single pending slot, drains that slot as credit frees up, and
//! renegotiates capabilities when the worker reports the frame is too
//! large or the format is unsupported. Every entry point is
//! `handle(event) -> Result<Vec<Action>, Error>`: no I/O happens inside,
//! the caller executes the actions.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use edgeinfer_core::cache::CheckedSub;
use edgeinfer_core::{CacheMetadata, CoreError, Environment, FrameCache, WindowManager};
use edgeinfer_proto::{
    Capabilities, CodecKind, Envelope, EnvelopeBody, ErrorCode, ErrorPayload, FramePayload,
    InitOkPayload, PixelFormat, PlaneDescriptor, ResultPayload, WindowUpdatePayload,
};

use crate::error::FeederError;

/// Maximum number of degradation attempts before the feeder gives up and
/// surfaces a fatal error.
pub const MAX_DEGRADATION_ATTEMPTS: u32 = 3;

/// How long the `degrading` flag stays set after a degradation attempt,
/// regardless of outcome.
pub const DEGRADATION_COOLDOWN: Duration = Duration::from_secs(5);

/// Capture-side metadata accompanying one raw frame.
#[derive(Debug, Clone)]
pub struct CaptureMeta {
    /// Frame width, in pixels.
    pub width: u32,
    /// Frame height, in pixels.
    pub height: u32,
    /// Pixel format of the raw buffer.
    pub pixel_format: PixelFormat,
    /// Codec the raw buffer is encoded with (usually `None`, pre-degradation).
    pub codec: CodecKind,
    /// Plane layout of the raw buffer.
    pub planes: Vec<PlaneDescriptor>,
    /// Monotonic capture timestamp, nanoseconds.
    pub mono_ns: u64,
    /// Presentation timestamp, nanoseconds.
    pub pts_ns: u64,
    /// Wall-clock capture timestamp, nanoseconds since Unix epoch.
    pub wall_ns: u64,
    /// Whether this frame is independently decodable.
    pub keyframe: bool,
    /// Color space label.
    pub color_space: String,
    /// Color range label.
    pub color_range: String,
}

struct Pending {
    data: Bytes,
    meta: CaptureMeta,
}

/// A pending frame admitted into the cache, ready for the ingest path once
/// its result arrives.
#[derive(Debug, Clone)]
pub struct IngestJob {
    /// Frame id the result should correlate back to.
    pub frame_id: u64,
    /// Raw (or pre-degradation-encoded) frame bytes.
    pub data: Bytes,
    /// Capture metadata recorded alongside the bytes.
    pub metadata: CacheMetadata,
    /// The detections and timing reported for this frame.
    pub result: ResultPayload,
}

/// Effects the caller must carry out on behalf of the feeder.
#[derive(Debug, Clone)]
pub enum FeederAction {
    /// Write this `Frame` envelope via the protocol client.
    SendFrame(Envelope),
    /// Renegotiate capabilities on the same connection (degradation path).
    Renegotiate(Capabilities),
    /// Hand this job to the ingester, off the hot path.
    DispatchIngest(IngestJob),
}

/// Counters the feeder maintains purely for observability; exposed so the
/// driver can export them as metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeederMetrics {
    /// Frames dropped because the connection was not yet `READY`.
    pub frames_dropped_pre_ready: u64,
    /// Frames dropped for exceeding `max_frame_bytes`.
    pub frame_bytes_max_hit_total: u64,
    /// Frames dropped for a plane-size mismatch.
    pub plane_mismatch_total: u64,
    /// Frames dropped for an unsupported pixel format.
    pub unsupported_format_total: u64,
    /// Times a still-pending frame was evicted by a newer one.
    pub drops_latestwins_total: u64,
    /// Results that arrived after their cache entry had already expired.
    pub cache_misses_total: u64,
    /// Successful degradation-triggered renegotiations.
    pub ai_degrade_jpeg_switch_total: u64,
}

/// The frame admission, drain, and degradation orchestrator for one
/// connection attempt. Reconnection reconstructs a fresh feeder.
pub struct Feeder<E: Environment> {
    cache: FrameCache<E>,
    window: WindowManager,
    base_capabilities: Capabilities,
    initialized: bool,
    max_frame_bytes: u32,
    next_frame_id: u64,
    session_id: String,
    stream_id: String,
    pending: Option<Pending>,
    degradation_attempts: u32,
    degrading: bool,
    degrading_since: Option<E::Instant>,
    sent_at: HashMap<u64, E::Instant>,
    metrics: FeederMetrics,
}

impl<E: Environment> Feeder<E>
where
    E::Instant: CheckedSub,
{
    /// Builds a feeder bound to `cache`, ready to admit frames once
    /// [`Feeder::handle_init_ok`] is called.
    pub fn new(
        cache: FrameCache<E>,
        base_capabilities: Capabilities,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            window: WindowManager::new(),
            base_capabilities,
            initialized: false,
            max_frame_bytes: 0,
            next_frame_id: 0,
            session_id: session_id.into(),
            stream_id: String::new(),
            pending: None,
            degradation_attempts: 0,
            degrading: false,
            degrading_since: None,
            sent_at: HashMap::new(),
            metrics: FeederMetrics::default(),
        }
    }

    /// Current metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> FeederMetrics {
        self.metrics
    }

    /// Initializes the feeder from a freshly-received `InitOk`.
    pub fn handle_init_ok(&mut self, init_ok: &InitOkPayload) {
        self.window.initialize(init_ok.chosen.initial_credits);
        self.max_frame_bytes = init_ok.max_frame_bytes;
        self.initialized = true;
    }

    /// Records the stream id of the connection frames are currently being
    /// sent on, stamped into every `Frame` envelope the feeder builds.
    pub fn set_stream_id(&mut self, stream_id: impl Into<String>) {
        self.stream_id = stream_id.into();
    }

    /// Admits (or replaces the pending slot for) one captured frame.
    pub fn handle_frame(
        &mut self,
        data: Bytes,
        meta: CaptureMeta,
        now: E::Instant,
    ) -> Result<Vec<FeederAction>, FeederError> {
        if !self.initialized {
            self.metrics.frames_dropped_pre_ready += 1;
            return Ok(Vec::new());
        }
        if data.len() as u32 > self.max_frame_bytes {
            self.metrics.frame_bytes_max_hit_total += 1;
            return Ok(Vec::new());
        }

        if !self.window.has_credits() {
            if self.pending.is_some() {
                self.metrics.drops_latestwins_total += 1;
            }
            self.pending = Some(Pending { data, meta });
            return Ok(Vec::new());
        }

        self.admit(data, meta, now)
    }

    fn admit(
        &mut self,
        data: Bytes,
        meta: CaptureMeta,
        now: E::Instant,
    ) -> Result<Vec<FeederAction>, FeederError> {
        // Id assignment happens before plane validation, matching the
        // admission order in the system overview: a frame that fails
        // validation still consumes an id, it is simply never sent.
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        if let Err(error) = Self::validate_planar_format(meta.pixel_format) {
            self.metrics.unsupported_format_total += 1;
            tracing::warn!(frame_id, error = %error, "dropping frame: unsupported pixel format");
            return Ok(Vec::new());
        }

        let sum: u64 = meta.planes.iter().map(|p| u64::from(p.size)).sum();
        if sum != data.len() as u64 {
            self.metrics.plane_mismatch_total += 1;
            let error = CoreError::PlaneMismatch { sum, payload_len: data.len() as u64 };
            tracing::warn!(frame_id, error = %error, "dropping frame: plane size mismatch");
            return Ok(Vec::new());
        }

        self.sent_at.insert(frame_id, now);
        self.cache.set(
            frame_id,
            data.clone(),
            CacheMetadata {
                pixel_format: meta.pixel_format,
                codec: meta.codec,
                planes: meta.planes.clone(),
                mono_ns: meta.mono_ns,
                pts_ns: meta.pts_ns,
                wall_ns: meta.wall_ns,
                session_id: self.session_id.clone(),
            },
        );

        let payload = FramePayload {
            frame_id,
            mono_ns: meta.mono_ns,
            pts_ns: meta.pts_ns,
            wall_ns: meta.wall_ns,
            width: meta.width,
            height: meta.height,
            pixel_format: meta.pixel_format,
            codec: meta.codec,
            planes: meta.planes,
            keyframe: meta.keyframe,
            color_space: meta.color_space,
            color_range: meta.color_range,
            payload: data.to_vec(),
            session_id: self.session_id.clone(),
        };
        let envelope = Envelope::new(self.stream_id.clone(), EnvelopeBody::Frame(payload));
        self.window.on_frame_sent();
        Ok(vec![FeederAction::SendFrame(envelope)])
    }

    /// Attempts to flush the pending slot by re-running admission.
    pub fn drain(&mut self, now: E::Instant) -> Result<Vec<FeederAction>, FeederError> {
        if !self.window.has_credits() {
            return Ok(Vec::new());
        }
        match self.pending.take() {
            Some(pending) => self.handle_frame(pending.data, pending.meta, now),
            None => Ok(Vec::new()),
        }
    }

    /// Handles a `WindowUpdate`: resize the window, then try to drain.
    pub fn handle_window_update(
        &mut self,
        update: WindowUpdatePayload,
        now: E::Instant,
    ) -> Result<Vec<FeederAction>, FeederError> {
        self.window.handle_window_update(update.size);
        self.drain(now)
    }

    /// Handles a `Result`: release a credit, correlate against the cache,
    /// and dispatch an ingest job if the frame is still cached, then try to
    /// drain the pending slot.
    pub fn handle_result(
        &mut self,
        result: ResultPayload,
        now: E::Instant,
    ) -> Result<Vec<FeederAction>, FeederError> {
        if let Some(sent_at) = self.sent_at.remove(&result.frame_id) {
            let rtt = now.checked_sub_instant(sent_at);
            tracing::debug!(
                frame_id = result.frame_id,
                rtt_ms = rtt.map(|d| d.as_secs_f64() * 1000.0),
                "result received"
            );
        }
        self.window.on_result_received();

        let mut actions = Vec::new();
        if let Some((data, metadata)) = self.cache.get(result.frame_id) {
            actions.push(FeederAction::DispatchIngest(IngestJob {
                frame_id: result.frame_id,
                data,
                metadata,
                result,
            }));
        } else {
            self.metrics.cache_misses_total += 1;
        }

        actions.extend(self.drain(now)?);
        Ok(actions)
    }

    /// Handles an `Error` reported by the worker: triggers degradation for
    /// `FRAME_TOO_LARGE`/`UNSUPPORTED_FORMAT`, otherwise is the caller's to
    /// propagate.
    pub fn handle_error(
        &mut self,
        error: ErrorPayload,
        now: E::Instant,
    ) -> Result<Vec<FeederAction>, FeederError> {
        self.refresh_degrading_flag(now);

        if !matches!(error.code, ErrorCode::FrameTooLarge | ErrorCode::UnsupportedFormat) {
            return Err(FeederError::UnrecoverableWorkerError(error.code));
        }
        if self.degrading {
            return Ok(Vec::new());
        }

        self.degradation_attempts += 1;
        if self.degradation_attempts >= MAX_DEGRADATION_ATTEMPTS {
            return Err(FeederError::MaxDegradationExceeded { attempts: self.degradation_attempts });
        }

        self.degrading = true;
        self.degrading_since = Some(now);
        self.metrics.ai_degrade_jpeg_switch_total += 1;

        let mut capabilities = self.base_capabilities.clone();
        capabilities.codecs.retain(|c| *c != CodecKind::Jpeg);
        capabilities.codecs.insert(0, CodecKind::Jpeg);

        Ok(vec![FeederAction::Renegotiate(capabilities)])
    }

    fn refresh_degrading_flag(&mut self, now: E::Instant) {
        if let Some(since) = self.degrading_since {
            if now.checked_sub_instant(since).is_none_or(|elapsed| elapsed >= DEGRADATION_COOLDOWN) {
                self.degrading = false;
                self.degrading_since = None;
            }
        }
    }

    /// Whether a frame's declared format requires a planar layout the
    /// chosen pixel format cannot satisfy. Exposed for callers that build
    /// [`CaptureMeta`] from an external format tag before calling
    /// [`Feeder::handle_frame`].
    pub fn validate_planar_format(format: PixelFormat) -> Result<(), CoreError> {
        match format {
            PixelFormat::Nv12 | PixelFormat::I420 => Ok(()),
            PixelFormat::Rgb8 => Err(CoreError::UnsupportedFormat(format)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeinfer_core::SimEnv;
    use crate::connection::{ConnectionAction, ConnectionConfig, ConnectionState, ProtocolClient};

    fn capabilities() -> Capabilities {
        Capabilities {
            pixel_formats: vec![PixelFormat::Nv12],
            codecs: vec![CodecKind::None],
            max_width: 640,
            max_height: 480,
            max_inflight: 4,
            supports_letterbox: false,
            supports_normalize: false,
            preferred_layout: "NHWC".to_string(),
            preferred_dtype: "uint8".to_string(),
            desired_max_frame_bytes: 460_800,
        }
    }

    fn nv12_meta() -> CaptureMeta {
        CaptureMeta {
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Nv12,
            codec: CodecKind::None,
            planes: vec![
                PlaneDescriptor { stride: 640, offset: 0, size: 307_200 },
                PlaneDescriptor { stride: 640, offset: 307_200, size: 153_600 },
            ],
            mono_ns: 0,
            pts_ns: 0,
            wall_ns: 0,
            keyframe: true,
            color_space: "bt709".to_string(),
            color_range: "limited".to_string(),
        }
    }

    fn feeder(env: SimEnv) -> Feeder<SimEnv> {
        let cache = FrameCache::new(env.clone(), Duration::from_secs(2));
        let mut feeder = Feeder::new(cache, capabilities(), "rec-1");
        feeder.handle_init_ok(&InitOkPayload {
            chosen: edgeinfer_proto::Chosen {
                pixel_format: PixelFormat::Nv12,
                codec: CodecKind::None,
                width: 640,
                height: 480,
                target_fps: 30,
                policy: edgeinfer_proto::Policy::LatestWins,
                initial_credits: 4,
                gop_hint: None,
                color_space: "bt709".to_string(),
                color_range: "limited".to_string(),
            },
            max_frame_bytes: 460_800,
        });
        feeder
    }

    #[test]
    fn s1_happy_handshake() {
        let env = SimEnv::new(1);
        let caps = Capabilities {
            pixel_formats: vec![PixelFormat::Nv12, PixelFormat::I420],
            codecs: vec![CodecKind::None, CodecKind::Jpeg],
            max_width: 640,
            max_height: 480,
            max_inflight: 4,
            supports_letterbox: false,
            supports_normalize: false,
            preferred_layout: "NHWC".to_string(),
            preferred_dtype: "uint8".to_string(),
            desired_max_frame_bytes: 460_800,
        };

        let mut protocol = ProtocolClient::new(
            env.clone(),
            ConnectionConfig { target_width: 640, target_height: 480, ..Default::default() },
        );
        let actions = protocol.connect(env.now(), caps.clone()).unwrap();
        match &actions[0] {
            ConnectionAction::Send(envelope) => match &envelope.body {
                EnvelopeBody::Init(init) => assert_eq!(init.capabilities, caps),
                other => panic!("expected Init, got {other:?}"),
            },
            other => panic!("expected Send, got {other:?}"),
        }

        let init_ok = InitOkPayload {
            chosen: edgeinfer_proto::Chosen {
                pixel_format: PixelFormat::Nv12,
                codec: CodecKind::None,
                width: 640,
                height: 480,
                target_fps: 30,
                policy: edgeinfer_proto::Policy::LatestWins,
                initial_credits: 4,
                gop_hint: None,
                color_space: "bt709".to_string(),
                color_range: "limited".to_string(),
            },
            max_frame_bytes: 460_800,
        };
        let reply = Envelope::new(protocol.stream_id(), EnvelopeBody::InitOk(init_ok.clone()));
        protocol.handle_envelope(reply, env.now()).unwrap();
        assert_eq!(protocol.state(), ConnectionState::Ready);

        let cache = FrameCache::new(env.clone(), Duration::from_secs(2));
        let mut feeder = Feeder::new(cache, caps, "S1");
        feeder.handle_init_ok(&init_ok);
        assert_eq!(feeder.window.window_size(), 4);
        assert_eq!(feeder.window.inflight(), 0);
    }

    #[test]
    fn frames_before_ready_are_dropped() {
        let env = SimEnv::new(1);
        let cache = FrameCache::new(env.clone(), Duration::from_secs(2));
        let mut feeder = Feeder::new(cache, capabilities(), "rec-1");
        let actions =
            feeder.handle_frame(Bytes::from_static(&[0u8; 4]), nv12_meta(), env.now()).unwrap();
        assert!(actions.is_empty());
        assert_eq!(feeder.metrics().frames_dropped_pre_ready, 1);
    }

    fn result_for(frame_id: u64, detections: Vec<edgeinfer_proto::Detection>) -> ResultPayload {
        ResultPayload {
            frame_id,
            frame_ref: edgeinfer_proto::FrameRef { mono_ns: 0, utc_ns: 0, session_id: "rec-1".to_string() },
            model_family: "yolo".to_string(),
            model_name: "yolov8s".to_string(),
            model_version: "1".to_string(),
            latency: edgeinfer_proto::LatencyBreakdown {
                pre_ms: 0.0,
                infer_ms: 0.0,
                post_ms: 0.0,
                total_ms: 0.0,
            },
            detections,
        }
    }

    #[test]
    fn s2_sliding_window_saturation() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());

        for i in 0..4 {
            let payload = Bytes::from(vec![i as u8; 460_800]);
            let actions = feeder.handle_frame(payload, nv12_meta(), env.now()).unwrap();
            assert_eq!(actions.len(), 1);
            match &actions[0] {
                FeederAction::SendFrame(envelope) => match &envelope.body {
                    EnvelopeBody::Frame(frame) => assert_eq!(frame.frame_id, i),
                    other => panic!("expected Frame, got {other:?}"),
                },
                other => panic!("expected SendFrame, got {other:?}"),
            }
        }
        for i in 4..6 {
            let payload = Bytes::from(vec![i as u8; 460_800]);
            let actions = feeder.handle_frame(payload, nv12_meta(), env.now()).unwrap();
            assert!(actions.is_empty());
        }

        assert_eq!(feeder.metrics().drops_latestwins_total, 1);
        assert_eq!(feeder.pending.as_ref().unwrap().data, Bytes::from(vec![5u8; 460_800]));
    }

    #[test]
    fn s3_credit_release_and_flush() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        for i in 0..6 {
            feeder.handle_frame(Bytes::from(vec![i as u8; 460_800]), nv12_meta(), env.now()).unwrap();
        }
        assert_eq!(feeder.window.inflight(), 4);

        let actions = feeder.handle_result(result_for(0, vec![]), env.now()).unwrap();
        assert_eq!(feeder.window.inflight(), 4);
        assert!(feeder.pending.is_none());

        let dispatched = actions
            .iter()
            .find_map(|a| match a {
                FeederAction::DispatchIngest(job) => Some(job),
                _ => None,
            })
            .expect("expected DispatchIngest for frame 0");
        assert_eq!(dispatched.frame_id, 0);

        let drained = actions
            .iter()
            .find_map(|a| match a {
                FeederAction::SendFrame(envelope) => match &envelope.body {
                    EnvelopeBody::Frame(frame) => Some(frame),
                    _ => None,
                },
                _ => None,
            })
            .expect("expected the pending frame to be admitted");
        assert_eq!(drained.frame_id, 4);
        assert_eq!(drained.payload, vec![5u8; 460_800]);
    }

    #[test]
    fn result_releases_credit_and_drains_pending() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        let payload = Bytes::from(vec![0u8; 460_800]);
        for _ in 0..6 {
            feeder.handle_frame(payload.clone(), nv12_meta(), env.now()).unwrap();
        }

        let actions = feeder.handle_result(result_for(0, vec![]), env.now()).unwrap();

        assert!(actions.iter().any(|a| matches!(a, FeederAction::DispatchIngest(_))));
        assert!(actions.iter().any(|a| matches!(a, FeederAction::SendFrame(_))));
    }

    #[test]
    fn s4_oversize_rejection() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        let oversized = Bytes::from(vec![0u8; 460_801]);
        let actions = feeder.handle_frame(oversized, nv12_meta(), env.now()).unwrap();
        assert!(actions.is_empty());
        assert_eq!(feeder.metrics().frame_bytes_max_hit_total, 1);
        assert!(!feeder.degrading);
        assert_eq!(feeder.degradation_attempts, 0);
    }

    #[test]
    fn s5_degradation() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        assert_eq!(feeder.degradation_attempts, 0);
        let actions = feeder
            .handle_error(
                ErrorPayload {
                    code: ErrorCode::FrameTooLarge,
                    message: "too big".to_string(),
                    retry_after: None,
                },
                env.now(),
            )
            .unwrap();
        assert_eq!(feeder.degradation_attempts, 1);
        assert!(feeder.degrading);
        assert_eq!(feeder.degrading_since, Some(env.now()));
        assert_eq!(feeder.metrics().ai_degrade_jpeg_switch_total, 1);
        match &actions[0] {
            FeederAction::Renegotiate(caps) => assert!(caps.codecs.contains(&CodecKind::Jpeg)),
            other => panic!("expected Renegotiate, got {other:?}"),
        }
    }

    #[test]
    fn s6_roundtrip_with_result() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        feeder.next_frame_id = 42;

        let actions = feeder
            .handle_frame(Bytes::from(vec![0u8; 460_800]), nv12_meta(), env.now())
            .unwrap();
        match &actions[0] {
            FeederAction::SendFrame(envelope) => match &envelope.body {
                EnvelopeBody::Frame(frame) => assert_eq!(frame.frame_id, 42),
                other => panic!("expected Frame, got {other:?}"),
            },
            other => panic!("expected SendFrame, got {other:?}"),
        }

        let detections = vec![edgeinfer_proto::Detection {
            bbox: edgeinfer_proto::BoundingBox { x1: 0.1, y1: 0.2, x2: 0.3, y2: 0.6 },
            confidence: 0.95,
            class: "person".to_string(),
            track_id: None,
        }];
        let actions = feeder.handle_result(result_for(42, detections), env.now()).unwrap();
        let dispatched = actions
            .iter()
            .find_map(|a| match a {
                FeederAction::DispatchIngest(job) => Some(job),
                _ => None,
            })
            .expect("expected a cache hit dispatched for ingest");
        assert_eq!(dispatched.frame_id, 42);
        assert_eq!(dispatched.result.detections[0].class, "person");
        assert!((dispatched.result.detections[0].confidence - 0.95).abs() < f32::EPSILON);
        assert_eq!(feeder.metrics().cache_misses_total, 0);
    }

    #[test]
    fn degradation_gives_up_after_three_attempts() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        for _ in 0..2 {
            feeder
                .handle_error(
                    ErrorPayload {
                        code: ErrorCode::FrameTooLarge,
                        message: "too big".to_string(),
                        retry_after: None,
                    },
                    env.now(),
                )
                .unwrap();
            env.advance(Duration::from_secs(6));
        }
        let err = feeder
            .handle_error(
                ErrorPayload {
                    code: ErrorCode::FrameTooLarge,
                    message: "too big".to_string(),
                    retry_after: None,
                },
                env.now(),
            )
            .unwrap_err();
        assert!(matches!(err, FeederError::MaxDegradationExceeded { attempts: 3 }));
    }

    #[test]
    fn unrelated_error_code_propagates_without_degrading() {
        let env = SimEnv::new(1);
        let mut feeder = feeder(env.clone());
        let err = feeder
            .handle_error(
                ErrorPayload { code: ErrorCode::ModelNotReady, message: "warming up".to_string(), retry_after: None },
                env.now(),
            )
            .unwrap_err();
        assert!(matches!(err, FeederError::UnrecoverableWorkerError(ErrorCode::ModelNotReady)));
        assert_eq!(feeder.metrics().ai_degrade_jpeg_switch_total, 0);
    }
}
