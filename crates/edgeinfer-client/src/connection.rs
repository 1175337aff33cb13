//! Protocol client: the handshake/heartbeat state machine.
//!
//! A Sans-IO state machine: every method takes the current time and
//! returns the actions the caller must execute (write bytes, close the
//! socket), never performing I/O itself. This keeps the handshake,
//! heartbeat, and timeout logic testable against a simulated clock.

use std::time::Duration;

use edgeinfer_core::Environment;
use edgeinfer_proto::{
    Capabilities, Envelope, EnvelopeBody, HeartbeatPayload, InitOkPayload, InitPayload, Policy,
};

use crate::error::ConnectionError;

/// Default bound on how long the client waits for `InitOk` after sending
/// `Init`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between heartbeats once `READY`.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A peer silent for this many heartbeat intervals is considered failed.
pub const HEARTBEAT_TIMEOUT_MULTIPLIER: u32 = 3;

/// Tunables for the handshake and heartbeat timers.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// How long to wait for `InitOk` after sending `Init`.
    pub handshake_timeout: Duration,
    /// How often to emit a `Heartbeat` once `READY`.
    pub heartbeat_interval: Duration,
    /// Target frame width, compared against the worker's chosen width.
    pub target_width: u32,
    /// Target frame height, compared against the worker's chosen height.
    pub target_height: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            target_width: 0,
            target_height: 0,
        }
    }
}

/// States of the protocol client, per the handshake/heartbeat state
/// diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport connection exists yet.
    Disconnected,
    /// Transport connected; `Init` not yet sent.
    Connected,
    /// `Init` sent; waiting for `InitOk`.
    InitSent,
    /// Handshake complete; frames may be sent and results received.
    Ready,
    /// Terminal: the connection is gone and must be rebuilt.
    Closed,
}

/// An effect the caller must carry out: write bytes, hand a decoded body to
/// the feeder, or tear the connection down.
#[derive(Debug, Clone)]
pub enum ConnectionAction {
    /// Encode and write this envelope to the transport.
    Send(Envelope),
    /// Hand a decoded, connection-layer-approved body up to the feeder.
    Deliver(EnvelopeBody),
    /// Close the transport and report why.
    Close {
        /// Human-readable reason, for logs.
        reason: String,
    },
}

/// The handshake/heartbeat state machine for one connection attempt.
pub struct ProtocolClient<E: Environment> {
    env: E,
    state: ConnectionState,
    config: ConnectionConfig,
    stream_id: String,
    init_sent_at: Option<E::Instant>,
    last_heartbeat_sent: Option<E::Instant>,
    last_peer_activity: Option<E::Instant>,
    last_frame_id: u64,
    tx_bytes: u64,
    rx_bytes: u64,
    unexpected_message_count: u64,
}

impl<E: Environment> ProtocolClient<E>
where
    E::Instant: edgeinfer_core::cache::CheckedSub,
{
    /// Builds a disconnected client. Call [`ProtocolClient::connect`] to
    /// begin the handshake.
    pub fn new(env: E, config: ConnectionConfig) -> Self {
        Self {
            env,
            state: ConnectionState::Disconnected,
            config,
            stream_id: String::new(),
            init_sent_at: None,
            last_heartbeat_sent: None,
            last_peer_activity: None,
            last_frame_id: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            unexpected_message_count: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Stream id generated for the current (or most recent) connection
    /// attempt.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Count of messages ignored because they arrived in a state that did
    /// not expect them.
    #[must_use]
    pub fn unexpected_message_count(&self) -> u64 {
        self.unexpected_message_count
    }

    /// Transitions `DISCONNECTED -> CONNECTED -> INIT_SENT`, generating a
    /// fresh stream id and sending `Init` with `capabilities`.
    pub fn connect(
        &mut self,
        now: E::Instant,
        capabilities: Capabilities,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ConnectionError::Closed);
        }
        self.stream_id = format!("{:032x}", self.env.random_u128());
        self.state = ConnectionState::Connected;
        self.tx_bytes = 0;
        self.rx_bytes = 0;
        self.last_frame_id = 0;

        let envelope =
            Envelope::new(self.stream_id.clone(), EnvelopeBody::Init(InitPayload { capabilities }));
        self.state = ConnectionState::InitSent;
        self.init_sent_at = Some(now);
        self.tx_bytes += envelope_weight(&envelope);
        Ok(vec![ConnectionAction::Send(envelope)])
    }

    /// Handles one decoded envelope arriving from the transport.
    pub fn handle_envelope(
        &mut self,
        envelope: Envelope,
        now: E::Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        self.rx_bytes += envelope_weight(&envelope);

        if matches!(envelope.body, EnvelopeBody::End(_)) {
            self.state = ConnectionState::Closed;
            return Ok(vec![ConnectionAction::Close { reason: "peer sent End".to_string() }]);
        }

        match (self.state, &envelope.body) {
            (ConnectionState::InitSent, EnvelopeBody::InitOk(init_ok)) => {
                self.handle_init_ok(init_ok.clone(), now)
            }
            (ConnectionState::InitSent, EnvelopeBody::Error(_)) => {
                Ok(vec![ConnectionAction::Deliver(envelope.body)])
            }
            (ConnectionState::InitSent, _) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::BadSequence)
            }
            (
                ConnectionState::Ready,
                EnvelopeBody::WindowUpdate(_) | EnvelopeBody::Result(_) | EnvelopeBody::Error(_),
            ) => Ok(vec![ConnectionAction::Deliver(envelope.body)]),
            (ConnectionState::Ready, EnvelopeBody::Heartbeat(_)) => {
                self.last_peer_activity = Some(now);
                Ok(Vec::new())
            }
            _ => {
                self.unexpected_message_count += 1;
                Ok(Vec::new())
            }
        }
    }

    fn handle_init_ok(
        &mut self,
        init_ok: InitOkPayload,
        now: E::Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if init_ok.chosen.policy != Policy::LatestWins {
            tracing::warn!(
                policy = ?init_ok.chosen.policy,
                "worker chose a policy other than LATEST_WINS; forcing latest-wins behavior anyway"
            );
        }
        if init_ok.chosen.width != self.config.target_width
            || init_ok.chosen.height != self.config.target_height
        {
            tracing::warn!(
                requested_width = self.config.target_width,
                requested_height = self.config.target_height,
                chosen_width = init_ok.chosen.width,
                chosen_height = init_ok.chosen.height,
                "worker chose a resolution different from the requested one; proceeding, frames may be rejected"
            );
        }
        self.state = ConnectionState::Ready;
        self.last_heartbeat_sent = Some(now);
        self.last_peer_activity = Some(now);
        Ok(vec![ConnectionAction::Deliver(EnvelopeBody::InitOk(init_ok))])
    }

    /// Hands a `Frame` envelope to the transport. Requires `READY`.
    pub fn send_frame(
        &mut self,
        envelope: Envelope,
        frame_id: u64,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Ready {
            return Err(ConnectionError::Closed);
        }
        self.last_frame_id = frame_id;
        self.tx_bytes += envelope_weight(&envelope);
        Ok(vec![ConnectionAction::Send(envelope)])
    }

    /// Checks timeouts and emits a heartbeat if one is due. Must be called
    /// periodically by the driver.
    pub fn tick(&mut self, now: E::Instant) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::InitSent => {
                if let Some(sent_at) = self.init_sent_at {
                    if elapsed_at_least(now, sent_at, self.config.handshake_timeout) {
                        self.state = ConnectionState::Closed;
                        return vec![ConnectionAction::Close {
                            reason: "handshake timed out".to_string(),
                        }];
                    }
                }
                Vec::new()
            }
            ConnectionState::Ready => self.tick_ready(now),
            _ => Vec::new(),
        }
    }

    fn tick_ready(&mut self, now: E::Instant) -> Vec<ConnectionAction> {
        let timeout = self.config.heartbeat_interval * HEARTBEAT_TIMEOUT_MULTIPLIER;
        if let Some(last_activity) = self.last_peer_activity {
            if elapsed_at_least(now, last_activity, timeout) {
                self.state = ConnectionState::Closed;
                return vec![ConnectionAction::Close {
                    reason: "heartbeat timeout: no message from peer".to_string(),
                }];
            }
        }

        let due = self
            .last_heartbeat_sent
            .is_none_or(|last| elapsed_at_least(now, last, self.config.heartbeat_interval));
        if !due {
            return Vec::new();
        }
        self.last_heartbeat_sent = Some(now);
        let envelope = Envelope::new(
            self.stream_id.clone(),
            EnvelopeBody::Heartbeat(HeartbeatPayload {
                mono_ns: 0,
                last_frame_id: self.last_frame_id,
                tx_bytes: self.tx_bytes,
                rx_bytes: self.rx_bytes,
            }),
        );
        self.tx_bytes += envelope_weight(&envelope);
        vec![ConnectionAction::Send(envelope)]
    }

    /// Sends `Init` again with different capabilities, used by the feeder's
    /// degradation path. Valid from `READY` (mid-session degradation) and
    /// from `INIT_SENT` (the worker rejected the very first `Init` with
    /// `FRAME_TOO_LARGE`/`UNSUPPORTED_FORMAT` before ever reaching `READY`).
    /// Returns to (or stays in) `INIT_SENT`.
    pub fn renegotiate(
        &mut self,
        now: E::Instant,
        capabilities: Capabilities,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if !matches!(self.state, ConnectionState::Ready | ConnectionState::InitSent) {
            return Err(ConnectionError::Closed);
        }
        let envelope =
            Envelope::new(self.stream_id.clone(), EnvelopeBody::Init(InitPayload { capabilities }));
        self.state = ConnectionState::InitSent;
        self.init_sent_at = Some(now);
        self.tx_bytes += envelope_weight(&envelope);
        Ok(vec![ConnectionAction::Send(envelope)])
    }

    /// Initiates a local, graceful shutdown: send `End`, then close.
    pub fn shutdown(&mut self, reason: impl Into<String>) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        let envelope = Envelope::new(
            self.stream_id.clone(),
            EnvelopeBody::End(edgeinfer_proto::EndPayload { reason: reason.into() }),
        );
        self.state = ConnectionState::Closed;
        vec![ConnectionAction::Send(envelope), ConnectionAction::Close { reason: "local shutdown".to_string() }]
    }

    /// Marks the connection closed without sending `End` (transport
    /// failure path).
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

fn envelope_weight(envelope: &Envelope) -> u64 {
    envelope.encode().map(|bytes| bytes.len() as u64).unwrap_or(0)
}

fn elapsed_at_least<I: edgeinfer_core::cache::CheckedSub>(now: I, since: I, bound: Duration) -> bool {
    now.checked_sub_instant(since).is_none_or(|elapsed| elapsed >= bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeinfer_core::SimEnv;
    use edgeinfer_proto::{CodecKind, PixelFormat};

    fn capabilities() -> Capabilities {
        Capabilities {
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
        }
    }

    fn init_ok() -> InitOkPayload {
        InitOkPayload {
            chosen: edgeinfer_proto::Chosen {
                pixel_format: PixelFormat::Nv12,
                codec: CodecKind::None,
                width: 640,
                height: 480,
                target_fps: 30,
                policy: Policy::LatestWins,
                initial_credits: 4,
                gop_hint: None,
                color_space: "bt709".to_string(),
                color_range: "limited".to_string(),
            },
            max_frame_bytes: 460_800,
        }
    }

    #[test]
    fn happy_handshake_reaches_ready() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(
            env.clone(),
            ConnectionConfig { target_width: 640, target_height: 480, ..Default::default() },
        );
        let actions = client.connect(env.now(), capabilities()).unwrap();
        assert_eq!(client.state(), ConnectionState::InitSent);
        assert!(matches!(actions[0], ConnectionAction::Send(_)));

        let reply = Envelope::new(client.stream_id(), EnvelopeBody::InitOk(init_ok()));
        let actions = client.handle_envelope(reply, env.now()).unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(matches!(actions[0], ConnectionAction::Deliver(EnvelopeBody::InitOk(_))));
    }

    #[test]
    fn handshake_timeout_closes_connection() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(env.clone(), ConnectionConfig::default());
        client.connect(env.now(), capabilities()).unwrap();
        env.advance(Duration::from_secs(11));
        let actions = client.tick(env.now());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(actions[0], ConnectionAction::Close { .. }));
    }

    #[test]
    fn bad_sequence_in_init_sent_is_fatal() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(env.clone(), ConnectionConfig::default());
        client.connect(env.now(), capabilities()).unwrap();
        let bogus = Envelope::new(
            client.stream_id(),
            EnvelopeBody::WindowUpdate(edgeinfer_proto::WindowUpdatePayload { size: 1 }),
        );
        let err = client.handle_envelope(bogus, env.now()).unwrap_err();
        assert!(matches!(err, ConnectionError::BadSequence));
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn heartbeat_sent_once_interval_elapses() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(
            env.clone(),
            ConnectionConfig { target_width: 640, target_height: 480, ..Default::default() },
        );
        client.connect(env.now(), capabilities()).unwrap();
        let reply = Envelope::new(client.stream_id(), EnvelopeBody::InitOk(init_ok()));
        client.handle_envelope(reply, env.now()).unwrap();

        assert!(client.tick(env.now()).is_empty());
        env.advance(Duration::from_secs(5));
        let actions = client.tick(env.now());
        assert!(matches!(
            actions.first(),
            Some(ConnectionAction::Send(Envelope { body: EnvelopeBody::Heartbeat(_), .. }))
        ));
    }

    #[test]
    fn heartbeat_timeout_closes_ready_connection() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(
            env.clone(),
            ConnectionConfig { target_width: 640, target_height: 480, ..Default::default() },
        );
        client.connect(env.now(), capabilities()).unwrap();
        let reply = Envelope::new(client.stream_id(), EnvelopeBody::InitOk(init_ok()));
        client.handle_envelope(reply, env.now()).unwrap();

        env.advance(Duration::from_secs(16));
        let actions = client.tick(env.now());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(actions[0], ConnectionAction::Close { .. }));
    }

    #[test]
    fn renegotiate_retries_from_init_sent() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(
            env.clone(),
            ConnectionConfig { target_width: 640, target_height: 480, ..Default::default() },
        );
        client.connect(env.now(), capabilities()).unwrap();
        assert_eq!(client.state(), ConnectionState::InitSent);

        // Worker rejects the first Init before ever reaching READY.
        let rejection = Envelope::new(
            client.stream_id(),
            EnvelopeBody::Error(edgeinfer_proto::ErrorPayload {
                code: edgeinfer_proto::ErrorCode::UnsupportedFormat,
                message: "nope".to_string(),
                retry_after: None,
            }),
        );
        client.handle_envelope(rejection, env.now()).unwrap();
        assert_eq!(client.state(), ConnectionState::InitSent);

        let mut degraded = capabilities();
        degraded.codecs.retain(|c| *c != CodecKind::Jpeg);
        degraded.codecs.insert(0, CodecKind::Jpeg);
        let actions = client.renegotiate(env.now(), degraded).unwrap();
        assert_eq!(client.state(), ConnectionState::InitSent);
        assert!(matches!(
            actions[0],
            ConnectionAction::Send(Envelope { body: EnvelopeBody::Init(_), .. })
        ));
    }

    #[test]
    fn end_from_peer_closes_from_any_state() {
        let env = SimEnv::new(1);
        let mut client = ProtocolClient::new(env.clone(), ConnectionConfig::default());
        client.connect(env.now(), capabilities()).unwrap();
        let end = Envelope::new(
            client.stream_id(),
            EnvelopeBody::End(edgeinfer_proto::EndPayload { reason: "bye".to_string() }),
        );
        let actions = client.handle_envelope(end, env.now()).unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(actions[0], ConnectionAction::Close { .. }));
    }
}
