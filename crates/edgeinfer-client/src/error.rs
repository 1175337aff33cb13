//! Per-layer error taxonomy.
//!
//! One `thiserror` enum per layer, each with an `is_transient` classifier
//! that the production driver consults to decide whether a failure should
//! trigger reconnection-with-backoff or simply be logged and dropped.

use thiserror::Error;

use edgeinfer_proto::{CodecError, ErrorCode};

/// Errors from the protocol client's state machine and transport.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The handshake did not complete within the configured timeout.
    #[error("handshake timed out waiting for InitOk")]
    HandshakeTimeout,

    /// No heartbeat was observed from the peer within 3x the heartbeat
    /// interval.
    #[error("heartbeat timeout: no message from peer")]
    HeartbeatTimeout,

    /// A message arrived in `INIT_SENT` that was neither `InitOk` nor
    /// `Error`.
    #[error("unexpected message in INIT_SENT state")]
    BadSequence,

    /// The peer sent a malformed or version-mismatched envelope.
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),

    /// The underlying transport failed (connection reset, write failure).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection is closed and cannot accept further events.
    #[error("connection is closed")]
    Closed,
}

impl ConnectionError {
    /// Transport and timeout failures are transient: the caller should
    /// reconnect with backoff. Protocol violations are fatal for the
    /// connection (though a fresh connection may succeed).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeTimeout | Self::HeartbeatTimeout | Self::Transport(_))
    }
}

/// Errors from the feeder's admission, drain, and degradation logic.
#[derive(Debug, Error)]
pub enum FeederError {
    /// Three degradation attempts were exhausted without the worker
    /// accepting a renegotiated `Init`.
    #[error("degradation exhausted after {attempts} attempts")]
    MaxDegradationExceeded {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The worker reported an error code that is not retryable within this
    /// session (anything other than `FRAME_TOO_LARGE`/`UNSUPPORTED_FORMAT`,
    /// which trigger degradation instead).
    #[error("unrecoverable worker error: {0:?}")]
    UnrecoverableWorkerError(ErrorCode),

    /// The connection layer reported a fatal protocol error.
    #[error("fatal protocol error: {0}")]
    FatalProtocol(#[from] ConnectionError),
}

impl FeederError {
    /// None of the feeder's own errors are retryable as-is; they all
    /// represent conditions the caller's public error callback should
    /// surface because they threaten the whole session.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        false
    }
}

/// Errors from the ingest path. Always local to one frame; never
/// propagated to the inference stream.
#[derive(Debug, Error)]
pub enum IngestError {
    /// JPEG encoding failed. Per the design notes, this is a hard failure
    /// for the frame: a non-JPEG payload is never shipped to an endpoint
    /// that advertises `image/jpeg`.
    #[error("jpeg encode failed: {0}")]
    JpegEncodeFailed(String),

    /// The HTTP request failed after exhausting retries.
    #[error("ingest request failed: {0}")]
    RequestFailed(String),

    /// The sink returned a 4xx status other than 429, which is not
    /// retried.
    #[error("ingest sink rejected the request with status {0}")]
    Rejected(u16),
}

impl IngestError {
    /// Whether this failure is worth retrying. JPEG failures and outright
    /// rejections are not; everything else already exhausted its own
    /// retry budget by the time it surfaces here.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed(_))
    }
}
