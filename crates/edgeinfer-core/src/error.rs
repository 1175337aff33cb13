//! Shared error taxonomy for the core state, independent of transport.

use thiserror::Error;

/// Errors that can arise from core state transitions (window, cache) that
/// are not specific to the wire codec or the connection state machine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A frame's plane descriptors did not sum to its payload length.
    #[error("plane sizes ({sum}) do not sum to payload length ({payload_len})")]
    PlaneMismatch {
        /// Sum of `plane.size` across all planes.
        sum: u64,
        /// Length of the frame payload.
        payload_len: u64,
    },

    /// A frame's declared pixel format requires a planar layout the
    /// metadata did not provide.
    #[error("unsupported pixel format for planar session: {0:?}")]
    UnsupportedFormat(edgeinfer_proto::PixelFormat),
}

impl CoreError {
    /// Per-frame validation errors are always local to the offending frame;
    /// none of them represent a condition worth retrying as-is.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        false
    }
}
