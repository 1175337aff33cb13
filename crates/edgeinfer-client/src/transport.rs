//! Production TCP transport and reconnect-with-backoff driver.
//!
//! A loop matching on the Sans-IO layer's action enum and performing the
//! corresponding I/O, over a plain `tokio::net::TcpStream` with an
//! explicit 4-byte big-endian length prefix ahead of each envelope.

#![cfg(feature = "transport")]

use std::time::Duration;

use edgeinfer_proto::header::EnvelopeHeader;
use edgeinfer_proto::{Envelope, CodecError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Upper bound on the outer length-prefixed frame: the largest envelope
/// the codec will ever decode (header + max stream id + max CBOR body),
/// rejected before allocating a buffer for it.
const MAX_FRAME_LEN: usize =
    EnvelopeHeader::SIZE + u16::MAX as usize + EnvelopeHeader::MAX_PAYLOAD_SIZE as usize;

/// Base delay for the first reconnect attempt.
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound on reconnect backoff.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff with jitter, used between reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Builds a fresh backoff sequence, starting at attempt zero.
    #[must_use]
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// The delay for the next attempt, then advances the sequence.
    /// `jitter_unit` is a value in `[0.0, 1.0)` supplied by the caller's
    /// `Environment` so the delay stays deterministic under simulation.
    pub fn next_delay(&mut self, jitter_unit: f64) -> Duration {
        let exponent = self.attempt.min(10);
        self.attempt += 1;
        let base_ms = (BACKOFF_BASE.as_millis() as u64).saturating_mul(1u64 << exponent);
        let capped_ms = base_ms.min(BACKOFF_CAP.as_millis() as u64);
        let jitter = 0.8 + 0.4 * jitter_unit.clamp(0.0, 1.0);
        Duration::from_millis((capped_ms as f64 * jitter) as u64)
    }

    /// Resets the sequence, e.g. after a successful handshake.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads exactly one length-prefixed envelope from `stream`.
///
/// The outer 4-byte big-endian length is transport framing, applied here
/// and nowhere inside the codec crate.
pub async fn read_envelope(stream: &mut TcpStream) -> std::io::Result<Envelope> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds maximum of {MAX_FRAME_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Envelope::decode(&buf).map_err(codec_error_to_io)
}

/// Writes one envelope to `stream`, length-prefixed.
pub async fn write_envelope(stream: &mut TcpStream, envelope: &Envelope) -> std::io::Result<()> {
    let bytes = envelope.encode().map_err(codec_error_to_io)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "envelope too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

fn codec_error_to_io(err: CodecError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}
