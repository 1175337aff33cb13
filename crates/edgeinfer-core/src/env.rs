//! Runtime environment abstraction: clock, sleep, and randomness.
//!
//! Every component that needs wall-clock time, a delay, or random bytes
//! takes an `&impl Environment` instead of calling `std`/`tokio` directly.
//! Production code uses [`SystemEnv`]; tests use [`SimEnv`], which advances
//! its clock manually and draws from a seeded PRNG so protocol tests are
//! deterministic and fast regardless of real timeouts.

use std::future::Future;
use std::time::Duration;

/// Abstracts time and randomness so protocol logic can run identically in
/// production and in deterministic tests.
pub trait Environment: Send + Sync {
    /// An opaque monotonic instant. Only ever compared or subtracted, never
    /// constructed directly outside this trait.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug;

    /// The current monotonic instant.
    fn now(&self) -> Self::Instant;

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills `buf` with random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// A random `u64`, built from [`Environment::random_bytes`].
    fn random_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        self.random_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    /// A random `u128`, built from [`Environment::random_bytes`]. Used to
    /// generate stream ids with negligible collision probability.
    fn random_u128(&self) -> u128 {
        let mut buf = [0u8; 16];
        self.random_bytes(&mut buf);
        u128::from_le_bytes(buf)
    }
}

/// Production [`Environment`] backed by the system clock, `getrandom`, and
/// the Tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used, reason = "OS RNG failure is unrecoverable")]
    fn random_bytes(&self, buf: &mut [u8]) {
        getrandom::fill(buf)
            .expect("invariant: OS RNG failure is unrecoverable and indicates a broken host");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_env_time_advances() {
        let env = SystemEnv;
        let start = env.now();
        env.sleep(Duration::from_millis(5)).await;
        assert!(env.now() > start);
    }

    #[test]
    fn system_env_random_bytes_fills_buffer() {
        let env = SystemEnv;
        let mut buf = [0u8; 32];
        env.random_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn system_env_random_u64_varies() {
        let env = SystemEnv;
        let a = env.random_u64();
        let b = env.random_u64();
        assert_ne!(a, b, "two draws colliding is astronomically unlikely");
    }
}
