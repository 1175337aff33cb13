//! Deterministic [`Environment`] for tests.
//!
//! `SimEnv` never touches the wall clock or an OS RNG: its clock only moves
//! when the test calls [`SimEnv::advance`], and its randomness comes from a
//! seeded PRNG. This lets protocol tests exercise handshake timeouts,
//! heartbeat intervals, and backoff schedules without actually waiting.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::env::Environment;

/// A virtual instant: nanoseconds since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(u128);

impl crate::cache::CheckedSub for SimInstant {
    fn checked_sub_instant(self, earlier: Self) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(|ns| Duration::from_nanos(ns as u64))
    }
}

struct Inner {
    now_ns: u128,
    rng: StdRng,
}

/// Deterministic, manually-advanced [`Environment`].
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<Mutex<Inner>>,
}

impl SimEnv {
    /// Builds a new simulation clock starting at zero, seeded with `seed`
    /// for reproducible random draws.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { now_ns: 0, rng: StdRng::seed_from_u64(seed) })) }
    }

    /// Moves the virtual clock forward by `duration`. Any `sleep` calls
    /// whose deadline has now passed become ready on their next poll.
    pub fn advance(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("SimEnv mutex poisoned");
        inner.now_ns += duration.as_nanos();
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> Self::Instant {
        SimInstant(self.inner.lock().expect("SimEnv mutex poisoned").now_ns)
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        // The simulation has no background timer: sleeping simply records
        // that the clock must move forward by at least `duration` before
        // the caller proceeds, which the test drives via `advance`.
        let deadline = self.now().0 + duration.as_nanos();
        let inner = self.inner.clone();
        async move {
            while inner.lock().expect("SimEnv mutex poisoned").now_ns < deadline {
                tokio::task::yield_now().await;
            }
        }
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        self.inner.lock().expect("SimEnv mutex poisoned").rng.fill(buf);
    }
}
