//! Time-indexed frame cache.
//!
//! Keyed by the decimal string form of the frame id, per the data model:
//! raw frame bytes plus capture metadata, expiring after a configurable
//! TTL. The cache is shared between the feeder (the sole writer) and the
//! ingest path (a reader, looking up a frame after a `Result` arrives), so
//! it needs interior synchronization but only ever one writer at a time —
//! the same `Arc<Mutex<Inner>>` "clone shares state" shape `KeyPackageRegistry`
//! uses for its own shared, externally-read registry.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use edgeinfer_proto::{CodecKind, PixelFormat, PlaneDescriptor};

use crate::env::Environment;

/// Default time-to-live for a cached frame entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

/// Capture metadata recorded alongside a cached frame's raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetadata {
    /// Pixel format of the cached bytes.
    pub pixel_format: PixelFormat,
    /// Codec the cached bytes are encoded with.
    pub codec: CodecKind,
    /// Plane layout of the cached bytes.
    pub planes: Vec<PlaneDescriptor>,
    /// Monotonic capture timestamp, nanoseconds.
    pub mono_ns: u64,
    /// Presentation timestamp, nanoseconds.
    pub pts_ns: u64,
    /// Wall-clock capture timestamp, nanoseconds since Unix epoch.
    pub wall_ns: u64,
    /// Upstream recording correlation id.
    pub session_id: String,
}

struct Entry<I> {
    bytes: Bytes,
    metadata: CacheMetadata,
    inserted_at: I,
}

struct Inner<I> {
    entries: HashMap<String, Entry<I>>,
    // FIFO order of insertions. Because TTL expiry is monotonic in
    // insertion time, the front of this queue is always the next entry
    // due to expire, giving amortized O(1) sweep cost per cache operation
    // instead of a full scan.
    order: VecDeque<(I, String)>,
}

/// Shared, TTL-expiring map from frame id (as a decimal string) to cached
/// frame bytes and metadata. Cloning a [`FrameCache`] shares the same
/// underlying storage.
pub struct FrameCache<E: Environment> {
    env: E,
    ttl: Duration,
    inner: Arc<Mutex<Inner<E::Instant>>>,
}

impl<E: Environment> Clone for FrameCache<E>
where
    E: Clone,
{
    fn clone(&self) -> Self {
        Self { env: self.env.clone(), ttl: self.ttl, inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> FrameCache<E>
where
    E::Instant: CheckedSub,
{
    /// Builds an empty cache with the given TTL.
    pub fn new(env: E, ttl: Duration) -> Self {
        Self { env, ttl, inner: Arc::new(Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new() })) }
    }

    /// Inserts or replaces the entry for `frame_id`. Unconditional: a
    /// re-insert of the same key replaces the prior entry outright.
    pub fn set(&self, frame_id: u64, bytes: Bytes, metadata: CacheMetadata) {
        let key = frame_id.to_string();
        let now = self.env.now();
        let mut inner = self.inner.lock().expect("frame cache mutex poisoned");
        inner.entries.insert(key.clone(), Entry { bytes, metadata, inserted_at: now });
        inner.order.push_back((now, key));
        self.sweep_locked(&mut inner);
    }

    /// Looks up `frame_id`. Entries older than the TTL are treated as
    /// absent even if a background sweep has not yet physically removed
    /// them, and looking one up opportunistically sweeps it out.
    #[must_use]
    pub fn get(&self, frame_id: u64) -> Option<(Bytes, CacheMetadata)> {
        let key = frame_id.to_string();
        let now = self.env.now();
        let mut inner = self.inner.lock().expect("frame cache mutex poisoned");
        self.sweep_locked(&mut inner);
        inner.entries.get(&key).and_then(|entry| {
            if Self::expired(entry.inserted_at, now, self.ttl) {
                None
            } else {
                Some((entry.bytes.clone(), entry.metadata.clone()))
            }
        })
    }

    /// Number of entries currently stored, including any not yet swept
    /// that are logically expired. Exposed for tests and metrics only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("frame cache mutex poisoned").entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expired(inserted_at: E::Instant, now: E::Instant, ttl: Duration) -> bool {
        match now.checked_sub_instant(inserted_at) {
            Some(elapsed) => elapsed >= ttl,
            None => false,
        }
    }

    fn sweep_locked(&self, inner: &mut Inner<E::Instant>) {
        let now = self.env.now();
        while let Some((inserted_at, _key)) = inner.order.front() {
            if !Self::expired(*inserted_at, now, self.ttl) {
                break;
            }
            let (inserted_at, key) = inner.order.pop_front().expect("front just peeked as Some");
            // Only remove the map entry if it still matches this exact
            // insertion: a later `set` for the same frame id pushed a
            // fresh order entry, and this stale one must not evict it.
            if let Some(current) = inner.entries.get(&key) {
                if Self::instant_eq(current.inserted_at, inserted_at) {
                    inner.entries.remove(&key);
                }
            }
        }
    }

    fn instant_eq(a: E::Instant, b: E::Instant) -> bool {
        a == b
    }
}

/// Helper trait bridging `Environment::Instant`'s `Ord` bound to a
/// checked-duration-since operation, since `Instant` types differ in
/// concrete representation (`std::time::Instant` vs. the simulation clock).
pub trait CheckedSub: Copy + Ord {
    /// Duration elapsed between `self` (later) and `earlier`, or `None` if
    /// `earlier` is actually later than `self`.
    fn checked_sub_instant(self, earlier: Self) -> Option<Duration>;
}

impl CheckedSub for std::time::Instant {
    fn checked_sub_instant(self, earlier: Self) -> Option<Duration> {
        self.checked_duration_since(earlier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_env::SimEnv;

    fn metadata() -> CacheMetadata {
        CacheMetadata {
            pixel_format: PixelFormat::Nv12,
            codec: CodecKind::None,
            planes: vec![],
            mono_ns: 0,
            pts_ns: 0,
            wall_ns: 0,
            session_id: "rec".to_string(),
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = FrameCache::new(SimEnv::new(1), Duration::from_secs(2));
        cache.set(42, Bytes::from_static(b"frame-bytes"), metadata());
        let (bytes, meta) = cache.get(42).expect("entry should be present before TTL");
        assert_eq!(bytes, Bytes::from_static(b"frame-bytes"));
        assert_eq!(meta.session_id, "rec");
    }

    #[test]
    fn entry_expires_after_ttl() {
        let env = SimEnv::new(1);
        let cache = FrameCache::new(env.clone(), Duration::from_secs(2));
        cache.set(1, Bytes::from_static(b"a"), metadata());
        env.advance(Duration::from_secs(3));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn reinsert_replaces_prior_entry() {
        let cache = FrameCache::new(SimEnv::new(1), Duration::from_secs(2));
        cache.set(1, Bytes::from_static(b"first"), metadata());
        cache.set(1, Bytes::from_static(b"second"), metadata());
        let (bytes, _) = cache.get(1).unwrap();
        assert_eq!(bytes, Bytes::from_static(b"second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_sweeps_expired_entries() {
        let env = SimEnv::new(1);
        let cache = FrameCache::new(env.clone(), Duration::from_secs(2));
        cache.set(1, Bytes::from_static(b"a"), metadata());
        env.advance(Duration::from_secs(3));
        cache.set(2, Bytes::from_static(b"b"), metadata());
        assert!(cache.get(1).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_miss_for_absent_frame_is_not_an_error() {
        let cache = FrameCache::new(SimEnv::new(1), Duration::from_secs(2));
        assert!(cache.get(999).is_none());
    }
}
