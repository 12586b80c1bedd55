//! Two-tier "recently seen" cache sitting in front of the durable storage
//! lookup. Semantics are positive-only: a hit means "skip straight to
//! storage.get, a record exists or was just written"; a miss means nothing
//! ("consult storage") — it is never used to prove absence.
//!
//! Tier one is a per-request in-process set, cheap and exact for a single
//! process's own retries. Tier two is a shared cache with a tiny TTL,
//! generalizing the seen-set-with-TTL pattern already used for webhook
//! dedup elsewhere in this workspace to a `warm()`-able two-tier cache.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The shared, short-TTL tier. Cheap to construct per `Interceptor`; does
/// not itself talk to any backend.
pub struct HotCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashSet<String>,
    order: Vec<(String, Instant)>,
}

impl HotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: HashSet::new(),
                order: Vec::new(),
            }),
        }
    }

    fn evict_expired(&self, inner: &mut Inner, now: Instant) {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        inner.order.retain(|(key, seen_at)| {
            if now.duration_since(*seen_at) > ttl {
                expired.push(key.clone());
                false
            } else {
                true
            }
        });
        for key in expired {
            inner.entries.remove(&key);
        }
    }

    /// Positive-only membership check: `true` means "likely present, go
    /// straight to storage.get"; `false` means "no information".
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut inner, now);
        inner.entries.contains(key)
    }

    /// Marks `key` as recently seen, called after a successful store.
    pub fn warm(&self, key: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut inner, now);
        if inner.entries.insert(key.to_string()) {
            inner.order.push((key.to_string(), now));
        }
    }
}

/// The per-request tier: exact membership for keys already observed within
/// this single process call chain, with no TTL (it lives exactly as long as
/// the request that owns it).
#[derive(Default)]
pub struct RequestScopedSeen {
    seen: HashSet<String>,
}

impl RequestScopedSeen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn warm(&mut self, key: &str) {
        self.seen.insert(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_carries_no_information() {
        let cache = HotCache::new(Duration::from_secs(5));
        assert!(!cache.contains("k"));
    }

    #[test]
    fn warm_then_hit() {
        let cache = HotCache::new(Duration::from_secs(5));
        cache.warm("k");
        assert!(cache.contains("k"));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = HotCache::new(Duration::from_millis(10));
        cache.warm("k");
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.contains("k"));
    }

    #[test]
    fn request_scoped_seen_is_exact_within_the_request() {
        let mut seen = RequestScopedSeen::new();
        assert!(!seen.contains("k"));
        seen.warm("k");
        assert!(seen.contains("k"));
    }
}
