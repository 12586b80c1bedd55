//! The framework-agnostic request-interception state machine described by
//! `EXTRACT_KEY -> VALIDATE -> HOT_CHECK -> ACQUIRE_LOCK -> STORAGE_GET ->
//! OVERSELL_GUARD -> HANDLER_EXECUTE -> CAPTURE -> STORE -> RELEASE_LOCK`.

use std::future::Future;
use std::sync::Arc;

use idemp_lock::Lock;
use idemp_oversell::{self as oversell, StockBackend};
use idemp_storage::Storage;
use idemp_types::{IdempotencyError, LockToken, Result, StoredRecord};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{InterceptorConfig, Mode};
use crate::facade::{CapturedResponse, IdempotentRequest};
use crate::hot_cache::{HotCache, RequestScopedSeen};

/// The outcome of running a request through the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A previously stored record was returned verbatim (plus the replay
    /// headers).
    Replayed(CapturedResponse),
    /// The handler ran and its response was captured (and possibly stored).
    Executed(CapturedResponse),
    /// No idempotency key and `Mode::Optional`/`Mode::Lax`: handler ran
    /// without any replay protection.
    PassedThrough(CapturedResponse),
    /// The request was rejected before the handler ran.
    Rejected(IdempotencyError),
}

/// Releases its lock when dropped without an explicit `release()`, covering
/// handler panics and early returns. Because release is async and `Drop` is
/// not, the fallback spawns a detached best-effort task; the lock's TTL is
/// the actual recovery mechanism if that task never runs (e.g. runtime
/// shutdown).
struct LockGuard {
    lock: Arc<dyn Lock>,
    key: String,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.lock.release(&self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            if let Err(err) = lock.release(&key, &token).await {
                warn!(%key, %err, "best-effort lock release on drop failed");
            }
        });
    }
}

pub struct Interceptor {
    config: InterceptorConfig,
    storage: Arc<dyn Storage>,
    lock: Arc<dyn Lock>,
    hot_cache: HotCache,
    stock: Option<Arc<dyn StockBackend>>,
}

impl Interceptor {
    pub fn new(config: InterceptorConfig, storage: Arc<dyn Storage>, lock: Arc<dyn Lock>) -> Self {
        let hot_cache = HotCache::new(config.fast_cache_ttl);
        Self {
            config,
            storage,
            lock,
            hot_cache,
            stock: None,
        }
    }

    pub fn with_stock_backend(mut self, stock: Arc<dyn StockBackend>) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Runs `handler` through the full idempotency state machine.
    /// `handler` represents the opaque downstream business logic.
    pub async fn process<H, Fut>(&self, request: IdempotentRequest, handler: H) -> Outcome
    where
        H: FnOnce() -> Fut,
        Fut: Future<Output = CapturedResponse>,
    {
        // EXTRACT_KEY
        let raw_key = match request.key() {
            Some(k) => k.to_string(),
            None => {
                return match self.config.mode {
                    Mode::Strict => Outcome::Rejected(IdempotencyError::InvalidKey(
                        idemp_types::KeyValidationError::Empty,
                    )),
                    Mode::Optional | Mode::Lax => Outcome::PassedThrough(handler().await),
                };
            }
        };

        // VALIDATE
        let normalized = idemp_types::normalize(&raw_key);
        let key = match idemp_types::validate(&normalized) {
            Ok(()) => normalized,
            Err(err) => return Outcome::Rejected(IdempotencyError::InvalidKey(err)),
        };

        // HOT_CHECK
        let mut seen = RequestScopedSeen::new();
        if self.config.use_fast_cache && self.check_hot(&key, &mut seen) {
            if let Some(outcome) = self.try_restore(&key).await {
                return outcome;
            }
            // Hot cache is positive-only; a stale hit with no backing
            // record just falls through to the normal path below.
        }

        // ACQUIRE_LOCK
        let guard = match self.acquire_with_retries(&key, &mut seen).await {
            LockAttempt::Acquired(guard) => guard,
            LockAttempt::BecameReplayable => {
                if let Some(outcome) = self.try_restore(&key).await {
                    return outcome;
                }
                return Outcome::Rejected(IdempotencyError::concurrent(
                    key,
                    self.config.lock_retry_delay.as_secs().max(1),
                ));
            }
            LockAttempt::Unavailable => {
                info!(%key, "lock contention exhausted retry budget");
                idemp_telemetry::record_counter(
                    "idempotency_lock_contention",
                    1,
                    &idemp_telemetry::MetricLabels::default(),
                );
                return Outcome::Rejected(IdempotencyError::concurrent(
                    key,
                    self.config.lock_retry_delay.as_secs().max(1),
                ));
            }
        };

        // STORAGE_GET
        match self.storage.get(&key).await {
            Ok(Some(record)) => {
                self.hot_cache.warm(&key);
                let _ = guard.release().await;
                idemp_telemetry::record_counter(
                    "idempotency_hit",
                    1,
                    &idemp_telemetry::MetricLabels::default().outcome("replay"),
                );
                info!(
                    %key,
                    body = %loggable_body(&record.body),
                    "replaying stored idempotent response"
                );
                return Outcome::Replayed(self.restore(&key, &record));
            }
            Ok(None) => {}
            Err(err) => {
                let _ = guard.release().await;
                return Outcome::Rejected(err);
            }
        }
        idemp_telemetry::record_counter(
            "idempotency_miss",
            1,
            &idemp_telemetry::MetricLabels::default(),
        );

        // OVERSELL_GUARD
        if self.config.oversell_protection {
            if let (Some(resource_id), Some(quantity)) = (&request.resource_id, request.quantity) {
                if let Some(stock) = &self.stock {
                    if let Err(err) = oversell::reserve(stock.as_ref(), resource_id, quantity).await {
                        idemp_telemetry::record_counter(
                            "oversell_rejected",
                            1,
                            &idemp_telemetry::MetricLabels::default(),
                        );
                        let _ = guard.release().await;
                        return Outcome::Rejected(err);
                    }
                }
            }
        }

        // HANDLER_EXECUTE
        let response = handler().await;

        // CAPTURE + STORE
        if self.config.mode.stores_on_success() && StoredRecord::capturable_status(response.status) {
            let record = StoredRecord::capture(
                response.status,
                response.body.clone(),
                response.headers.clone(),
                OffsetDateTime::now_utc(),
                self.config.ttl.as_secs(),
            );
            match self.storage.put(&key, &record, self.config.ttl.as_secs()).await {
                Ok(true) => {
                    self.hot_cache.warm(&key);
                    info!(
                        %key,
                        body = %loggable_body(&record.body),
                        "captured response for idempotency key"
                    );
                }
                Ok(false) => {
                    // Lost a race with a concurrent writer; nothing to do,
                    // the client already has this handler's own response.
                }
                Err(err) => warn!(%key, %err, "failed to persist idempotency record"),
            }
        } else if self.config.oversell_protection && !is_success(response.status) {
            if let (Some(resource_id), Some(quantity), Some(stock)) =
                (&request.resource_id, request.quantity, &self.stock)
            {
                if let Err(err) = oversell::release(stock.as_ref(), resource_id, quantity).await {
                    warn!(%resource_id, %err, "failed to restock after non-2xx response");
                }
            }
        }

        // RELEASE_LOCK
        let _ = guard.release().await;
        Outcome::Executed(response)
    }

    /// Consults both hot-cache tiers: the exact per-request set first (no
    /// lock/TTL bookkeeping), falling back to the shared TTL tier and
    /// warming the per-request set on a hit so a later call in the same
    /// request doesn't repeat the shared-tier lookup.
    fn check_hot(&self, key: &str, seen: &mut RequestScopedSeen) -> bool {
        if seen.contains(key) {
            return true;
        }
        if self.hot_cache.contains(key) {
            seen.warm(key);
            return true;
        }
        false
    }

    async fn acquire_with_retries(&self, key: &str, seen: &mut RequestScopedSeen) -> LockAttempt {
        for _attempt in 0..self.config.max_lock_attempts.max(1) {
            match self.lock.acquire(key, self.config.lock_ttl.as_secs()).await {
                Ok(Some(token)) => {
                    return LockAttempt::Acquired(LockGuard {
                        lock: self.lock.clone(),
                        key: key.to_string(),
                        token,
                        released: false,
                    });
                }
                Ok(None) => {
                    if self.config.use_fast_cache && self.check_hot(key, seen) {
                        // The lock holder finished and stored a record
                        // while we were contending for the lock.
                        return LockAttempt::BecameReplayable;
                    }
                    tokio::time::sleep(self.config.lock_retry_delay).await;
                }
                Err(err) => {
                    warn!(%key, %err, "lock backend error during acquire");
                    return LockAttempt::Unavailable;
                }
            }
        }
        LockAttempt::Unavailable
    }

    async fn try_restore(&self, key: &str) -> Option<Outcome> {
        match self.storage.get(key).await {
            Ok(Some(record)) => {
                info!(
                    key = %key,
                    body = %loggable_body(&record.body),
                    "replaying stored idempotent response from hot cache hit"
                );
                Some(Outcome::Replayed(self.restore(key, &record)))
            }
            _ => None,
        }
    }

    fn restore(&self, key: &str, record: &StoredRecord) -> CapturedResponse {
        let mut headers: Vec<(String, String)> = record
            .headers
            .iter()
            .filter(|(name, _)| {
                !idemp_types::STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
            })
            .cloned()
            .collect();
        headers.push(("x-idempotent-response".to_string(), "true".to_string()));
        headers.push(("x-idempotency-key".to_string(), key.to_string()));
        if self.config.include_created_at_header {
            headers.push(("x-created-at".to_string(), record.created_at.to_string()));
        }
        CapturedResponse {
            status: record.status,
            body: record.body.clone(),
            headers,
        }
    }
}

enum LockAttempt {
    Acquired(LockGuard),
    /// The retry loop found a replayable record in the hot cache before the
    /// lock ever freed up.
    BecameReplayable,
    Unavailable,
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Parses a captured body as JSON for masked logging, falling back to a
/// placeholder for non-JSON bodies rather than emitting raw bytes.
fn loggable_body(bytes: &[u8]) -> serde_json::Value {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => idemp_filter::strip_for_log(&value),
        Err(_) => serde_json::Value::String("<non-json body>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idemp_storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TestFsLock {
        locks: idemp_lock::FileSystemLock,
    }

    #[async_trait::async_trait]
    impl Lock for TestFsLock {
        async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<Option<LockToken>> {
            self.locks.acquire(key, ttl_secs).await
        }

        async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
            self.locks.release(key, token).await
        }
    }

    fn interceptor(mode: Mode, dir: &std::path::Path) -> Interceptor {
        let mut config = InterceptorConfig::default();
        config.mode = mode;
        config.max_lock_attempts = 2;
        config.lock_retry_delay = Duration::from_millis(5);
        let storage = Arc::new(InMemoryStorage::new());
        let lock = Arc::new(TestFsLock {
            locks: idemp_lock::FileSystemLock::new(dir, idemp_lock::LockMode::Rename),
        });
        Interceptor::new(config, storage, lock)
    }

    #[tokio::test]
    async fn first_write_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = interceptor(Mode::Strict, dir.path());
        let calls = AtomicUsize::new(0);
        let request = IdempotentRequest {
            header_key: Some("k1".to_string()),
            ..Default::default()
        };

        let run = |req: IdempotentRequest| {
            let calls = &calls;
            interceptor.process(req, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                CapturedResponse::new(201, br#"{"order_id":42}"#.to_vec(), vec![])
            })
        };

        let first = run(request.clone()).await;
        assert!(matches!(first, Outcome::Executed(ref r) if r.status == 201));

        let second = run(request).await;
        match second {
            Outcome::Replayed(r) => {
                assert_eq!(r.status, 201);
                assert!(r.headers.iter().any(|(n, v)| n == "x-idempotent-response" && v == "true"));
            }
            other => panic!("expected replay, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn strict_mode_rejects_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = interceptor(Mode::Strict, dir.path());
        let outcome = interceptor
            .process(IdempotentRequest::default(), || async {
                CapturedResponse::new(200, Vec::new(), vec![])
            })
            .await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(IdempotencyError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn optional_mode_passes_through_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = interceptor(Mode::Optional, dir.path());
        let outcome = interceptor
            .process(IdempotentRequest::default(), || async {
                CapturedResponse::new(200, b"ok".to_vec(), vec![])
            })
            .await;
        assert!(matches!(outcome, Outcome::PassedThrough(_)));
    }

    #[tokio::test]
    async fn lax_mode_never_stores_successful_responses() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = interceptor(Mode::Lax, dir.path());
        let request = IdempotentRequest {
            header_key: Some("k-lax".to_string()),
            ..Default::default()
        };
        let calls = AtomicUsize::new(0);
        let run = |req: IdempotentRequest| {
            let calls = &calls;
            interceptor.process(req, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                CapturedResponse::new(200, b"ok".to_vec(), vec![])
            })
        };
        run(request.clone()).await;
        run(request).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_capturable_status_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = interceptor(Mode::Strict, dir.path());
        let request = IdempotentRequest {
            header_key: Some("k-fail".to_string()),
            ..Default::default()
        };
        let calls = AtomicUsize::new(0);
        let run = |req: IdempotentRequest| {
            let calls = &calls;
            interceptor.process(req, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                CapturedResponse::new(500, b"err".to_vec(), vec![])
            })
        };
        run(request.clone()).await;
        run(request).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
