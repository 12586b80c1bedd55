//! Durable `key -> record` storage for request-level idempotency, behind a
//! single async trait implemented by an in-memory map, a Redis-backed
//! store, a Postgres table, and a generic cache wrapper.

mod cache;
mod envelope;
mod memory;
mod postgres;
mod redis_store;

pub use cache::{CacheService, CacheStorage};
pub use envelope::{EnvelopeError, decode, encode};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use redis_store::RedisStorage;

use std::collections::HashMap;

use async_trait::async_trait;
use idemp_types::{IdempotencyError, Result, StoredRecord};

/// Uniform contract every storage backend implements.
///
/// `put` is the only operation that must be atomic create-if-absent; every
/// other operation may be built from it without additional coordination.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts `record` under `key` iff no unexpired record exists there.
    /// Returns `true` on first insert, `false` if a live record already
    /// occupied the slot (never overwrites it).
    async fn put(&self, key: &str, record: &StoredRecord, ttl_secs: u64) -> Result<bool>;

    /// Returns the live record for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Cheap liveness check, consistent with `get` modulo a race on expiry.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes `key` unconditionally; `true` iff a live record was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Bulk `get`; keys with no live record are omitted from the result.
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, StoredRecord>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get(key).await? {
                out.insert(key.clone(), record);
            }
        }
        Ok(out)
    }

    /// Removes up to `batch_max` expired records, returning the count removed.
    async fn cleanup(&self, batch_max: usize) -> Result<usize>;
}

fn backend_err(err: impl std::fmt::Display) -> IdempotencyError {
    IdempotencyError::backend(anyhow::anyhow!("{err}"))
}
