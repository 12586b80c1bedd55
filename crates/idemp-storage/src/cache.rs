//! A convenience backend over a generic key/value cache service.
//!
//! A generic cache has no atomic create-if-absent primitive, so
//! [`CacheStorage`] must never be relied on alone for correctness under
//! concurrency — pair it with an external lock backend. A corrupt or
//! undecodable cached value is surfaced as a `Backend` error rather than
//! silently treated as an empty record.

use async_trait::async_trait;
use idemp_types::{Result, StoredRecord};

use crate::backend_err;
use crate::envelope;
use crate::Storage;

/// The minimal shape a generic cache service must expose to back
/// [`CacheStorage`]. Implemented for anything from an in-process LRU to a
/// memcached client.
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn cache_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn cache_set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> anyhow::Result<()>;
    async fn cache_delete(&self, key: &str) -> anyhow::Result<bool>;
}

pub struct CacheStorage<C: CacheService> {
    cache: C,
    namespace: String,
    compress: bool,
}

impl<C: CacheService> CacheStorage<C> {
    pub fn new(cache: C, namespace: impl Into<String>, compress: bool) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
            compress,
        }
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:idemp:{key}", self.namespace)
    }
}

#[async_trait]
impl<C: CacheService> Storage for CacheStorage<C> {
    async fn put(&self, key: &str, record: &StoredRecord, ttl_secs: u64) -> Result<bool> {
        // No atomic create-if-absent in a generic cache: best-effort check
        // then set. Callers must hold an external lock around this call.
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        let payload = envelope::encode(record, self.compress).map_err(backend_err)?;
        self.cache
            .cache_set(&self.cache_key(key), payload, ttl_secs)
            .await
            .map_err(backend_err)?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let raw = self
            .cache
            .cache_get(&self.cache_key(key))
            .await
            .map_err(backend_err)?;
        match raw {
            Some(bytes) => Ok(Some(envelope::decode(&bytes).map_err(backend_err)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.cache
            .cache_delete(&self.cache_key(key))
            .await
            .map_err(backend_err)
    }

    async fn cleanup(&self, _batch_max: usize) -> Result<usize> {
        // A generic cache expires entries on its own; there is nothing for
        // the idempotency layer to sweep.
        Ok(0)
    }
}
