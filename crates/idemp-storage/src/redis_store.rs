//! Redis-backed storage. `put` is a single Lua script so the
//! exists-check/set/expire sequence is atomic from Redis's point of view;
//! a secondary sorted set indexes keys by creation time to drive `cleanup`.

use async_trait::async_trait;
use idemp_types::{Result, StoredRecord};
use redis::AsyncCommands;
use redis::Script;
use tokio::sync::Mutex;

use crate::backend_err;
use crate::envelope;
use crate::Storage;

/// `EXISTS` guards the write so a concurrent writer never overwrites a live
/// record; callers read the return discriminant to tell which branch fired.
const PUT_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return 0
end
redis.call("SET", KEYS[1], ARGV[1])
redis.call("EXPIRE", KEYS[1], ARGV[2])
redis.call("ZADD", KEYS[2], ARGV[3], KEYS[1])
if tonumber(ARGV[4]) > 0 then
    redis.call("ZREMRANGEBYRANK", KEYS[2], 0, -tonumber(ARGV[4]) - 1)
end
return 1
"#;

pub struct RedisStorage {
    namespace: String,
    connection: Mutex<redis::aio::ConnectionManager>,
    put_script: Script,
    compress: bool,
    index_cap: usize,
}

impl RedisStorage {
    pub async fn connect(url: &str, namespace: impl Into<String>, compress: bool) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(backend_err)?;
        Ok(Self {
            namespace: namespace.into(),
            connection: Mutex::new(manager),
            put_script: Script::new(PUT_SCRIPT),
            compress,
            index_cap: 100_000,
        })
    }

    /// Overrides the sorted-set cleanup index's cap (default 100,000 keys).
    pub fn with_index_cap(mut self, cap: usize) -> Self {
        self.index_cap = cap;
        self
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}:idemp:{key}", self.namespace)
    }

    fn index_key(&self) -> String {
        format!("{}:idemp:index", self.namespace)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn put(&self, key: &str, record: &StoredRecord, ttl_secs: u64) -> Result<bool> {
        let payload = envelope::encode(record, self.compress).map_err(backend_err)?;
        let mut conn = self.connection.lock().await;
        let result: i64 = self
            .put_script
            .key(self.record_key(key))
            .key(self.index_key())
            .arg(payload)
            .arg(ttl_secs.max(1))
            .arg(record.created_at)
            .arg(self.index_cap as i64)
            .invoke_async(&mut *conn)
            .await
            .map_err(backend_err)?;
        Ok(result == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let mut conn = self.connection.lock().await;
        let payload: Option<Vec<u8>> = conn
            .get(self.record_key(key))
            .await
            .map_err(backend_err)?;
        match payload {
            Some(bytes) => Ok(Some(envelope::decode(&bytes).map_err(backend_err)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let record_key = self.record_key(key);
        let removed: i64 = redis::pipe()
            .atomic()
            .del(&record_key)
            .zrem(self.index_key(), &record_key)
            .query_async::<Vec<i64>>(&mut *conn)
            .await
            .map_err(backend_err)?
            .first()
            .copied()
            .unwrap_or(0);
        Ok(removed > 0)
    }

    async fn cleanup(&self, batch_max: usize) -> Result<usize> {
        let mut conn = self.connection.lock().await;
        let candidates: Vec<String> = conn
            .zrange(self.index_key(), 0, batch_max.max(1) as isize - 1)
            .await
            .map_err(backend_err)?;
        let mut removed = 0usize;
        for record_key in candidates {
            let existed: bool = conn.exists(&record_key).await.map_err(backend_err)?;
            if !existed {
                let _: () = conn
                    .zrem(self.index_key(), &record_key)
                    .await
                    .map_err(backend_err)?;
                removed += 1;
            }
        }
        idemp_telemetry::record_counter(
            "storage_cleanup_deleted",
            removed as u64,
            &idemp_telemetry::MetricLabels::default().backend("redis"),
        );
        Ok(removed)
    }
}
