//! In-process storage backend: the default when no external backend is
//! configured, and the workhorse for tests.

use async_trait::async_trait;
use dashmap::DashMap;
use idemp_types::{Result, StoredRecord};
use time::OffsetDateTime;

use crate::Storage;

/// A `DashMap`-backed store. `put` is atomic via `entry()`, which holds a
/// shard lock for the duration of the expiry check + insert.
#[derive(Default)]
pub struct InMemoryStorage {
    records: DashMap<String, StoredRecord>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put(&self, key: &str, record: &StoredRecord, _ttl_secs: u64) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        match self.records.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().is_live(now) {
                    Ok(false)
                } else {
                    entry.insert(record.clone());
                    Ok(true)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .get(key)
            .filter(|r| r.is_live(now))
            .map(|r| r.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .remove_if(key, |_, r| r.is_live(now))
            .is_some())
    }

    async fn cleanup(&self, batch_max: usize) -> Result<usize> {
        let now = OffsetDateTime::now_utc();
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| !entry.value().is_live(now))
            .take(batch_max)
            .map(|entry| entry.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.records.remove(&key);
        }
        idemp_telemetry::record_counter(
            "storage_cleanup_deleted",
            count as u64,
            &idemp_telemetry::MetricLabels::default().backend("memory"),
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idemp_types::StoredRecord;

    fn record(ttl_secs: i64) -> StoredRecord {
        let now = OffsetDateTime::now_utc();
        StoredRecord::capture(200, b"ok".to_vec(), vec![], now, ttl_secs.max(0) as u64)
    }

    #[tokio::test]
    async fn put_is_create_if_absent() {
        let storage = InMemoryStorage::new();
        assert!(storage.put("k", &record(60), 60).await.unwrap());
        assert!(!storage.put("k", &record(60), 60).await.unwrap());
    }

    #[tokio::test]
    async fn get_omits_expired_records() {
        let storage = InMemoryStorage::new();
        storage.put("k", &record(0), 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_slot_can_be_reclaimed_by_put() {
        let storage = InMemoryStorage::new();
        storage.put("k", &record(0), 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(storage.put("k", &record(60), 60).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let storage = InMemoryStorage::new();
        storage.put("expired", &record(0), 0).await.unwrap();
        storage.put("live", &record(60), 60).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let removed = storage.cleanup(10).await.unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_live_record_was_removed() {
        let storage = InMemoryStorage::new();
        assert!(!storage.delete("missing").await.unwrap());
        storage.put("k", &record(60), 60).await.unwrap();
        assert!(storage.delete("k").await.unwrap());
    }
}
