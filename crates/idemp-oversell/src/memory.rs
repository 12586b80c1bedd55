//! In-process stock counters, for tests and single-instance deployments
//! where a shared backend isn't warranted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use idemp_types::Result;

use crate::{DecrementOutcome, StockBackend};

/// A `resource_id -> count` map guarded by a single mutex. Fine for tests
/// and single-process deployments; concurrent multi-process callers need
/// [`crate::RedisStockBackend`].
#[derive(Default)]
pub struct InMemoryStockBackend {
    counters: Mutex<HashMap<String, i64>>,
}

impl InMemoryStockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds (or overwrites) the counter for `resource_id`.
    pub fn seed(&self, resource_id: impl Into<String>, quantity: i64) {
        self.counters.lock().unwrap().insert(resource_id.into(), quantity);
    }
}

#[async_trait]
impl StockBackend for InMemoryStockBackend {
    async fn decrement_if_sufficient(&self, resource_id: &str, quantity: u64) -> Result<DecrementOutcome> {
        let mut counters = self.counters.lock().unwrap();
        let Some(count) = counters.get_mut(resource_id) else {
            return Ok(DecrementOutcome::Unknown);
        };
        if *count < quantity as i64 {
            return Ok(DecrementOutcome::Insufficient);
        }
        *count -= quantity as i64;
        Ok(DecrementOutcome::Decremented(*count))
    }

    async fn restock(&self, resource_id: &str, quantity: u64) -> Result<()> {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(resource_id.to_string()).or_insert(0) += quantity as i64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_counter_decrements_and_refuses_overdraw() {
        let backend = InMemoryStockBackend::new();
        backend.seed("sku-1", 5);
        assert_eq!(
            backend.decrement_if_sufficient("sku-1", 3).await.unwrap(),
            DecrementOutcome::Decremented(2)
        );
        assert_eq!(
            backend.decrement_if_sufficient("sku-1", 10).await.unwrap(),
            DecrementOutcome::Insufficient
        );
    }

    #[tokio::test]
    async fn unknown_resource_is_reported() {
        let backend = InMemoryStockBackend::new();
        assert_eq!(
            backend.decrement_if_sufficient("missing", 1).await.unwrap(),
            DecrementOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn restock_credits_the_counter() {
        let backend = InMemoryStockBackend::new();
        backend.seed("sku-1", 2);
        backend.decrement_if_sufficient("sku-1", 2).await.unwrap();
        backend.restock("sku-1", 2).await.unwrap();
        assert_eq!(
            backend.decrement_if_sufficient("sku-1", 2).await.unwrap(),
            DecrementOutcome::Decremented(0)
        );
    }
}
