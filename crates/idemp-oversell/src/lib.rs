//! Guards a checkout-style handler against overselling a finite resource.
//!
//! The decrement is a single atomic script against a `StockBackend` counter:
//! unknown resource and insufficient stock are distinguished so the caller
//! can return a precise [`OverSellReason`]. A non-2xx downstream response
//! releases the reservation via the compensating `restock` hook.

mod memory;
mod redis_backend;

pub use memory::InMemoryStockBackend;
pub use redis_backend::RedisStockBackend;

use async_trait::async_trait;
use idemp_types::{IdempotencyError, OverSellReason, Result};

/// Outcome of an atomic decrement attempt against a stock counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Decrement applied; the counter's new value.
    Decremented(i64),
    /// The counter held fewer units than requested.
    Insufficient,
    /// No counter exists for the resource.
    Unknown,
}

/// A small abstraction over whatever keeps the stock counters, so the guard
/// is not hard-wired to a single backend.
#[async_trait]
pub trait StockBackend: Send + Sync {
    async fn decrement_if_sufficient(&self, resource_id: &str, quantity: u64) -> Result<DecrementOutcome>;
    async fn restock(&self, resource_id: &str, quantity: u64) -> Result<()>;
}

/// Attempts to reserve `quantity` units of `resource_id`, mapping backend
/// outcomes to the idempotency error taxonomy's `OverSell` variant.
pub async fn reserve(
    backend: &dyn StockBackend,
    resource_id: &str,
    quantity: u64,
) -> Result<i64> {
    match backend.decrement_if_sufficient(resource_id, quantity).await? {
        DecrementOutcome::Decremented(remaining) => Ok(remaining),
        DecrementOutcome::Insufficient => {
            Err(IdempotencyError::OverSell(OverSellReason::InsufficientStock))
        }
        DecrementOutcome::Unknown => {
            Err(IdempotencyError::OverSell(OverSellReason::UnknownResource))
        }
    }
}

/// Releases a reservation made by [`reserve`] — the post-hook run when the
/// downstream handler's response was not 2xx.
pub async fn release(backend: &dyn StockBackend, resource_id: &str, quantity: u64) -> Result<()> {
    backend.restock(resource_id, quantity).await
}
