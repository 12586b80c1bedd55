//! Per-key distributed locks guarding the critical section between
//! "no record yet" and "record written" in the idempotency interceptor.

mod filesystem;
mod redis_lock;

pub use filesystem::{FileSystemLock, LockMode};
pub use redis_lock::RedisLock;

use async_trait::async_trait;
use idemp_types::{IdempotencyError, LockToken, Result};

/// Uniform contract every lock backend implements. Locks self-expire by
/// `ttl`; holders never renew.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Non-blocking. `Some(token)` iff the caller now holds the lock.
    async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<Option<LockToken>>;

    /// Releases iff `token` matches the one handed out at acquisition.
    /// Never releases someone else's lock.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool>;

    /// Observational; may race with a concurrent acquire/release.
    async fn is_locked(&self, key: &str) -> Result<bool>;

    /// All-or-nothing: if any key cannot be acquired, every lock already
    /// acquired in this call is released before returning `None`.
    async fn acquire_all(&self, keys: &[String], ttl_secs: u64) -> Result<Option<Vec<LockToken>>> {
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            match self.acquire(key, ttl_secs).await? {
                Some(token) => held.push((key.clone(), token)),
                None => {
                    for (held_key, token) in &held {
                        let _ = self.release(held_key, token).await;
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(held.into_iter().map(|(_, token)| token).collect()))
    }

    async fn release_all(&self, keys: &[String], tokens: &[LockToken]) -> Result<()> {
        if keys.len() != tokens.len() {
            return Err(IdempotencyError::Programmer(
                "release_all: keys and tokens must have equal length".into(),
            ));
        }
        for (key, token) in keys.iter().zip(tokens) {
            let _ = self.release(key, token).await?;
        }
        Ok(())
    }
}

fn backend_err(err: impl std::fmt::Display) -> IdempotencyError {
    IdempotencyError::backend(anyhow::anyhow!("{err}"))
}
