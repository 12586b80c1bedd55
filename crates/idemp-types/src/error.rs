//! The error taxonomy shared by every idempotency-guard crate.
//!
//! These are *kinds*, not storage- or lock-backend-specific types: a Redis
//! timeout and a Postgres deadlock both surface as [`IdempotencyError::Backend`].
//! The interceptor is the only place that maps a kind to an HTTP status.

use crate::key::KeyValidationError;

/// Why an oversell attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverSellReason {
    /// The stock counter does not exist for the requested resource.
    UnknownResource,
    /// The stock counter exists but holds fewer units than requested.
    InsufficientStock,
}

impl OverSellReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::UnknownResource => "Product not found",
            Self::InsufficientStock => "Insufficient stock",
        }
    }
}

/// Top-level error kind produced by any component in this crate family.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    /// Client-visible: the key failed validation. Maps to 400, never retried
    /// by the core.
    #[error("invalid idempotency key: {0}")]
    InvalidKey(#[from] KeyValidationError),

    /// The per-key lock could not be obtained within the retry budget. Maps
    /// to 429; safe for the client to retry with the same key.
    #[error("concurrent request detected for key {key}")]
    Concurrent { key: String, retry_after_secs: u64 },

    /// An inventory constraint was violated. Maps to 409.
    #[error("oversell rejected: {reason}", reason = .0.message())]
    OverSell(OverSellReason),

    /// A storage or lock backend failed transiently. Pre-execution, this
    /// maps to 5xx; post-execution (the write-back after a successful
    /// handler run) it is logged and swallowed rather than surfaced.
    #[error("backend error: {0}")]
    Backend(#[source] anyhow::Error),

    /// A backend does not conform to its contract, or configuration could
    /// not be resolved. Fatal at initialization, never per-request.
    #[error("misconfiguration: {0}")]
    Programmer(String),
}

impl IdempotencyError {
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        Self::Backend(err.into())
    }

    pub fn concurrent(key: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::Concurrent {
            key: key.into(),
            retry_after_secs,
        }
    }

    /// The HTTP status this error kind maps to, independent of mode.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidKey(_) => 400,
            Self::Concurrent { .. } => 429,
            Self::OverSell(_) => 409,
            Self::Backend(_) => 500,
            Self::Programmer(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, IdempotencyError>;
