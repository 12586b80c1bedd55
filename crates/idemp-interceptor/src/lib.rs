//! The request-level idempotency engine: a framework-agnostic state machine
//! (extract key -> validate -> hot-check -> lock -> storage check -> run
//! handler -> capture -> store -> release) plus a thin axum adapter.

mod axum_layer;
mod config;
mod engine;
mod facade;
mod hot_cache;

pub use axum_layer::idempotency_middleware;
pub use config::{InterceptorConfig, LockBackendKind, Mode, StorageBackendKind, UnknownBackendKind};
pub use engine::{Interceptor, Outcome};
pub use facade::{CapturedResponse, IdempotentRequest};
pub use hot_cache::{HotCache, RequestScopedSeen};
