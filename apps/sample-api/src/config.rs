//! Sample-app-level configuration: where to bind, and the backend
//! connection strings the interceptor's `InterceptorConfig::from_env`
//! selection needs once a non-memory backend is chosen.

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct SampleApiConfig {
    pub addr: SocketAddr,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

impl SampleApiConfig {
    pub fn from_env() -> Self {
        Self {
            addr: std::env::var("SAMPLE_API_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| "127.0.0.1:8080".parse().unwrap()),
            redis_url: std::env::var("IDEMPOTENCY_REDIS_URL").ok(),
            database_url: std::env::var("IDEMPOTENCY_DATABASE_URL").ok(),
        }
    }
}
