//! Interceptor configuration, assembled from the environment the same way
//! this workspace's other `*Config::from_env` constructors are.

use std::time::Duration;

/// Governs what happens when a request carries no idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Missing key is rejected with `InvalidKey` (400).
    #[default]
    Strict,
    /// Missing key passes through without idempotency; present keys are
    /// still stored on success.
    Optional,
    /// Like `Optional`, but successful responses are never stored — the
    /// replay cache is checked but never populated.
    Lax,
}

impl Mode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "optional" => Some(Self::Optional),
            "lax" => Some(Self::Lax),
            _ => None,
        }
    }

    pub fn stores_on_success(self) -> bool {
        !matches!(self, Self::Lax)
    }
}

/// Which `Storage` implementation to wire up, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackendKind {
    #[default]
    Memory,
    Redis,
    Postgres,
    Cache,
}

/// Which `Lock` implementation to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockBackendKind {
    Redis,
    #[default]
    FileSystem,
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized backend kind: {0}")]
pub struct UnknownBackendKind(String);

impl std::str::FromStr for StorageBackendKind {
    type Err = UnknownBackendKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "postgres" | "sql" => Ok(Self::Postgres),
            "cache" => Ok(Self::Cache),
            other => Err(UnknownBackendKind(other.to_string())),
        }
    }
}

impl std::str::FromStr for LockBackendKind {
    type Err = UnknownBackendKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "filesystem" | "file-system" | "fs" => Ok(Self::FileSystem),
            other => Err(UnknownBackendKind(other.to_string())),
        }
    }
}

/// Per-interceptor-instance configuration. See `from_env` for defaults.
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    pub mode: Mode,
    pub header_name: String,
    pub ttl: Duration,
    pub lock_ttl: Duration,
    pub max_lock_attempts: u32,
    pub lock_retry_delay: Duration,
    pub use_fast_cache: bool,
    pub fast_cache_ttl: Duration,
    pub oversell_protection: bool,
    pub storage_backend: StorageBackendKind,
    pub lock_backend: LockBackendKind,
    pub maintenance_interval: Duration,
    pub include_created_at_header: bool,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Strict,
            header_name: "X-Idempotency-Key".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            lock_ttl: Duration::from_secs(30),
            max_lock_attempts: 5,
            lock_retry_delay: Duration::from_millis(200),
            use_fast_cache: true,
            fast_cache_ttl: Duration::from_secs(3),
            oversell_protection: false,
            storage_backend: StorageBackendKind::Memory,
            lock_backend: LockBackendKind::FileSystem,
            maintenance_interval: Duration::from_secs(60 * 60),
            include_created_at_header: false,
        }
    }
}

impl InterceptorConfig {
    /// Reads configuration from the environment, falling back to
    /// [`InterceptorConfig::default`] values for anything absent or
    /// unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mode: env_var("IDEMPOTENCY_MODE")
                .and_then(|v| Mode::parse(&v))
                .unwrap_or(defaults.mode),
            header_name: env_var("IDEMPOTENCY_HEADER_NAME").unwrap_or(defaults.header_name),
            ttl: env_secs("IDEMPOTENCY_TTL_SECS").unwrap_or(defaults.ttl),
            lock_ttl: env_secs("IDEMPOTENCY_LOCK_TTL_SECS").unwrap_or(defaults.lock_ttl),
            max_lock_attempts: env_var("IDEMPOTENCY_MAX_LOCK_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_lock_attempts),
            lock_retry_delay: env_millis("IDEMPOTENCY_LOCK_RETRY_DELAY_MS")
                .unwrap_or(defaults.lock_retry_delay),
            use_fast_cache: env_bool("IDEMPOTENCY_USE_FAST_CACHE").unwrap_or(defaults.use_fast_cache),
            fast_cache_ttl: env_secs("IDEMPOTENCY_FAST_CACHE_TTL_SECS")
                .unwrap_or(defaults.fast_cache_ttl),
            oversell_protection: env_bool("IDEMPOTENCY_OVERSELL_PROTECTION")
                .unwrap_or(defaults.oversell_protection),
            storage_backend: env_var("IDEMPOTENCY_STORAGE_BACKEND")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.storage_backend),
            lock_backend: env_var("IDEMPOTENCY_LOCK_BACKEND")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lock_backend),
            maintenance_interval: env_secs("IDEMPOTENCY_MAINTENANCE_INTERVAL_SECS")
                .unwrap_or(defaults.maintenance_interval),
            include_created_at_header: env_bool("IDEMPOTENCY_INCLUDE_CREATED_AT_HEADER")
                .unwrap_or(defaults.include_created_at_header),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_var(name).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_secs(name: &str) -> Option<Duration> {
    env_var(name).and_then(|v| v.parse().ok()).map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    env_var(name).and_then(|v| v.parse().ok()).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // Environment variables are process-global; serialize the tests that
    // touch them so they cannot observe each other's edits.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn defaults_are_strict_and_use_fast_cache() {
        let cfg = InterceptorConfig::default();
        assert_eq!(cfg.mode, Mode::Strict);
        assert!(cfg.use_fast_cache);
    }

    #[test]
    fn from_env_reads_mode_and_backend_kind() {
        let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var("IDEMPOTENCY_MODE", "optional");
            std::env::set_var("IDEMPOTENCY_STORAGE_BACKEND", "redis");
        }
        let cfg = InterceptorConfig::from_env();
        assert_eq!(cfg.mode, Mode::Optional);
        assert_eq!(cfg.storage_backend, StorageBackendKind::Redis);
        unsafe {
            std::env::remove_var("IDEMPOTENCY_MODE");
            std::env::remove_var("IDEMPOTENCY_STORAGE_BACKEND");
        }
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        unsafe {
            std::env::set_var("IDEMPOTENCY_MAX_LOCK_ATTEMPTS", "not-a-number");
        }
        let cfg = InterceptorConfig::from_env();
        assert_eq!(cfg.max_lock_attempts, InterceptorConfig::default().max_lock_attempts);
        unsafe {
            std::env::remove_var("IDEMPOTENCY_MAX_LOCK_ATTEMPTS");
        }
    }
}
