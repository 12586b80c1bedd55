//! Postgres-backed storage via `sqlx`. `put` distinguishes "this call
//! inserted" from "a concurrent writer won" using `rows_affected()` from an
//! `INSERT ... ON CONFLICT DO NOTHING`, never by parsing a driver error.

use idemp_types::{Result, StoredRecord};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use async_trait::async_trait;

use crate::backend_err;
use crate::Storage;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(backend_err)?;
        let storage = Self { pool };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                id BIGSERIAL PRIMARY KEY,
                idempotency_key TEXT UNIQUE NOT NULL,
                data JSON NOT NULL,
                expires_at BIGINT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idempotency_keys_expires_at_idx \
             ON idempotency_keys (expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idempotency_keys_created_at_idx \
             ON idempotency_keys (created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    fn is_retryable(err: &sqlx::Error) -> bool {
        matches!(
            err.as_database_error().and_then(|e| e.code()),
            Some(code) if code == SERIALIZATION_FAILURE || code == DEADLOCK_DETECTED
        )
    }

    async fn put_once(&self, key: &str, record: &StoredRecord, ttl_secs: u64) -> sqlx::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        let data = serde_json::to_value(record).expect("StoredRecord always serializes");
        let result = sqlx::query(
            "INSERT INTO idempotency_keys (idempotency_key, data, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(key)
        .bind(&data)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;
        let _ = ttl_secs;
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn put(&self, key: &str, record: &StoredRecord, ttl_secs: u64) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self.put_once(key, record, ttl_secs).await {
                Ok(inserted) => return Ok(inserted),
                Err(err) if Self::is_retryable(&err) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(err) => return Err(backend_err(err)),
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let row = sqlx::query(
            "SELECT data FROM idempotency_keys \
             WHERE idempotency_key = $1 AND expires_at > $2 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data").map_err(backend_err)?;
                let record: StoredRecord = serde_json::from_value(data).map_err(backend_err)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE idempotency_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup(&self, batch_max: usize) -> Result<usize> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut removed = 0usize;
        loop {
            let batch = (batch_max - removed).min(1000);
            if batch == 0 {
                break;
            }
            let result = sqlx::query(
                "DELETE FROM idempotency_keys WHERE id IN ( \
                    SELECT id FROM idempotency_keys WHERE expires_at <= $1 LIMIT $2 \
                 )",
            )
            .bind(now)
            .bind(batch as i64)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
            let deleted = result.rows_affected() as usize;
            removed += deleted;
            if deleted < batch {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        idemp_telemetry::record_counter(
            "storage_cleanup_deleted",
            removed as u64,
            &idemp_telemetry::MetricLabels::default().backend("postgres"),
        );
        Ok(removed)
    }
}
