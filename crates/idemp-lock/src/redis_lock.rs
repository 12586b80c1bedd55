//! Redis lock: `SET key token NX EX ttl` for acquisition (Redis already
//! makes the NX+EX combination atomic) and a Lua compare-and-delete script
//! for release, so a holder can never release a lock it no longer owns.

use async_trait::async_trait;
use idemp_types::{LockToken, Result};
use redis::AsyncCommands;
use redis::Script;
use tokio::sync::Mutex;

use crate::backend_err;
use crate::Lock;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisLock {
    namespace: String,
    connection: Mutex<redis::aio::ConnectionManager>,
    release_script: Script,
}

impl RedisLock {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(backend_err)?;
        Ok(Self {
            namespace: namespace.into(),
            connection: Mutex::new(manager),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{key}", self.namespace)
    }
}

#[async_trait]
impl Lock for RedisLock {
    async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<Option<LockToken>> {
        let token = LockToken::generate();
        let mut conn = self.connection.lock().await;
        let options = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl_secs.max(1) as usize));
        let acquired: bool = conn
            .set_options(self.lock_key(key), token.as_str().to_string(), options)
            .await
            .map_err(backend_err)?;
        Ok(if acquired { Some(token) } else { None })
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let deleted: i64 = self
            .release_script
            .key(self.lock_key(key))
            .arg(token.as_str())
            .invoke_async(&mut *conn)
            .await
            .map_err(backend_err)?;
        Ok(deleted == 1)
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let exists: bool = conn.exists(self.lock_key(key)).await.map_err(backend_err)?;
        Ok(exists)
    }
}
