//! File-system-backed lock for single-host deployments without Redis.
//!
//! Two modes, selected at construction:
//! - [`LockMode::Advisory`]: an `fs4` advisory exclusive lock, spin-waited.
//! - [`LockMode::Rename`]: an atomic rename of a `tempfile` into place; a
//!   file whose embedded expiry has passed is treated as abandoned and
//!   removed before the attempt is retried.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use idemp_types::{LockToken, Result};
use time::OffsetDateTime;

use crate::backend_err;
use crate::Lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Advisory,
    Rename,
}

pub struct FileSystemLock {
    dir: PathBuf,
    mode: LockMode,
    spin_interval: Duration,
    max_wait: Duration,
    // The OS advisory lock is tied to an open file descriptor; it must stay
    // open between `acquire` and `release`, which are separate trait calls.
    held: Mutex<HashMap<String, File>>,
}

impl FileSystemLock {
    pub fn new(dir: impl Into<PathBuf>, mode: LockMode) -> Self {
        Self {
            dir: dir.into(),
            mode,
            spin_interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(10),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_spin_interval(mut self, interval: Duration) -> Self {
        self.spin_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitize(key)))
    }

    async fn acquire_advisory(&self, key: &str, ttl_secs: u64) -> Result<Option<LockToken>> {
        let path = self.path_for(key);
        let token = LockToken::generate();
        let deadline = tokio::time::Instant::now() + self.max_wait;
        loop {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(backend_err)?;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let expires_at = OffsetDateTime::now_utc().unix_timestamp() + ttl_secs as i64;
                    let mut file = file;
                    file.set_len(0).map_err(backend_err)?;
                    write!(file, "{}\n{}", token.as_str(), expires_at).map_err(backend_err)?;
                    self.held
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(key.to_string(), file);
                    return Ok(Some(token));
                }
                Err(_) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(self.spin_interval).await;
                }
            }
        }
    }

    async fn release_advisory(&self, key: &str, token: &LockToken) -> Result<bool> {
        let held_file = {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            match held.get_mut(key) {
                Some(file) => {
                    file.seek(SeekFrom::Start(0)).map_err(backend_err)?;
                    let mut contents = String::new();
                    file.read_to_string(&mut contents).map_err(backend_err)?;
                    if contents.lines().next() != Some(token.as_str()) {
                        return Ok(false);
                    }
                    held.remove(key)
                }
                None => None,
            }
        };
        let Some(file) = held_file else {
            return Ok(false);
        };
        let _ = FileExt::unlock(&file);
        drop(file);
        let _ = std::fs::remove_file(self.path_for(key));
        Ok(true)
    }

    async fn acquire_rename(&self, key: &str, ttl_secs: u64) -> Result<Option<LockToken>> {
        let path = self.path_for(key);
        let token = LockToken::generate();
        let expires_at = OffsetDateTime::now_utc().unix_timestamp() + ttl_secs as i64;

        reap_if_expired(&path)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(backend_err)?;
        write!(tmp, "{}\n{}", token.as_str(), expires_at).map_err(backend_err)?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(Some(token)),
            Err(_) => Ok(None),
        }
    }

    async fn release_rename(&self, key: &str, token: &LockToken) -> Result<bool> {
        let path = self.path_for(key);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Ok(false);
        };
        if contents.lines().next() == Some(token.as_str()) {
            let _ = std::fs::remove_file(&path);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn reap_if_expired(path: &Path) -> Result<()> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Ok(());
    };
    let expires_at: Option<i64> = contents.lines().nth(1).and_then(|line| line.parse().ok());
    if let Some(expires_at) = expires_at {
        if expires_at < OffsetDateTime::now_utc().unix_timestamp() {
            let _ = std::fs::remove_file(path);
        }
    }
    Ok(())
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl Lock for FileSystemLock {
    async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<Option<LockToken>> {
        match self.mode {
            LockMode::Advisory => self.acquire_advisory(key, ttl_secs).await,
            LockMode::Rename => self.acquire_rename(key, ttl_secs).await,
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        match self.mode {
            LockMode::Advisory => self.release_advisory(key, token).await,
            LockMode::Rename => self.release_rename(key, token).await,
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).exists())
    }
}
