//! Distributed mutex implementations
//!
//! - [`RedisMutex`] - `SET key LOCK NX PX ttl` / `DEL key`, shared by every ledger node
//! - [`LocalMutex`] - same contract inside one process (tests, single-node setups)
//!
//! Both fail immediately when the key is held; nothing ever waits for a lock.

use crate::{gateway::DistributedMutex, Error, Result};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key prefix shared by every lock
const KEY_PREFIX: &str = "MUTEX::";

/// Redis-backed lock
#[derive(Clone)]
pub struct RedisMutex {
    redis: ConnectionManager,
}

impl RedisMutex {
    /// Wrap an existing connection manager
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Connect to `redis://host:port`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;
        tracing::info!(url, "Connected distributed mutex to Redis");
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl DistributedMutex for RedisMutex {
    async fn lock(&self, key: &str, ttl: Duration) -> Result<()> {
        let redis_key = format!("{}{}", KEY_PREFIX, key);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(&redis_key)
            .arg("LOCK")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.redis.clone())
            .await?;

        match reply {
            Some(_) => Ok(()),
            None => Err(Error::LockContention(key.to_string())),
        }
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        let redis_key = format!("{}{}", KEY_PREFIX, key);
        let _: () = self.redis.clone().del(&redis_key).await?;
        Ok(())
    }
}

/// Release `key`, logging instead of failing
///
/// An unreleased lock expires with its TTL, so a failed unlock never fails the
/// operation that held it.
pub(crate) async fn release(mutex: &dyn DistributedMutex, key: &str, deadline: Duration) {
    match tokio::time::timeout(deadline, mutex.unlock(key)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(key, error = %e, "Failed to release mutex"),
        Err(_) => tracing::warn!(key, "Timed out releasing mutex"),
    }
}

/// In-process lock table with expiry
#[derive(Debug, Clone, Default)]
pub struct LocalMutex {
    locks: Arc<DashMap<String, Instant>>,
}

impl LocalMutex {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `key` is held and not expired
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map_or(false, |expires| *expires > Instant::now())
    }
}

#[async_trait]
impl DistributedMutex for LocalMutex {
    async fn lock(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if *held.get() > now {
                    return Err(Error::LockContention(key.to_string()));
                }
                // previous holder expired
                held.insert(now + ttl);
            }
            Entry::Vacant(free) => {
                free.insert(now + ttl);
            }
        }

        Ok(())
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.locks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let mutex = LocalMutex::new();
        mutex.lock("acc-1", Duration::from_secs(5)).await.unwrap();

        let err = mutex.lock("acc-1", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockContention);

        // other keys are independent
        mutex.lock("acc-2", Duration::from_secs(5)).await.unwrap();
        assert!(mutex.is_locked("acc-1"));
    }

    #[tokio::test]
    async fn test_unlock_releases() {
        let mutex = LocalMutex::new();
        mutex.lock("acc-1", Duration::from_secs(5)).await.unwrap();
        mutex.unlock("acc-1").await.unwrap();

        assert!(!mutex.is_locked("acc-1"));
        mutex.lock("acc-1", Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_helper() {
        let mutex = LocalMutex::new();
        mutex.lock("acc-1", Duration::from_secs(5)).await.unwrap();

        release(&mutex, "acc-1", Duration::from_secs(1)).await;
        assert!(!mutex.is_locked("acc-1"));
    }

    #[tokio::test]
    async fn test_lock_expires_after_ttl() {
        let mutex = LocalMutex::new();
        mutex.lock("acc-1", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!mutex.is_locked("acc-1"));
        mutex.lock("acc-1", Duration::from_secs(5)).await.unwrap();
    }
}
