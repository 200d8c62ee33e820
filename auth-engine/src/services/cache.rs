//! Key-value cache seam backing the revocation store and the lockout guard.
//!
//! Any implementation with per-key TTL satisfies the contract: the networked
//! `RedisCache` in production, `MemoryCache` for tests and embedding.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Store `value` under `key` with a TTL in seconds.
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), anyhow::Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Remove `key`. Returns whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;

    /// Atomically increment the counter at `key`, setting `ttl_seconds` on
    /// first write, and return the new count.
    async fn increment(&self, key: &str, ttl_seconds: i64) -> Result<i64, anyhow::Error>;

    /// Seconds until `key` expires, or None if absent.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<i64>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Redis-backed cache using a ConnectionManager for automatic reconnection.
#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache key: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str, ttl_seconds: i64) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let count: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;

        // The window starts at the first failure; later increments keep it.
        if count == 1 {
            let _: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_seconds)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to set counter expiry: {}", e))?;
        }

        Ok(count)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<i64>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read TTL: {}", e))?;
        Ok((ttl >= 0).then_some(ttl))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory cache with the same TTL semantics. Shipped in non-test code so
/// integration tests and embedded deployments can run without Redis.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    value: String,
    deadline: Instant,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, anyhow::Error>
    {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))
    }
}

fn live<'a>(entries: &'a HashMap<String, MemoryEntry>, key: &str) -> Option<&'a MemoryEntry> {
    entries
        .get(key)
        .filter(|entry| entry.deadline > Instant::now())
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), anyhow::Error> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                deadline: Instant::now() + Duration::from_secs(ttl_seconds.max(0) as u64),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let entries = self.lock()?;
        Ok(live(&entries, key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut entries = self.lock()?;
        let existed = live(&entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn increment(&self, key: &str, ttl_seconds: i64) -> Result<i64, anyhow::Error> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        let (count, deadline) = match entries.get(key).filter(|e| e.deadline > now) {
            Some(entry) => (
                entry.value.parse::<i64>().unwrap_or(0) + 1,
                entry.deadline,
            ),
            None => (1, now + Duration::from_secs(ttl_seconds.max(0) as u64)),
        };

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: count.to_string(),
                deadline,
            },
        );
        Ok(count)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<i64>, anyhow::Error> {
        let entries = self.lock()?;
        Ok(live(&entries, key)
            .map(|entry| entry.deadline.saturating_duration_since(Instant::now()).as_secs() as i64))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
