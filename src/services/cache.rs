use moka::{future::Cache, Expiry};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// One cached payload and the moment it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Lets moka reclaim memory on the entry's own TTL. Freshness is still
/// decided by `CacheEntry::is_fresh`, which follows the tokio clock.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory response tier shared by a gateway and its pipeline.
pub struct ResponseCache {
    memory: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        let memory = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { memory, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entry(key).await.map(|entry| entry.payload)
    }

    /// Returns the entry only while it is fresh; a stale entry is evicted.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.memory.get(key).await?;
        if entry.is_fresh() {
            tracing::debug!("Memory cache hit for key: {}", key);
            Some(entry)
        } else {
            self.memory.invalidate(key).await;
            tracing::debug!("Memory cache entry expired for key: {}", key);
            None
        }
    }

    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key).await?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry {}: {}", key, e);
                self.memory.invalidate(key).await;
                None
            }
        }
    }

    pub async fn insert(&self, key: &str, payload: Value) {
        self.insert_with_ttl(key, payload, self.default_ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: &str, payload: Value, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            stored_at: Instant::now(),
            ttl,
        };
        self.memory.insert(key.to_string(), entry).await;
        tracing::debug!("Cached key: {} with TTL: {}s", key, ttl.as_secs());
    }

    pub async fn insert_typed<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(payload) => self.insert_with_ttl(key, payload, ttl).await,
            Err(e) => tracing::warn!("Failed to cache {}: {}", key, e),
        }
    }

    pub fn clear(&self) {
        self.memory.invalidate_all();
    }

    pub async fn entry_count(&self) -> u64 {
        self.memory.run_pending_tasks().await;
        self.memory.entry_count()
    }
}
