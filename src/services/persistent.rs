use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Flag recording that the user connected a wallet; lives outside the cache
/// namespace so clearing the cache keeps it.
pub const CONNECTED_FLAG_KEY: &str = "uberWallet_connected";

/// Durable string key/value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, keys: &[String]) -> Result<()>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    async fn ping(&self) -> bool;
}

pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut iter = conn.scan_match::<_, String>(scan_pattern(prefix)).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

/// `SCAN MATCH` pattern for every key starting with `prefix`, taken literally.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Process-local store used when Redis is unreachable, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> bool {
        false
    }
}

/// Stored form of one persisted value.
#[derive(Serialize, Deserialize)]
struct PersistedEntry<T> {
    data: T,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
}

/// Second-tier cache consulted when live data and the in-memory tier are both
/// unavailable. Keys are namespaced with a fixed prefix; read failures are
/// logged and reported as absent.
pub struct PersistentCache {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Connects to Redis, falling back to the in-process store.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Self {
        let store: Arc<dyn KeyValueStore> = match RedisStore::connect(redis_url).await {
            Ok(store) => {
                tracing::info!("Redis connected successfully");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!("Redis connection failed: {}, using memory store only", e);
                Arc::new(MemoryStore::new())
            }
        };

        Self::new(store, prefix)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Returns the value stored under `key` if it was written less than
    /// `max_age` ago. Expired entries are removed.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let full_key = self.namespaced(key);

        let raw = match self.store.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read from persistent cache {}: {}", full_key, e);
                return None;
            }
        };

        let entry: PersistedEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Failed to decode persistent cache entry {}: {}", full_key, e);
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis() - entry.timestamp;
        if age_ms < max_age.as_millis() as i64 {
            tracing::debug!("Persistent cache hit for key: {}", full_key);
            return Some(entry.data);
        }

        if let Err(e) = self.store.remove(&[full_key.clone()]).await {
            tracing::warn!("Failed to evict expired entry {}: {}", full_key, e);
        }
        None
    }

    /// Best-effort write; failures are logged.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let full_key = self.namespaced(key);
        let entry = PersistedEntry {
            data: value,
            timestamp: Utc::now().timestamp_millis(),
        };

        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to encode persistent cache entry {}: {}", full_key, e);
                return;
            }
        };

        if let Err(e) = self.store.set(&full_key, serialized).await {
            tracing::warn!("Failed to save to persistent cache {}: {}", full_key, e);
        } else {
            tracing::debug!("Persisted key: {}", full_key);
        }
    }

    /// Removes every entry whose key starts with the namespace followed by
    /// `prefix` (empty for the whole namespace). Returns how many were removed.
    pub async fn clear(&self, prefix: &str) -> usize {
        let pattern = self.namespaced(prefix);
        let keys = match self.store.keys_with_prefix(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to list persistent cache keys: {}", e);
                return 0;
            }
        };

        match self.store.remove(&keys).await {
            Ok(()) => {
                tracing::info!("Persistent cache cleared ({} entries)", keys.len());
                keys.len()
            }
            Err(e) => {
                tracing::warn!("Failed to clear persistent cache: {}", e);
                0
            }
        }
    }

    pub async fn set_connected(&self, connected: bool) {
        let result = if connected {
            self.store.set(CONNECTED_FLAG_KEY, "true".to_string()).await
        } else {
            self.store.remove(&[CONNECTED_FLAG_KEY.to_string()]).await
        };
        if let Err(e) = result {
            tracing::warn!("Failed to update connection flag: {}", e);
        }
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.store.get(CONNECTED_FLAG_KEY).await, Ok(Some(_)))
    }

    pub async fn ping(&self) -> bool {
        self.store.ping().await
    }
}
