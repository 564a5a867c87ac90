use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tier that produced a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Live,
    MemoryCache,
    Persisted,
    Placeholder,
}

impl DataSource {
    pub fn is_cached(self) -> bool {
        matches!(self, DataSource::MemoryCache | DataSource::Persisted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::MemoryCache => "memory_cache",
            DataSource::Persisted => "persisted",
            DataSource::Placeholder => "placeholder",
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub cache_hit: bool,
    pub data_source: String,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, source: DataSource) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
            cache_hit: source.is_cached(),
            data_source: source.as_str().to_string(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CacheCleared {
    pub persisted_entries_removed: usize,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct WalletConnection {
    pub connected: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub persistent_store: bool,
    pub node_rpc: bool,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// Counters of one request pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub name: String,
    pub request_count: u64,
    pub cache_size: u64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub rate_limit_interval_ms: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Stats {
    pub market: PipelineStatus,
    pub blockchain: PipelineStatus,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub viewers: usize,
    pub uptime_seconds: u64,
}
