use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::DataSource;

/// Payload of `GET /global`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub data: GlobalMarketData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMarketData {
    #[serde(default)]
    pub total_market_cap: HashMap<String, f64>,
    #[serde(default)]
    pub total_volume: HashMap<String, f64>,
    #[serde(default)]
    pub market_cap_percentage: HashMap<String, f64>,
    #[serde(default)]
    pub active_cryptocurrencies: Option<u64>,
    #[serde(default)]
    pub market_cap_change_percentage_24h_usd: Option<f64>,
}

impl GlobalMarketData {
    pub fn total_market_cap_usd(&self) -> Option<f64> {
        self.total_market_cap.get("usd").copied()
    }

    pub fn btc_dominance(&self) -> Option<f64> {
        self.market_cap_percentage.get("btc").copied()
    }
}

/// One row of `GET /coins/markets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMarket {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingResponse {
    #[serde(default)]
    pub coins: Vec<TrendingCoin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingCoin {
    pub item: TrendingItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingItem {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub score: Option<u32>,
}

/// Value produced by a gateway together with the tier that supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    pub fn new(value: T, source: DataSource) -> Self {
        Self { value, source }
    }
}

/// What the dashboard shows after one refresh cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub global_stats: GlobalStats,
    pub global_stats_source: DataSource,
    pub markets: Vec<CoinMarket>,
    pub markets_source: DataSource,
    pub fetched_at: DateTime<Utc>,
}
