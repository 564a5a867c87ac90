use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{
    CoinMarket, DataSource, GlobalMarketData, GlobalStats, PipelineStatus, Sourced, TrendingCoin,
    TrendingResponse,
};
use crate::services::{FallbackChain, PersistentCache, RequestDescriptor, RequestPipeline};

/// Persistent-cache key for the last good `/global` payload.
pub const GLOBAL_STATS_KEY: &str = "global-stats";
/// Persistent-cache key for the last good market listing.
pub const MARKET_DATA_KEY: &str = "market-data";

/// Persisted snapshots stay usable as fallback for this many live TTLs.
const PERSISTED_TTL_MULTIPLIER: u32 = 5;

/// Market-data aggregator client (CoinGecko-compatible API).
pub struct MarketDataGateway {
    base_url: String,
    pipeline: Arc<RequestPipeline>,
    persistent: Arc<PersistentCache>,
}

impl MarketDataGateway {
    pub fn new(
        base_url: impl Into<String>,
        pipeline: Arc<RequestPipeline>,
        persistent: Arc<PersistentCache>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pipeline,
            persistent,
        }
    }

    fn persisted_window(&self) -> Duration {
        self.pipeline.config().cache_ttl * PERSISTED_TTL_MULTIPLIER
    }

    pub fn global_stats_url(&self) -> String {
        format!("{}/global", self.base_url)
    }

    pub fn top_markets_url(&self, limit: u32) -> String {
        format!(
            "{}/coins/markets?vs_currency=usd&order=market_cap_desc&per_page={}&page=1&sparkline=false&price_change_percentage=24h",
            self.base_url, limit
        )
    }

    pub fn trending_url(&self) -> String {
        format!("{}/search/trending", self.base_url)
    }

    pub async fn fetch_global_stats(&self) -> Sourced<GlobalStats> {
        tracing::info!("Fetching global stats...");
        let descriptor = RequestDescriptor::get(self.global_stats_url());

        FallbackChain::new("global stats")
            .then(async {
                let (stats, source) = self.pipeline.fetch::<GlobalStats>(&descriptor).await?;
                Ok::<_, FetchError>(Some(Sourced::new(stats, source)))
            })
            .then_optional(
                DataSource::Persisted,
                self.persistent.get(GLOBAL_STATS_KEY, self.persisted_window()),
            )
            .or_default(fallback_global_stats)
            .await
    }

    pub async fn fetch_top_markets(&self, limit: u32) -> Sourced<Vec<CoinMarket>> {
        tracing::info!("Fetching market data for top {} cryptocurrencies...", limit);
        let descriptor = RequestDescriptor::get(self.top_markets_url(limit));

        FallbackChain::new("market data")
            .then(async {
                let (markets, source) = self
                    .pipeline
                    .execute_parsed(
                        &descriptor,
                        self.pipeline.config().max_retries,
                        self.pipeline.config().initial_backoff,
                        parse_market_listing,
                    )
                    .await?;
                Ok::<_, FetchError>(Some(Sourced::new(markets, source)))
            })
            .then_optional(
                DataSource::Persisted,
                self.persistent.get(MARKET_DATA_KEY, self.persisted_window()),
            )
            .or_default(fallback_markets)
            .await
    }

    /// Trending coins; an empty list when the provider is unavailable.
    pub async fn fetch_trending_coins(&self) -> Sourced<Vec<TrendingCoin>> {
        tracing::info!("Fetching trending coins...");
        let descriptor = RequestDescriptor::get(self.trending_url());

        FallbackChain::new("trending coins")
            .then(async {
                let (trending, source) = self.pipeline.fetch::<TrendingResponse>(&descriptor).await?;
                Ok::<_, FetchError>(Some(Sourced::new(trending.coins, source)))
            })
            .or_default(Vec::new)
            .await
    }

    pub fn clear_cache(&self) {
        self.pipeline.clear_cache();
    }

    pub async fn status(&self) -> PipelineStatus {
        self.pipeline.status().await
    }
}

/// The listing must be a JSON array; anything else counts as a failed fetch.
fn parse_market_listing(payload: Value) -> Result<Vec<CoinMarket>, FetchError> {
    if !payload.is_array() {
        return Err(FetchError::InvalidResponse(
            "market listing is not an array".to_string(),
        ));
    }
    serde_json::from_value(payload).map_err(|e| FetchError::InvalidResponse(e.to_string()))
}

pub fn fallback_global_stats() -> GlobalStats {
    GlobalStats {
        data: GlobalMarketData {
            total_market_cap: HashMap::from([("usd".to_string(), 2_400_000_000_000.0)]),
            total_volume: HashMap::from([("usd".to_string(), 45_000_000_000.0)]),
            market_cap_percentage: HashMap::from([("btc".to_string(), 52.5)]),
            active_cryptocurrencies: Some(13_847),
            market_cap_change_percentage_24h_usd: Some(2.3),
        },
    }
}

pub fn fallback_markets() -> Vec<CoinMarket> {
    vec![
        placeholder_coin(
            "bitcoin",
            "btc",
            "Bitcoin",
            "https://assets.coingecko.com/coins/images/1/thumb/bitcoin.png",
            65_432.10,
            2.34,
            1_280_000_000_000.0,
            28_500_000_000.0,
        ),
        placeholder_coin(
            "ethereum",
            "eth",
            "Ethereum",
            "https://assets.coingecko.com/coins/images/279/thumb/ethereum.png",
            3_245.67,
            -1.23,
            390_000_000_000.0,
            15_200_000_000.0,
        ),
        placeholder_coin(
            "tether",
            "usdt",
            "Tether",
            "https://assets.coingecko.com/coins/images/325/thumb/Tether.png",
            1.00,
            0.01,
            95_000_000_000.0,
            45_000_000_000.0,
        ),
    ]
}

#[allow(clippy::too_many_arguments)]
fn placeholder_coin(
    id: &str,
    symbol: &str,
    name: &str,
    image: &str,
    price: f64,
    change_24h: f64,
    market_cap: f64,
    volume: f64,
) -> CoinMarket {
    CoinMarket {
        id: id.to_string(),
        symbol: symbol.to_string(),
        name: name.to_string(),
        image: Some(image.to_string()),
        current_price: Some(price),
        price_change_percentage_24h: Some(change_24h),
        market_cap: Some(market_cap),
        total_volume: Some(volume),
    }
}
