#![allow(dead_code)]

use mockito::Matcher;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uber_wallet::services::{
    BlockchainGateway, MarketDataGateway, MemoryStore, PersistentCache, PipelineConfig,
    RequestPipeline, ReqwestTransport,
};

pub const CACHE_PREFIX: &str = "uberWallet_cache_";

/// Pipeline with the production semantics but test-sized waits.
pub fn pipeline(name: &str, cache_ttl: Duration) -> Arc<RequestPipeline> {
    Arc::new(RequestPipeline::new(
        PipelineConfig {
            name: name.to_string(),
            min_interval: Duration::from_millis(5),
            cache_ttl,
            max_retries: 1,
            initial_backoff: Duration::from_millis(10),
            ..PipelineConfig::default()
        },
        Arc::new(ReqwestTransport::new()),
    ))
}

pub fn persistent() -> Arc<PersistentCache> {
    Arc::new(PersistentCache::new(Arc::new(MemoryStore::new()), CACHE_PREFIX))
}

pub fn market_gateway(base_url: &str, persistent: Arc<PersistentCache>) -> MarketDataGateway {
    MarketDataGateway::new(base_url, pipeline("market", Duration::from_secs(60)), persistent)
}

pub fn blockchain_gateway(base_url: &str) -> BlockchainGateway {
    BlockchainGateway::new(
        format!("{}/rpc", base_url),
        format!("{}/ens/resolve/", base_url),
        pipeline("blockchain", Duration::from_secs(300)),
    )
}

pub fn rpc_method(method: &str) -> Matcher {
    Matcher::Regex(format!(r#""method"\s*:\s*"{}""#, method))
}

pub fn rpc_result(result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string()
}

/// A 32-byte ABI word holding `address` in its low bytes.
pub fn address_word(address: &str) -> Value {
    json!(format!(
        "0x000000000000000000000000{}",
        address.trim_start_matches("0x").to_lowercase()
    ))
}

pub fn global_payload() -> Value {
    json!({"data": {
        "total_market_cap": {"usd": 3.1e12, "eur": 2.9e12},
        "total_volume": {"usd": 9.5e10},
        "market_cap_percentage": {"btc": 54.1, "eth": 16.2},
        "active_cryptocurrencies": 15021,
        "market_cap_change_percentage_24h_usd": -0.8
    }})
}

pub fn listing_payload() -> Value {
    json!([
        {
            "id": "bitcoin", "symbol": "btc", "name": "Bitcoin",
            "image": "https://assets.coingecko.com/coins/images/1/large/bitcoin.png",
            "current_price": 71000.0, "price_change_percentage_24h": 1.2,
            "market_cap": 1.4e12, "total_volume": 3.0e10
        },
        {
            "id": "ethereum", "symbol": "eth", "name": "Ethereum",
            "image": "https://assets.coingecko.com/coins/images/279/large/ethereum.png",
            "current_price": 3900.0, "price_change_percentage_24h": -0.4,
            "market_cap": 4.7e11, "total_volume": 1.6e10
        }
    ])
}
