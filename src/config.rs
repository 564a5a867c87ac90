use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::services::PipelineConfig;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Market data aggregator
    pub market_api_url: String,
    pub market_rate_limit_ms: u64,
    pub market_cache_ttl_secs: u64,
    pub top_markets_limit: u32,

    // Ethereum node provider
    pub node_rpc_url: String,
    pub ens_resolve_url: String,
    pub node_rate_limit_ms: u64,
    pub chain_cache_ttl_secs: u64,

    // Request pipeline
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,

    // Persistent cache
    pub redis_url: String,
    pub cache_prefix: String,

    // Dashboard
    pub refresh_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let config = Self {
            environment: environment.clone(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_var("PORT", "8080")?,

            market_api_url: std::env::var("MARKET_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            market_rate_limit_ms: Self::parse_var("MARKET_RATE_LIMIT_MS", "1200")?,
            market_cache_ttl_secs: Self::parse_var("MARKET_CACHE_TTL_SECS", "60")?,
            top_markets_limit: Self::parse_var("TOP_MARKETS_LIMIT", "20")?,

            node_rpc_url: std::env::var("NODE_RPC_URL")
                .unwrap_or_else(|_| "https://eth-mainnet.g.alchemy.com/v2/demo".to_string()),
            ens_resolve_url: std::env::var("ENS_RESOLVE_URL")
                .unwrap_or_else(|_| "https://api.ensideas.com/ens/resolve/".to_string()),
            node_rate_limit_ms: Self::parse_var("NODE_RATE_LIMIT_MS", "100")?,
            chain_cache_ttl_secs: Self::parse_var("CHAIN_CACHE_TTL_SECS", "300")?,

            request_timeout_secs: Self::parse_var("REQUEST_TIMEOUT_SECS", "10")?,
            max_retries: Self::parse_var("MAX_RETRIES", "3")?,
            initial_backoff_ms: Self::parse_var("INITIAL_BACKOFF_MS", "1000")?,

            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            cache_prefix: std::env::var("CACHE_PREFIX")
                .unwrap_or_else(|_| "uberWallet_cache_".to_string()),

            refresh_interval_secs: Self::parse_var("REFRESH_INTERVAL_SECS", "30")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Pipeline settings for the market-data gateway.
    pub fn market_pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            name: "market".to_string(),
            min_interval: Duration::from_millis(self.market_rate_limit_ms),
            cache_ttl: Duration::from_secs(self.market_cache_ttl_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..PipelineConfig::default()
        }
    }

    /// Pipeline settings for the blockchain gateway. Its cache TTL is the
    /// balance TTL; longer-lived entries scale from it.
    pub fn chain_pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            name: "blockchain".to_string(),
            min_interval: Duration::from_millis(self.node_rate_limit_ms),
            cache_ttl: Duration::from_secs(self.chain_cache_ttl_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..PipelineConfig::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_var<T>(var: &str, default: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        std::env::var(var)
            .unwrap_or_else(|_| default.to_string())
            .parse()
            .with_context(|| format!("Invalid {}", var))
    }

    fn validate(&self) -> Result<()> {
        // Validate URLs
        if !self.market_api_url.starts_with("http") {
            bail!("MARKET_API_URL must be HTTP(S) URL");
        }
        if !self.node_rpc_url.starts_with("http") {
            bail!("NODE_RPC_URL must be HTTP(S) URL");
        }
        if !self.ens_resolve_url.starts_with("http") {
            bail!("ENS_RESOLVE_URL must be HTTP(S) URL");
        }

        if self.refresh_interval_secs == 0 {
            bail!("REFRESH_INTERVAL_SECS must be greater than zero");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}
