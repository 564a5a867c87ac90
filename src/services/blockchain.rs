use ethers::types::{Address, U256};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{DataSource, NativeBalance, PipelineStatus, Sourced, TokenBalance, TokenMetadata};
use crate::services::{FallbackChain, RequestDescriptor, RequestPipeline};
use crate::utils::{format_units, namehash, parse_hex_quantity, parse_hex_u64, units_to_f64};

/// ENS registry on mainnet.
pub const ENS_REGISTRY: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";
const RESOLVER_SELECTOR: &str = "0178b8bf";
const ADDR_SELECTOR: &str = "3b3b57de";

/// Holdings at or below this many whole units are dropped.
pub const MATERIALITY_THRESHOLD: f64 = 0.001;

const METADATA_TTL_MULTIPLIER: u32 = 10;
const NAME_TTL_MULTIPLIER: u32 = 4;

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBalancesResult {
    #[serde(default)]
    token_balances: Vec<RawTokenBalance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenBalance {
    contract_address: String,
    token_balance: Option<String>,
}

#[derive(Deserialize)]
struct RawTokenMetadata {
    symbol: Option<String>,
    name: Option<String>,
    decimals: Option<u8>,
    logo: Option<String>,
}

#[derive(Deserialize)]
struct PublicResolution {
    address: Option<String>,
}

/// JSON-RPC node client plus the public ENS resolution endpoint.
///
/// Every call goes through the node pipeline uncached; typed results are
/// cached here per method and argument with their own TTL.
pub struct BlockchainGateway {
    rpc_url: String,
    ens_resolve_url: String,
    pipeline: Arc<RequestPipeline>,
    next_id: AtomicU64,
}

impl BlockchainGateway {
    pub fn new(
        rpc_url: impl Into<String>,
        ens_resolve_url: impl Into<String>,
        pipeline: Arc<RequestPipeline>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ens_resolve_url: ens_resolve_url.into(),
            pipeline,
            next_id: AtomicU64::new(0),
        }
    }

    fn balance_ttl(&self) -> Duration {
        self.pipeline.cache().default_ttl()
    }

    fn metadata_ttl(&self) -> Duration {
        self.balance_ttl() * METADATA_TTL_MULTIPLIER
    }

    fn name_ttl(&self) -> Duration {
        self.balance_ttl() * NAME_TTL_MULTIPLIER
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, FetchError> {
        self.rpc_with_retries(method, params, self.pipeline.config().max_retries)
            .await
    }

    async fn rpc_with_retries(
        &self,
        method: &str,
        params: Value,
        max_retries: u32,
    ) -> Result<Value, FetchError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Blockchain RPC #{}: {}", id, method);

        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        let descriptor = RequestDescriptor::post_json(&self.rpc_url, body).uncached();
        let payload = self
            .pipeline
            .execute(&descriptor, max_retries, self.pipeline.config().initial_backoff)
            .await?;

        let envelope: RpcEnvelope = serde_json::from_value(payload)
            .map_err(|e| FetchError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = envelope.error {
            tracing::error!("RPC error for {}: {}", method, error.message);
            return Err(FetchError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn rpc_quantity(&self, method: &str, params: Value) -> Result<U256, FetchError> {
        let result = self.rpc(method, params).await?;
        let hex = result.as_str().ok_or_else(|| {
            FetchError::InvalidResponse(format!("{} returned a non-string result", method))
        })?;
        parse_hex_quantity(hex)
    }

    pub async fn get_native_balance(&self, address: Address) -> Result<NativeBalance, FetchError> {
        let cache_key = format!("eth_balance_{:?}", address);
        let cache = self.pipeline.cache();
        if let Some(cached) = cache.get_typed::<NativeBalance>(&cache_key).await {
            tracing::debug!("Cache hit for ETH balance: {:?}", address);
            return Ok(cached);
        }

        let wei = self
            .rpc_quantity("eth_getBalance", json!([format!("{:?}", address), "latest"]))
            .await?;

        let balance = NativeBalance {
            wei,
            formatted: format_units(wei, 18),
            ether: units_to_f64(wei, 18),
        };
        cache.insert_typed(&cache_key, &balance, self.balance_ttl()).await;
        Ok(balance)
    }

    /// Nonzero token balances above the materiality threshold. A token
    /// whose metadata cannot be fetched is kept with placeholder metadata.
    pub async fn get_token_balances(&self, address: Address) -> Result<Vec<TokenBalance>, FetchError> {
        let cache_key = format!("token_balances_{:?}", address);
        let cache = self.pipeline.cache();
        if let Some(cached) = cache.get_typed::<Vec<TokenBalance>>(&cache_key).await {
            tracing::debug!("Cache hit for token balances: {:?}", address);
            return Ok(cached);
        }

        let result = self
            .rpc("alchemy_getTokenBalances", json!([format!("{:?}", address)]))
            .await?;
        let raw: TokenBalancesResult = if result.is_null() {
            TokenBalancesResult { token_balances: Vec::new() }
        } else {
            serde_json::from_value(result)
                .map_err(|e| FetchError::InvalidResponse(format!("alchemy_getTokenBalances: {}", e)))?
        };

        let mut balances = Vec::new();
        for token in raw.token_balances {
            let Some(hex) = token.token_balance.as_deref() else {
                continue;
            };
            let raw_balance = match parse_hex_quantity(hex) {
                Ok(value) if !value.is_zero() => value,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Skipping token {}: {}", token.contract_address, e);
                    continue;
                }
            };

            // Metadata is fetched one token at a time.
            let metadata = match self.get_token_metadata(&token.contract_address).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(
                        "Failed to get metadata for token {}: {}",
                        token.contract_address,
                        e
                    );
                    unknown_token()
                }
            };

            if let Some(balance) = material_balance(token.contract_address, raw_balance, metadata) {
                balances.push(balance);
            }
        }

        cache.insert_typed(&cache_key, &balances, self.balance_ttl()).await;
        Ok(balances)
    }

    pub async fn get_token_metadata(&self, contract_address: &str) -> Result<TokenMetadata, FetchError> {
        let cache_key = format!("token_metadata_{}", contract_address.to_lowercase());
        let cache = self.pipeline.cache();
        if let Some(cached) = cache.get_typed::<TokenMetadata>(&cache_key).await {
            return Ok(cached);
        }

        let result = self
            .rpc("alchemy_getTokenMetadata", json!([contract_address]))
            .await?;
        if result.is_null() {
            return Err(FetchError::NotFound(format!("metadata for {}", contract_address)));
        }
        let raw: RawTokenMetadata = serde_json::from_value(result)
            .map_err(|e| FetchError::InvalidResponse(format!("alchemy_getTokenMetadata: {}", e)))?;

        let logo_url = raw
            .logo
            .filter(|logo| !logo.is_empty())
            .or_else(|| raw.symbol.as_deref().and_then(default_token_logo).map(str::to_string));
        let metadata = TokenMetadata {
            symbol: raw.symbol.filter(|s| !s.is_empty()).unwrap_or_else(|| "UNKNOWN".to_string()),
            name: raw.name.filter(|s| !s.is_empty()).unwrap_or_else(|| "Unknown Token".to_string()),
            decimals: raw.decimals.unwrap_or(18),
            logo_url,
        };

        cache.insert_typed(&cache_key, &metadata, self.metadata_ttl()).await;
        Ok(metadata)
    }

    /// Resolves an ENS name: the public endpoint first, then the registry
    /// and resolver contracts. A zero address anywhere means `NotFound`.
    pub async fn resolve_name(&self, name: &str) -> Result<Address, FetchError> {
        let name = name.trim().to_lowercase();
        let cache_key = format!("ens_resolve_{}", name);
        let cache = self.pipeline.cache();
        if let Some(cached) = cache.get_typed::<Address>(&cache_key).await {
            return Ok(cached);
        }

        let resolved = FallbackChain::new("ENS resolution")
            .then(async {
                Ok::<_, FetchError>(
                    self.resolve_via_public_endpoint(&name)
                        .await?
                        .map(|address| Sourced::new(address, DataSource::Live)),
                )
            })
            .then(async {
                let address = self.resolve_on_chain(&name).await?;
                Ok::<_, FetchError>(Some(Sourced::new(address, DataSource::Live)))
            })
            .first_available()
            .await?
            .value;

        tracing::info!("Resolved {} to {:?}", name, resolved);
        cache.insert_typed(&cache_key, &resolved, self.name_ttl()).await;
        Ok(resolved)
    }

    async fn resolve_via_public_endpoint(&self, name: &str) -> Result<Option<Address>, FetchError> {
        let descriptor = RequestDescriptor::get(format!("{}{}", self.ens_resolve_url, name)).uncached();
        let payload = self
            .pipeline
            .execute(&descriptor, 0, self.pipeline.config().initial_backoff)
            .await?;
        let resolution: PublicResolution = serde_json::from_value(payload)
            .map_err(|e| FetchError::InvalidResponse(format!("ENS endpoint: {}", e)))?;

        match resolution.address {
            Some(raw) => {
                let address = Address::from_str(&raw)
                    .map_err(|e| FetchError::InvalidResponse(format!("ENS endpoint address {}: {}", raw, e)))?;
                Ok((!address.is_zero()).then_some(address))
            }
            None => Ok(None),
        }
    }

    async fn resolve_on_chain(&self, name: &str) -> Result<Address, FetchError> {
        let node = hex::encode(namehash(name));

        let resolver = self
            .eth_call(ENS_REGISTRY, &format!("0x{}{}", RESOLVER_SELECTOR, node))
            .await?;
        if resolver.is_zero() {
            return Err(FetchError::NotFound(format!("no resolver for {}", name)));
        }

        let address = self
            .eth_call(&format!("{:?}", resolver), &format!("0x{}{}", ADDR_SELECTOR, node))
            .await?;
        if address.is_zero() {
            return Err(FetchError::NotFound(format!("{} is not resolved", name)));
        }
        Ok(address)
    }

    /// `eth_call` returning a single address-typed word.
    async fn eth_call(&self, to: &str, data: &str) -> Result<Address, FetchError> {
        let result = self
            .rpc("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        let word = result
            .as_str()
            .ok_or_else(|| FetchError::InvalidResponse("eth_call returned a non-string result".to_string()))?;
        address_from_word(word)
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, FetchError> {
        self.block_number(self.pipeline.config().max_retries).await
    }

    /// Single-attempt `eth_blockNumber` for liveness checks.
    pub async fn check_node(&self) -> Result<u64, FetchError> {
        self.block_number(0).await
    }

    async fn block_number(&self, max_retries: u32) -> Result<u64, FetchError> {
        let result = self.rpc_with_retries("eth_blockNumber", json!([]), max_retries).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| FetchError::InvalidResponse("eth_blockNumber returned a non-string result".to_string()))?;
        parse_hex_u64(hex)
    }

    pub async fn get_transaction_count(&self, address: Address) -> Result<u64, FetchError> {
        let result = self
            .rpc("eth_getTransactionCount", json!([format!("{:?}", address), "latest"]))
            .await?;
        let hex = result.as_str().ok_or_else(|| {
            FetchError::InvalidResponse("eth_getTransactionCount returned a non-string result".to_string())
        })?;
        parse_hex_u64(hex)
    }

    pub fn clear_cache(&self) {
        self.pipeline.clear_cache();
    }

    pub async fn status(&self) -> PipelineStatus {
        self.pipeline.status().await
    }
}

fn unknown_token() -> TokenMetadata {
    TokenMetadata {
        symbol: "UNKNOWN".to_string(),
        name: "Unknown Token".to_string(),
        decimals: 18,
        logo_url: None,
    }
}

fn material_balance(
    contract_address: String,
    raw_balance: U256,
    metadata: TokenMetadata,
) -> Option<TokenBalance> {
    let quantity = units_to_f64(raw_balance, metadata.decimals);
    if quantity <= MATERIALITY_THRESHOLD {
        return None;
    }

    Some(TokenBalance {
        contract_address,
        raw_balance,
        decimals: metadata.decimals,
        symbol: metadata.symbol,
        name: metadata.name,
        logo_url: metadata.logo_url,
        quantity,
    })
}

/// Address held in the low 20 bytes of a 32-byte ABI word. An empty
/// result (`0x`, no contract code) reads as the zero address.
pub fn address_from_word(word: &str) -> Result<Address, FetchError> {
    let digits = word.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(Address::zero());
    }

    let bytes = hex::decode(digits)
        .map_err(|e| FetchError::InvalidResponse(format!("bad ABI word {}: {}", word, e)))?;
    if bytes.len() < 20 {
        return Err(FetchError::InvalidResponse(format!("ABI word too short: {}", word)));
    }
    Ok(Address::from_slice(&bytes[bytes.len() - 20..]))
}

pub fn default_token_logo(symbol: &str) -> Option<&'static str> {
    let logo = match symbol.to_uppercase().as_str() {
        "USDC" => "https://assets.coingecko.com/coins/images/6319/thumb/USD_Coin_icon.png",
        "USDT" => "https://assets.coingecko.com/coins/images/325/thumb/Tether.png",
        "DAI" => "https://assets.coingecko.com/coins/images/9956/thumb/4943.png",
        "WETH" => "https://assets.coingecko.com/coins/images/2518/thumb/weth.png",
        "UNI" => "https://assets.coingecko.com/coins/images/12504/thumb/uniswap-uni.png",
        "LINK" => "https://assets.coingecko.com/coins/images/877/thumb/chainlink-new-logo.png",
        "WBTC" => "https://assets.coingecko.com/coins/images/7598/thumb/wrapped_bitcoin_wbtc.png",
        _ => return None,
    };
    Some(logo)
}
