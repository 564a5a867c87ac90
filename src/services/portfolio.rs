use chrono::Utc;
use ethers::types::Address;
use ethers::utils::to_checksum;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::UberWalletError;
use crate::models::{PortfolioSnapshot, TokenBalance, TokenHolding};
use crate::services::{BlockchainGateway, MarketDataGateway};

/// Holdings worth this much USD or less are left out of the snapshot.
const MIN_HOLDING_VALUE_USD: f64 = 1.0;
const DEFAULT_ETH_PRICE_USD: f64 = 3200.0;
/// The ETH price is read from this many top markets.
const PRICE_LOOKUP_LIMIT: u32 = 5;

/// Names that resolve even when every resolution source is down.
const KNOWN_NAMES: &[(&str, &str)] = &[
    ("vitalik.eth", "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"),
    ("test.eth", "0x1234567890123456789012345678901234567890"),
];

/// A user-supplied lookup target.
#[derive(Debug, Clone, PartialEq)]
pub enum AddressInput {
    Address(Address),
    EnsName(String),
}

impl AddressInput {
    pub fn parse(input: &str) -> Result<Self, UberWalletError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(UberWalletError::InvalidInput(
                "Please enter an address or ENS name".to_string(),
            ));
        }

        if input.contains(".eth") {
            return if is_valid_ens_name(input) {
                Ok(AddressInput::EnsName(input.to_lowercase()))
            } else {
                Err(UberWalletError::InvalidInput(format!(
                    "Invalid ENS name format: {}",
                    input
                )))
            };
        }

        if is_valid_address(input) {
            let address = Address::from_str(input)
                .map_err(|e| UberWalletError::InvalidInput(format!("{}: {}", input, e)))?;
            return Ok(AddressInput::Address(address));
        }

        Err(UberWalletError::InvalidInput(format!(
            "Invalid address format: {}",
            input
        )))
    }
}

fn is_valid_address(input: &str) -> bool {
    match input.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn is_valid_ens_name(input: &str) -> bool {
    match input.strip_suffix(".eth") {
        Some(label) => {
            input.len() >= 7
                && !label.is_empty()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        None => false,
    }
}

pub fn known_address(name: &str) -> Option<Address> {
    KNOWN_NAMES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .and_then(|(_, address)| Address::from_str(address).ok())
}

pub fn known_name(address: Address) -> Option<&'static str> {
    KNOWN_NAMES
        .iter()
        .find(|(_, known)| Address::from_str(known).map(|a| a == address).unwrap_or(false))
        .map(|(name, _)| *name)
}

/// Static USD reference prices; unlisted tokens count as 1 USD.
pub fn token_price_usd(symbol: &str) -> f64 {
    match symbol.to_uppercase().as_str() {
        "USDC" | "USDT" | "DAI" => 1.0,
        "WETH" => 3200.0,
        "UNI" => 8.5,
        "LINK" => 14.75,
        "WBTC" => 65000.0,
        _ => 1.0,
    }
}

/// Prices each token, keeps those above the minimum value and returns them
/// sorted by value together with the portfolio total (native included).
fn value_holdings(native_value_usd: f64, tokens: Vec<TokenBalance>) -> (Vec<TokenHolding>, f64) {
    let mut holdings: Vec<TokenHolding> = tokens
        .into_iter()
        .filter_map(|token| {
            let price_usd = token_price_usd(&token.symbol);
            let value_usd = token.quantity * price_usd;
            (value_usd > MIN_HOLDING_VALUE_USD).then_some(TokenHolding {
                token,
                price_usd,
                value_usd,
                percentage: 0.0,
            })
        })
        .collect();

    let total = native_value_usd + holdings.iter().map(|h| h.value_usd).sum::<f64>();
    if total > 0.0 {
        for holding in &mut holdings {
            holding.percentage = holding.value_usd / total * 100.0;
        }
    }
    holdings.sort_by(|a, b| b.value_usd.total_cmp(&a.value_usd));

    (holdings, total)
}

/// Public address lookup and portfolio valuation.
pub struct PortfolioService {
    blockchain: Arc<BlockchainGateway>,
    market: Arc<MarketDataGateway>,
}

impl PortfolioService {
    pub fn new(blockchain: Arc<BlockchainGateway>, market: Arc<MarketDataGateway>) -> Self {
        Self { blockchain, market }
    }

    pub async fn lookup(&self, input: &str) -> Result<PortfolioSnapshot, UberWalletError> {
        let target = AddressInput::parse(input)?;
        let (address, ens_name) = self.resolve_input(&target).await?;
        tracing::info!("Looking up portfolio for {:?}", address);

        let (native_balance, token_balances) = tokio::try_join!(
            self.blockchain.get_native_balance(address),
            self.blockchain.get_token_balances(address),
        )
        .map_err(UberWalletError::lookup("fetch portfolio balances"))?;

        let native_price_usd = self.eth_price_usd().await;
        let native_balance_usd = native_balance.ether * native_price_usd;
        let (tokens, total_value_usd) = value_holdings(native_balance_usd, token_balances);

        tracing::info!(
            "Portfolio {:?}: ${:.2} across {} token(s)",
            address,
            total_value_usd,
            tokens.len()
        );

        Ok(PortfolioSnapshot {
            address: to_checksum(&address, None),
            ens_name: ens_name.or_else(|| known_name(address).map(str::to_string)),
            native_balance,
            native_balance_usd,
            native_price_usd,
            tokens,
            total_value_usd,
            fetched_at: Utc::now(),
        })
    }

    /// The address to look up and the ENS name it came from, if any.
    pub async fn resolve_input(
        &self,
        input: &AddressInput,
    ) -> Result<(Address, Option<String>), UberWalletError> {
        match input {
            AddressInput::Address(address) => Ok((*address, None)),
            AddressInput::EnsName(name) => {
                let address = self.resolve_name(name).await?;
                Ok((address, Some(name.clone())))
            }
        }
    }

    async fn resolve_name(&self, name: &str) -> Result<Address, UberWalletError> {
        match self.blockchain.resolve_name(name).await {
            Ok(address) => Ok(address),
            Err(e) => match known_address(name) {
                Some(address) => {
                    tracing::warn!("ENS resolution failed ({}), using known address for {}", e, name);
                    Ok(address)
                }
                None => Err(UberWalletError::lookup("resolve ENS name")(e)),
            },
        }
    }

    async fn eth_price_usd(&self) -> f64 {
        let markets = self.market.fetch_top_markets(PRICE_LOOKUP_LIMIT).await;
        markets
            .value
            .iter()
            .find(|coin| coin.id == "ethereum")
            .and_then(|coin| coin.current_price)
            .unwrap_or(DEFAULT_ETH_PRICE_USD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::services::pipeline::testing::{ScriptedTransport, Step};
    use crate::services::pipeline::{TransportError, TransportResponse};
    use crate::services::{
        MemoryStore, PersistentCache, PipelineConfig, RequestDescriptor, RequestPipeline, Transport,
    };
    use async_trait::async_trait;
    use ethers::types::U256;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Answers JSON-RPC calls by method name, whatever order they arrive in.
    struct RpcRouter(HashMap<&'static str, Value>);

    #[async_trait]
    impl Transport for RpcRouter {
        async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
            let method = request
                .body
                .as_ref()
                .and_then(|body| body["method"].as_str())
                .unwrap_or_default();
            Ok(match self.0.get(method) {
                Some(result) => TransportResponse {
                    status: 200,
                    body: json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string(),
                },
                None => TransportResponse { status: 501, body: String::new() },
            })
        }
    }

    fn token(symbol: &str, quantity: f64) -> TokenBalance {
        TokenBalance {
            contract_address: format!("0x{}", symbol.to_lowercase()),
            raw_balance: U256::zero(),
            decimals: 18,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            logo_url: None,
            quantity,
        }
    }

    fn pipeline(name: &str, transport: Arc<dyn Transport>) -> Arc<RequestPipeline> {
        Arc::new(RequestPipeline::new(
            PipelineConfig {
                name: name.to_string(),
                min_interval: Duration::ZERO,
                max_retries: 0,
                ..PipelineConfig::default()
            },
            transport,
        ))
    }

    fn service(chain: Arc<dyn Transport>, market: Arc<dyn Transport>) -> PortfolioService {
        let persistent = Arc::new(PersistentCache::new(Arc::new(MemoryStore::new()), "test_"));
        let blockchain = BlockchainGateway::new(
            "https://rpc.test",
            "https://ens.test/resolve/",
            pipeline("blockchain", chain),
        );
        let market = MarketDataGateway::new("https://market.test", pipeline("market", market), persistent);
        PortfolioService::new(Arc::new(blockchain), Arc::new(market))
    }

    #[test]
    fn parses_addresses_and_names() {
        let input = AddressInput::parse(" 0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045 ").unwrap();
        assert_eq!(input, AddressInput::Address(known_address("vitalik.eth").unwrap()));

        assert_eq!(
            AddressInput::parse("Vitalik.eth").unwrap(),
            AddressInput::EnsName("vitalik.eth".to_string())
        );
        assert_eq!(
            AddressInput::parse("my-name.eth").unwrap(),
            AddressInput::EnsName("my-name.eth".to_string())
        );
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "0x1234", "d8dA6BF26964aF9D7eEd9e03E53415D37aA96045", "a.eth", "bad_name.eth", "x.eth.com"] {
            assert!(
                matches!(AddressInput::parse(bad), Err(UberWalletError::InvalidInput(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn known_names_resolve_both_ways() {
        let vitalik = known_address("VITALIK.ETH").unwrap();
        assert_eq!(known_name(vitalik), Some("vitalik.eth"));
        assert_eq!(known_address("nobody.eth"), None);
    }

    #[test]
    fn holdings_are_filtered_weighted_and_sorted() {
        let (holdings, total) = value_holdings(
            3200.0,
            vec![token("USDC", 800.0), token("LINK", 0.05), token("WBTC", 0.1)],
        );

        // LINK is worth 0.74 USD and is dropped
        assert_eq!(
            holdings.iter().map(|h| h.token.symbol.as_str()).collect::<Vec<_>>(),
            vec!["WBTC", "USDC"]
        );
        assert_eq!(total, 3200.0 + 6500.0 + 800.0);
        assert!((holdings[0].percentage - 6500.0 / 10500.0 * 100.0).abs() < 1e-9);
        assert_eq!(holdings[1].price_usd, 1.0);
    }

    #[test]
    fn unknown_tokens_are_priced_at_one_dollar() {
        assert_eq!(token_price_usd("weth"), 3200.0);
        assert_eq!(token_price_usd("SHIB"), 1.0);
    }

    #[tokio::test]
    async fn known_name_is_used_when_resolution_is_down() {
        let chain = ScriptedTransport::new(vec![Step::Status(503), Step::Status(503)]);
        let market = ScriptedTransport::new(vec![]);
        let service = service(chain.clone(), market);

        let target = AddressInput::parse("vitalik.eth").unwrap();
        let (address, name) = service.resolve_input(&target).await.unwrap();

        assert_eq!(to_checksum(&address, None), "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        assert_eq!(name.as_deref(), Some("vitalik.eth"));
        assert_eq!(chain.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_name_failure_propagates() {
        let chain = ScriptedTransport::new(vec![Step::Status(503), Step::Status(503)]);
        let service = service(chain, ScriptedTransport::new(vec![]));

        let target = AddressInput::parse("nobody-here.eth").unwrap();
        let err = service.resolve_input(&target).await.unwrap_err();
        assert!(matches!(
            err,
            UberWalletError::Lookup { source: FetchError::Network { status: Some(503), .. }, .. }
        ));
    }

    #[tokio::test]
    async fn lookup_values_native_and_token_holdings() {
        let chain = Arc::new(RpcRouter(HashMap::from([
            ("eth_getBalance", json!("0xde0b6b3a7640000")),
            (
                "alchemy_getTokenBalances",
                json!({"tokenBalances": [
                    {"contractAddress": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "tokenBalance": "0x5f5e100"}
                ]}),
            ),
            ("alchemy_getTokenMetadata", json!({"symbol": "USDC", "name": "USD Coin", "decimals": 6})),
        ])));
        let market = ScriptedTransport::new(vec![Step::Ok(json!([
            {"id": "bitcoin", "symbol": "btc", "name": "Bitcoin", "current_price": 65000.0},
            {"id": "ethereum", "symbol": "eth", "name": "Ethereum", "current_price": 4000.0}
        ]))]);
        let service = service(chain, market);

        let snapshot = service
            .lookup("0xd8da6bf26964aF9D7eEd9e03E53415D37aA96045")
            .await
            .unwrap();

        assert_eq!(snapshot.address, "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
        assert_eq!(snapshot.ens_name.as_deref(), Some("vitalik.eth"));
        assert_eq!(snapshot.native_price_usd, 4000.0);
        assert_eq!(snapshot.native_balance_usd, 4000.0);
        assert_eq!(snapshot.token_count(), 1);
        assert_eq!(snapshot.tokens[0].value_usd, 100.0);
        assert_eq!(snapshot.total_value_usd, 4100.0);
    }
}
