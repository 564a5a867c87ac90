use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeBalance {
    pub wei: U256,
    /// Exact decimal string of `wei / 10^18`.
    pub formatted: String,
    pub ether: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub contract_address: String,
    /// Balance in base units.
    pub raw_balance: U256,
    pub decimals: u8,
    pub symbol: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHolding {
    #[serde(flatten)]
    pub token: TokenBalance,
    pub price_usd: f64,
    pub value_usd: f64,
    /// Share of the portfolio's total USD value, 0-100.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub address: String,
    pub ens_name: Option<String>,
    pub native_balance: NativeBalance,
    pub native_balance_usd: f64,
    pub native_price_usd: f64,
    /// Sorted descending by `value_usd`.
    pub tokens: Vec<TokenHolding>,
    pub total_value_usd: f64,
    pub fetched_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}
