mod common;

use common::*;
use ethers::utils::to_checksum;
use mockito::Server;
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uber_wallet::error::UberWalletError;
use uber_wallet::services::{AddressInput, PortfolioService};

fn service(base_url: &str) -> PortfolioService {
    PortfolioService::new(
        Arc::new(blockchain_gateway(base_url)),
        Arc::new(market_gateway(base_url, persistent())),
    )
}

#[tokio::test]
async fn vitalik_resolves_with_every_source_down() {
    // nothing is mocked: every upstream call gets a 501
    let server = Server::new_async().await;
    let service = service(&server.url());

    let target = assert_ok!(AddressInput::parse("vitalik.eth"));
    let (address, name) = assert_ok!(service.resolve_input(&target).await);

    assert_eq!(
        to_checksum(&address, None),
        "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
    );
    assert_eq!(name.as_deref(), Some("vitalik.eth"));
}

#[tokio::test]
async fn unknown_name_with_sources_down_is_an_error() {
    let server = Server::new_async().await;
    let service = service(&server.url());

    let err = assert_err!(service.lookup("somebody-else.eth").await);
    assert!(matches!(err, UberWalletError::Lookup { .. }));
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_call() {
    let server = Server::new_async().await;
    let service = service(&server.url());

    let err = assert_err!(service.lookup("0xnot-an-address").await);
    assert!(matches!(err, UberWalletError::InvalidInput(_)));
}

#[tokio::test]
async fn portfolio_is_valued_and_sorted() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/ens/resolve/test.eth")
        .with_status(200)
        .with_body(json!({"address": "0x1234567890123456789012345678901234567890"}).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/rpc")
        .match_body(rpc_method("eth_getBalance"))
        .with_status(200)
        // 0.5 ETH
        .with_body(rpc_result(json!("0x6f05b59d3b20000")))
        .create_async()
        .await;
    server
        .mock("POST", "/rpc")
        .match_body(rpc_method("alchemy_getTokenBalances"))
        .with_status(200)
        .with_body(rpc_result(json!({"tokenBalances": [
            // 250 LINK
            {"contractAddress": "0x514910771af9ca656af840dff83e8264ecf986ca", "tokenBalance": "0xd8d726b7177a80000"},
            // 2000 DAI
            {"contractAddress": "0x6b175474e89094c44da98b954eedeac495271d0f", "tokenBalance": "0x6c6b935b8bbd400000"},
            // 0.5 UNI, worth 4.25 USD
            {"contractAddress": "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", "tokenBalance": "0x6f05b59d3b20000"}
        ]})))
        .create_async()
        .await;
    for (contract, symbol, name) in [
        ("0x514910771af9ca656af840dff83e8264ecf986ca", "LINK", "ChainLink Token"),
        ("0x6b175474e89094c44da98b954eedeac495271d0f", "DAI", "Dai Stablecoin"),
        ("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984", "UNI", "Uniswap"),
    ] {
        server
            .mock("POST", "/rpc")
            .match_body(mockito::Matcher::AllOf(vec![
                rpc_method("alchemy_getTokenMetadata"),
                mockito::Matcher::Regex(contract.to_string()),
            ]))
            .with_status(200)
            .with_body(rpc_result(json!({"symbol": symbol, "name": name, "decimals": 18})))
            .create_async()
            .await;
    }
    server
        .mock("GET", "/coins/markets")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body(listing_payload().to_string())
        .create_async()
        .await;

    let snapshot = assert_ok!(service(&server.url()).lookup("test.eth").await);

    assert_eq!(snapshot.address, "0x1234567890123456789012345678901234567890");
    assert_eq!(snapshot.ens_name.as_deref(), Some("test.eth"));
    assert_eq!(snapshot.native_price_usd, 3900.0);
    assert_eq!(snapshot.native_balance_usd, 1950.0);

    let symbols: Vec<&str> = snapshot.tokens.iter().map(|h| h.token.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["LINK", "DAI", "UNI"]);
    assert_eq!(snapshot.tokens[0].value_usd, 3687.5);
    assert_eq!(snapshot.total_value_usd, 1950.0 + 3687.5 + 2000.0 + 4.25);

    let share: f64 = snapshot.tokens.iter().map(|h| h.percentage).sum();
    let native_share = snapshot.native_balance_usd / snapshot.total_value_usd * 100.0;
    assert!((share + native_share - 100.0).abs() < 1e-9);
}
