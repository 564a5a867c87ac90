use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uber_wallet::{
    config::Config,
    handlers::{
        clear_cache, connect_wallet, disconnect_wallet, get_stats, global_stats, health_check,
        lookup_portfolio, top_markets, trending_coins, wallet_connection, websocket_handler,
        AppState,
    },
    services::{
        BlockchainGateway, DashboardService, MarketDataGateway, PersistentCache, PortfolioService,
        RequestPipeline, ReqwestTransport, Transport,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting UberWallet API v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    // Initialize services
    let persistent = Arc::new(PersistentCache::connect(&config.redis_url, config.cache_prefix.clone()).await);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());

    let market_pipeline = Arc::new(RequestPipeline::new(config.market_pipeline(), transport.clone()));
    let chain_pipeline = Arc::new(RequestPipeline::new(config.chain_pipeline(), transport));

    let market = Arc::new(MarketDataGateway::new(
        config.market_api_url.clone(),
        market_pipeline,
        persistent.clone(),
    ));
    let blockchain = Arc::new(BlockchainGateway::new(
        config.node_rpc_url.clone(),
        config.ens_resolve_url.clone(),
        chain_pipeline,
    ));
    let portfolio = Arc::new(PortfolioService::new(blockchain.clone(), market.clone()));
    let dashboard = Arc::new(DashboardService::new(
        market.clone(),
        blockchain.clone(),
        persistent.clone(),
        config.top_markets_limit,
        config.refresh_interval(),
    ));

    if persistent.is_connected().await {
        tracing::info!("Wallet connection flag is set");
    }

    dashboard.refresh().await;
    let auto_refresh = dashboard.spawn_auto_refresh();

    let app_state = AppState {
        market,
        blockchain,
        portfolio,
        dashboard,
        persistent,
        top_markets_limit: config.top_markets_limit,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/api/market/global", get(global_stats))
        .route("/api/market/top", get(top_markets))
        .route("/api/market/trending", get(trending_coins))
        .route("/api/portfolio/:input", get(lookup_portfolio))
        .route("/api/cache/clear", post(clear_cache))
        .route(
            "/api/wallet/connection",
            get(wallet_connection)
                .post(connect_wallet)
                .delete(disconnect_wallet),
        )
        .route("/ws/dashboard", get(websocket_handler))
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(true)),
                )
                .layer(CorsLayer::permissive()),
        );

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("WebSocket dashboard: ws://{}/ws/dashboard", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    auto_refresh.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        return;
    }
    tracing::info!("Shutting down gracefully...");
}
