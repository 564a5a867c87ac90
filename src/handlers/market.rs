use crate::{
    error::UberWalletError,
    handlers::AppState,
    models::{ApiResponse, CoinMarket, GlobalStats, TrendingCoin},
};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

/// Largest page the market API serves.
const MAX_MARKETS_LIMIT: u32 = 250;

#[derive(Debug, Deserialize)]
pub struct TopMarketsQuery {
    pub limit: Option<u32>,
}

pub async fn global_stats(State(state): State<AppState>) -> Json<ApiResponse<GlobalStats>> {
    let stats = state.market.fetch_global_stats().await;
    Json(ApiResponse::new(stats.value, stats.source))
}

pub async fn top_markets(
    State(state): State<AppState>,
    Query(query): Query<TopMarketsQuery>,
) -> Result<Json<ApiResponse<Vec<CoinMarket>>>, UberWalletError> {
    let limit = query.limit.unwrap_or(state.top_markets_limit);
    if limit == 0 || limit > MAX_MARKETS_LIMIT {
        return Err(UberWalletError::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_MARKETS_LIMIT
        )));
    }

    let markets = state.market.fetch_top_markets(limit).await;
    Ok(Json(ApiResponse::new(markets.value, markets.source)))
}

pub async fn trending_coins(State(state): State<AppState>) -> Json<ApiResponse<Vec<TrendingCoin>>> {
    let trending = state.market.fetch_trending_coins().await;
    Json(ApiResponse::new(trending.value, trending.source))
}
