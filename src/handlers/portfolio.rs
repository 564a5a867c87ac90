use crate::{
    error::UberWalletError,
    handlers::AppState,
    models::{ApiResponse, DataSource, PortfolioSnapshot},
};
use axum::{
    extract::{Path, State},
    Json,
};

pub async fn lookup_portfolio(
    State(state): State<AppState>,
    Path(input): Path<String>,
) -> Result<Json<ApiResponse<PortfolioSnapshot>>, UberWalletError> {
    let snapshot = state.portfolio.lookup(&input).await?;
    Ok(Json(ApiResponse::new(snapshot, DataSource::Live)))
}
