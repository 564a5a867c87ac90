use crate::{
    handlers::AppState,
    models::{ApiResponse, DataSource, WalletConnection},
};
use axum::{extract::State, Json};

pub async fn wallet_connection(State(state): State<AppState>) -> Json<ApiResponse<WalletConnection>> {
    let connected = state.persistent.is_connected().await;
    Json(ApiResponse::new(WalletConnection { connected }, DataSource::Persisted))
}

pub async fn connect_wallet(State(state): State<AppState>) -> Json<ApiResponse<WalletConnection>> {
    set_connection(&state, true).await
}

pub async fn disconnect_wallet(State(state): State<AppState>) -> Json<ApiResponse<WalletConnection>> {
    set_connection(&state, false).await
}

async fn set_connection(state: &AppState, connected: bool) -> Json<ApiResponse<WalletConnection>> {
    state.persistent.set_connected(connected).await;
    tracing::info!("Wallet {}", if connected { "connected" } else { "disconnected" });
    Json(ApiResponse::new(WalletConnection { connected }, DataSource::Live))
}
