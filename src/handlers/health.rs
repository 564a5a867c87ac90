use crate::{handlers::AppState, models::HealthStatus};
use axum::{extract::State, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let (store_ok, node_ok) = tokio::join!(
        state.persistent.ping(),
        state.blockchain.check_node(),
    );
    let node_ok = node_ok.is_ok();

    let status = if store_ok && node_ok {
        "healthy"
    } else if node_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        persistent_store: store_ok,
        node_rpc: node_ok,
        uptime_seconds: state.dashboard.uptime_seconds(),
        timestamp: Utc::now(),
    })
}
