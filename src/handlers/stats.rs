use crate::{handlers::AppState, models::Stats};
use axum::{extract::State, Json};

pub async fn get_stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.dashboard.stats().await)
}
