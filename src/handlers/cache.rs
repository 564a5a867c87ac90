use crate::{
    handlers::AppState,
    models::{ApiResponse, CacheCleared, DataSource},
};
use axum::{extract::State, Json};

pub async fn clear_cache(State(state): State<AppState>) -> Json<ApiResponse<CacheCleared>> {
    let persisted_entries_removed = state.dashboard.clear_caches().await;
    Json(ApiResponse::new(
        CacheCleared { persisted_entries_removed },
        DataSource::Live,
    ))
}
