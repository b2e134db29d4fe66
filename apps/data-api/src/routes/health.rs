use axum::routing::get;
use axum::{extract::State, Json, Router};

use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = state.store.ping().await;
    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        db_ok,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
