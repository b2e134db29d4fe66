pub mod anomalies;
pub mod health;
pub mod measurements;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(measurements::router())
        .merge(anomalies::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
