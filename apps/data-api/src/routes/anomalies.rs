use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};

use powersense_ingest::measurement::StoredAnomaly;
use powersense_ingest::store::AnomalyFilter;

use crate::error::internal_error;
use crate::routes::measurements::{resolve_descending, resolve_limit};
use crate::state::AppState;

#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct AnomaliesQuery {
    start_ts: Option<DateTime<Utc>>,
    end_ts: Option<DateTime<Utc>>,
    source: Option<String>,
    metric: Option<String>,
    limit: Option<i64>,
    order: Option<String>,
}

pub(crate) async fn list_anomalies(
    State(state): State<AppState>,
    Query(query): Query<AnomaliesQuery>,
) -> Result<Json<Vec<StoredAnomaly>>, (StatusCode, String)> {
    let filter = AnomalyFilter {
        start_ts: query.start_ts,
        end_ts: query.end_ts,
        source: query.source,
        metric: query.metric,
        limit: resolve_limit(query.limit)?,
        descending: resolve_descending(query.order.as_deref())?,
    };
    let rows = state
        .store
        .fetch_anomalies(&filter)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/anomalies", get(list_anomalies))
}
