use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};

use powersense_ingest::measurement::{Measurement, StoredMeasurement};
use powersense_ingest::store::MeasurementFilter;

use crate::error::{bad_request, internal_error};
use crate::state::AppState;

const MAX_LIMIT: i64 = 5_000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct MeasurementsQuery {
    start_ts: Option<DateTime<Utc>>,
    end_ts: Option<DateTime<Utc>>,
    source: Option<String>,
    metric: Option<String>,
    ukey: Option<String>,
    limit: Option<i64>,
    order: Option<String>,
}

pub(crate) fn resolve_limit(limit: Option<i64>) -> Result<i64, (StatusCode, String)> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(bad_request(format!("limit must be in 1..={MAX_LIMIT}")));
    }
    Ok(limit)
}

pub(crate) fn resolve_descending(order: Option<&str>) -> Result<bool, (StatusCode, String)> {
    match order.map(str::trim) {
        None | Some("") | Some("desc") => Ok(true),
        Some("asc") => Ok(false),
        Some(other) => Err(bad_request(format!(
            "order must be 'asc' or 'desc', got '{other}'"
        ))),
    }
}

pub(crate) async fn list_measurements(
    State(state): State<AppState>,
    Query(query): Query<MeasurementsQuery>,
) -> Result<Json<Vec<StoredMeasurement>>, (StatusCode, String)> {
    let filter = MeasurementFilter {
        start_ts: query.start_ts,
        end_ts: query.end_ts,
        source: query.source,
        metric: query.metric,
        ukey: query.ukey,
        limit: resolve_limit(query.limit)?,
        descending: resolve_descending(query.order.as_deref())?,
    };
    let rows = state
        .store
        .fetch_measurements(&filter)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct LatestQuery {
    ukey: Option<String>,
    limit: Option<i64>,
    order: Option<String>,
}

pub(crate) async fn list_latest_measurements(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<Vec<StoredMeasurement>>, (StatusCode, String)> {
    let limit = resolve_limit(query.limit)?;
    let descending = resolve_descending(query.order.as_deref())?;
    let rows = state
        .store
        .fetch_latest_measurements(query.ukey.as_deref(), limit, descending)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct CountResponse {
    count: i64,
}

pub(crate) async fn count_measurements(
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, (StatusCode, String)> {
    let count = state
        .store
        .count_measurements()
        .await
        .map_err(internal_error)?;
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct MeasurementIn {
    ts: DateTime<Utc>,
    source: Option<String>,
    metric: String,
    value: Option<f64>,
    perimetre: Option<String>,
    nature: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct InsertRequest {
    rows: Vec<MeasurementIn>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct IngestResponse {
    inserted: usize,
}

/// Direct ingestion surface: rows go through the same reconciliation path
/// as the worker, so resubmitting identical payloads writes nothing.
pub(crate) async fn ingest_measurements(
    State(state): State<AppState>,
    Json(payload): Json<InsertRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let default_source = state.config.default_source.clone();
    let rows: Vec<Measurement> = payload
        .rows
        .into_iter()
        .map(|m| {
            let perimetre = m
                .perimetre
                .or_else(|| m.source.clone())
                .unwrap_or_else(|| default_source.clone());
            Measurement {
                ts: m.ts,
                source: m.source.unwrap_or_else(|| perimetre.clone()),
                metric: m.metric,
                value: Measurement::clean_value(m.value),
                perimetre,
                nature: m.nature,
            }
        })
        .collect();
    let inserted = state
        .store
        .insert_measurements(&rows)
        .await
        .map_err(internal_error)?;
    Ok(Json(IngestResponse { inserted }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/measurements", get(list_measurements))
        .route("/measurements/latest", get(list_latest_measurements))
        .route("/measurements/count", get(count_measurements))
        .route("/measurements/ingest", post(ingest_measurements))
}

#[cfg(test)]
mod tests {
    use super::{resolve_descending, resolve_limit, InsertRequest};

    #[test]
    fn insert_payload_carries_rows_field() {
        let payload: InsertRequest = serde_json::from_value(serde_json::json!({
            "rows": [
                {"ts": "2026-02-03T10:15:00Z", "metric": "consommation", "value": 61250.0}
            ]
        }))
        .unwrap();
        assert_eq!(payload.rows.len(), 1);
        assert_eq!(payload.rows[0].metric, "consommation");
        assert_eq!(payload.rows[0].value, Some(61250.0));

        let bare: Result<InsertRequest, _> =
            serde_json::from_value(serde_json::json!([{"metric": "consommation"}]));
        assert!(bare.is_err(), "a bare array is not the ingest contract");
    }

    #[test]
    fn limit_defaults_and_bounds() {
        assert_eq!(resolve_limit(None).unwrap(), 100);
        assert_eq!(resolve_limit(Some(5_000)).unwrap(), 5_000);
        assert!(resolve_limit(Some(0)).is_err());
        assert!(resolve_limit(Some(5_001)).is_err());
        assert!(resolve_limit(Some(-5)).is_err());
    }

    #[test]
    fn order_parses_or_rejects_and_defaults_to_descending() {
        assert!(resolve_descending(None).unwrap());
        assert!(resolve_descending(Some("")).unwrap());
        assert!(!resolve_descending(Some("asc")).unwrap());
        assert!(resolve_descending(Some("desc")).unwrap());
        assert!(resolve_descending(Some("sideways")).is_err());
    }
}
