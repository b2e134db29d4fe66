use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ukey;

/// One observed value of one metric at one instant, post-normalization.
/// The rest of the pipeline never touches untyped field bags.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub metric: String,
    pub value: Option<f64>,
    pub perimetre: String,
    pub nature: Option<String>,
}

impl Measurement {
    /// Collapse every null-like representation (NaN, infinities) into `None`.
    pub fn clean_value(value: Option<f64>) -> Option<f64> {
        value.filter(|v| v.is_finite())
    }

    pub fn ukey(&self) -> String {
        ukey::format_ukey(
            self.ts,
            &self.perimetre,
            self.nature.as_deref(),
            &self.metric,
        )
    }
}

/// A measurement accepted by the reconciler, ready to persist.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedRow {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub metric: String,
    pub value: Option<f64>,
    pub ukey: String,
    pub version: i64,
}

/// A persisted measurement row as read back from the store.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct StoredMeasurement {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub metric: String,
    pub value: Option<f64>,
    pub ukey: String,
    pub version: i64,
    pub inserted_at: DateTime<Utc>,
}

/// Minimal row shape used by the detection path.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SeriesPoint {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub metric: String,
    pub value: Option<f64>,
}

/// A flagged deviation produced by the scorer. Append-only; never
/// deduplicated against prior anomaly writes.
#[derive(Clone, Debug, PartialEq)]
pub struct AnomalyRecord {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub metric: String,
    pub value: f64,
    pub zscore: f64,
    pub mean: f64,
    pub std: f64,
    pub threshold: f64,
    pub dow: i16,
    pub hour: i16,
    pub minute: i16,
}

/// A persisted anomaly row as served by the data API.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct StoredAnomaly {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub metric: String,
    pub value: Option<f64>,
    pub zscore: f64,
    pub mean: f64,
    pub std: f64,
    pub threshold: f64,
    pub dow: i16,
    pub hour: i16,
    pub minute: i16,
    pub inserted_at: DateTime<Utc>,
}
