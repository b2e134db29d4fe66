use chrono::{DateTime, Utc};

use super::baseline::{Baseline, BucketKey};
use crate::measurement::{AnomalyRecord, SeriesPoint};

/// Score the evaluation window against the baseline. Rows with a missing
/// value, rows before `eval_start`, and rows without a scorable bucket
/// (insufficient history or undefined std) are silently excluded. Output
/// order carries no guarantee.
pub fn score_anomalies(
    rows: &[SeriesPoint],
    eval_start: DateTime<Utc>,
    baseline: &Baseline,
    threshold: f64,
) -> Vec<AnomalyRecord> {
    let mut anomalies = Vec::new();
    if baseline.is_empty() {
        return anomalies;
    }
    for row in rows {
        let Some(value) = row.value else { continue };
        if row.ts < eval_start {
            continue;
        }
        let key = BucketKey::from_timestamp(row.ts);
        let Some(bucket) = baseline.get(&key) else {
            continue;
        };
        let Some(std) = bucket.std else { continue };
        let zscore = (value - bucket.mean) / std;
        if zscore.abs() >= threshold {
            anomalies.push(AnomalyRecord {
                ts: row.ts,
                source: row.source.clone(),
                metric: row.metric.clone(),
                value,
                zscore,
                mean: bucket.mean,
                std,
                threshold,
                dow: key.dow as i16,
                hour: key.hour as i16,
                minute: key.minute as i16,
            });
        }
    }
    anomalies
}
