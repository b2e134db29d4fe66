use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::measurement::SeriesPoint;

/// Seasonality cell: day-of-week (0 = Monday) by hour by minute. Bucketing
/// is per-minute, not smoothed across adjacent minutes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub dow: u8,
    pub hour: u8,
    pub minute: u8,
}

impl BucketKey {
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            dow: ts.weekday().num_days_from_monday() as u8,
            hour: ts.hour() as u8,
            minute: ts.minute() as u8,
        }
    }
}

/// Summary statistics for one bucket. `std` is `None` when undefined
/// (fewer than two samples, or exactly zero variance) so no caller can
/// divide by it.
#[derive(Clone, Debug)]
pub struct BaselineBucket {
    pub mean: f64,
    pub std: Option<f64>,
    pub samples: usize,
}

pub type Baseline = HashMap<BucketKey, BaselineBucket>;

/// Aggregate historical rows into the bucket table. Rows with a missing
/// value, or with a timestamp at or after `eval_start`, never inform the
/// baseline; buckets with fewer than `min_samples` rows are dropped.
/// Empty input yields an empty table, not an error.
pub fn build_baseline(
    rows: &[SeriesPoint],
    eval_start: DateTime<Utc>,
    min_samples: usize,
) -> Baseline {
    let mut grouped: HashMap<BucketKey, Vec<f64>> = HashMap::new();
    for row in rows {
        let Some(value) = row.value else { continue };
        if row.ts >= eval_start {
            continue;
        }
        grouped
            .entry(BucketKey::from_timestamp(row.ts))
            .or_default()
            .push(value);
    }

    let mut baseline = Baseline::with_capacity(grouped.len());
    for (key, values) in grouped {
        let samples = values.len();
        if samples < min_samples {
            continue;
        }
        let mean = values.iter().sum::<f64>() / samples as f64;
        baseline.insert(
            key,
            BaselineBucket {
                mean,
                std: sample_std(&values, mean),
                samples,
            },
        );
    }
    baseline
}

/// Sample standard deviation (n - 1 denominator).
fn sample_std(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance = values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        None
    } else {
        Some(std)
    }
}
