use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::MissedTickBehavior;

use crate::anomaly::{build_baseline, score_anomalies};
use crate::config::Config;
use crate::ingest::CycleSummary;
use crate::measurement::SeriesPoint;
use crate::store::Store;

/// Split [start, end) into consecutive windows of at most `step_hours`.
pub fn chunk_time_ranges(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_hours: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = ChronoDuration::hours(step_hours.max(1));
    let mut ranges = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = std::cmp::min(cursor + step, end);
        ranges.push((cursor, next));
        cursor = next;
    }
    ranges
}

async fn fetch_history(
    store: &Store,
    metric: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SeriesPoint>> {
    let mut rows = Vec::new();
    for (window_start, window_end) in chunk_time_ranges(start, end, 24) {
        let chunk = store.fetch_series(metric, window_start, window_end).await?;
        tracing::debug!(
            rows = chunk.len(),
            start = %window_start,
            end = %window_end,
            "fetched history window"
        );
        rows.extend(chunk);
    }
    Ok(rows)
}

/// One detection pass: build the baseline from the lookback window (strictly
/// before the evaluation boundary), score the evaluation window against it,
/// and persist the flagged deviations.
pub async fn detection_cycle(store: &Store, config: &Config) -> Result<CycleSummary> {
    let started = Instant::now();

    let now = Utc::now();
    let history_start = now - ChronoDuration::days(config.anomaly_lookback_days);
    let eval_start = now - ChronoDuration::hours(config.anomaly_eval_hours);

    let rows = fetch_history(store, &config.anomaly_metric, history_start, now).await?;
    tracing::info!(rows = rows.len(), metric = %config.anomaly_metric, "fetched detection history");

    let baseline = build_baseline(&rows, eval_start, config.anomaly_min_samples);
    tracing::info!(buckets = baseline.len(), "baseline built");

    let anomalies = score_anomalies(&rows, eval_start, &baseline, config.anomaly_z_threshold);
    tracing::info!(
        anomalies = anomalies.len(),
        threshold = config.anomaly_z_threshold,
        "scored evaluation window"
    );

    let rows_written = store.insert_anomalies(&anomalies).await?;
    Ok(CycleSummary {
        rows_written,
        duration: started.elapsed(),
    })
}

/// Run detection passes forever on the configured interval.
pub async fn run_detection_loop(store: Store, config: Config) {
    let mut ticker = tokio::time::interval(config.detect_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let started = Instant::now();
        match detection_cycle(&store, &config).await {
            Ok(summary) => tracing::info!(
                rows = summary.rows_written,
                duration_ms = summary.duration.as_millis() as u64,
                errors = 0,
                "anomaly_detection_cycle complete"
            ),
            Err(err) => tracing::error!(
                error = %err,
                duration_ms = started.elapsed().as_millis() as u64,
                errors = 1,
                "anomaly_detection_cycle failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::chunk_time_ranges;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn chunks_cover_the_range_without_overlap() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let end = start + Duration::hours(60);
        let ranges = chunk_time_ranges(start, end, 24);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], (start, start + Duration::hours(24)));
        assert_eq!(
            ranges[2],
            (start + Duration::hours(48), end),
            "last chunk is clamped to the range end"
        );
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn empty_range_yields_no_chunks() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        assert!(chunk_time_ranges(start, start, 24).is_empty());
    }
}
