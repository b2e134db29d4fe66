use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::fetch::UpstreamClient;
use crate::normalize;
use crate::store::Store;

/// Outcome of one pass, surfaced to the scheduling layer through logs.
#[derive(Clone, Copy, Debug)]
pub struct CycleSummary {
    pub rows_written: usize,
    pub duration: Duration,
}

/// One ingestion pass: fetch the recent window, normalize every record,
/// reconcile against latest state and persist the changes.
pub async fn ingest_cycle(
    client: &UpstreamClient,
    store: &Store,
    default_source: &str,
) -> Result<CycleSummary> {
    let started = Instant::now();

    let results = client.fetch_all().await?;
    tracing::info!(records = results.len(), "fetched upstream records");

    let mut rows = Vec::new();
    for rec in &results {
        rows.extend(normalize::normalize_record(rec, default_source));
    }
    tracing::debug!(rows = rows.len(), "normalized measurements");

    let rows_written = store.insert_measurements(&rows).await?;
    Ok(CycleSummary {
        rows_written,
        duration: started.elapsed(),
    })
}

/// Run ingestion passes forever on the configured interval. Failed passes
/// are logged with their error count; the next pass runs on schedule.
pub async fn run_ingest_loop(client: UpstreamClient, store: Store, config: Config) {
    let mut ticker = tokio::time::interval(config.ingest_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let started = Instant::now();
        match ingest_cycle(&client, &store, &config.default_source).await {
            Ok(summary) => tracing::info!(
                rows = summary.rows_written,
                duration_ms = summary.duration.as_millis() as u64,
                errors = 0,
                "ingest_cycle complete"
            ),
            Err(err) => tracing::error!(
                error = %err,
                duration_ms = started.elapsed().as_millis() as u64,
                errors = 1,
                "ingest_cycle failed"
            ),
        }
    }
}
