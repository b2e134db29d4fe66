use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::measurement::{
    AnomalyRecord, Measurement, SeriesPoint, StoredAnomaly, StoredMeasurement, VersionedRow,
};
use crate::reconcile::{self, LatestState, VersionPolicy};
use crate::retry::{RetryPolicy, StoreError};

#[cfg(test)]
mod tests;

const MEASUREMENTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS measurements (
    ts timestamptz NOT NULL,
    source text NOT NULL,
    metric text NOT NULL,
    value double precision NULL,
    ukey text NOT NULL,
    version bigint NOT NULL,
    inserted_at timestamptz NOT NULL DEFAULT now(),
    PRIMARY KEY (ukey, version)
)
"#;

const ANOMALIES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS anomalies (
    ts timestamptz NOT NULL,
    source text NOT NULL,
    metric text NOT NULL,
    value double precision NULL,
    zscore double precision NOT NULL,
    mean double precision NOT NULL,
    std double precision NOT NULL,
    threshold double precision NOT NULL,
    dow smallint NOT NULL,
    hour smallint NOT NULL,
    minute smallint NOT NULL,
    inserted_at timestamptz NOT NULL DEFAULT now()
)
"#;

const INDEX_DDL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS measurements_ts_idx ON measurements (ts)",
    "CREATE INDEX IF NOT EXISTS measurements_metric_ts_idx ON measurements (metric, ts)",
    "CREATE INDEX IF NOT EXISTS anomalies_ts_idx ON anomalies (ts)",
];

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Filters for the raw-history query surface.
#[derive(Clone, Debug, Default)]
pub struct MeasurementFilter {
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub metric: Option<String>,
    pub ukey: Option<String>,
    pub limit: i64,
    pub descending: bool,
}

/// Filters for the anomaly-history query surface.
#[derive(Clone, Debug, Default)]
pub struct AnomalyFilter {
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub metric: Option<String>,
    pub limit: i64,
    pub descending: bool,
}

/// Append-only measurement/anomaly store. Rows are never updated or
/// deleted; "current" is always re-derived as the max version per ukey.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    retry: RetryPolicy,
    state_chunk_size: usize,
    version_policy: VersionPolicy,
}

impl Store {
    pub fn new(
        pool: PgPool,
        retry: RetryPolicy,
        state_chunk_size: usize,
        version_policy: VersionPolicy,
    ) -> Self {
        Self {
            pool,
            retry,
            state_chunk_size: state_chunk_size.max(1),
            version_policy,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(MEASUREMENTS_DDL).execute(&self.pool).await?;
        sqlx::query(ANOMALIES_DDL).execute(&self.pool).await?;
        for ddl in INDEX_DDL {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn is_empty(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM measurements)")
            .fetch_one(&self.pool)
            .await?;
        Ok(!exists)
    }

    pub async fn count_measurements(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Latest (value, version) per ukey, fetched in bounded chunks so the
    /// query size stays within backend limits.
    async fn fetch_latest_state(
        &self,
        ukeys: &[String],
    ) -> Result<HashMap<String, LatestState>, StoreError> {
        let mut state = HashMap::with_capacity(ukeys.len());
        for chunk in ukeys.chunks(self.state_chunk_size) {
            let rows = sqlx::query(
                r#"
                SELECT DISTINCT ON (ukey) ukey, value, version
                FROM measurements
                WHERE ukey = ANY($1)
                ORDER BY ukey, version DESC
                "#,
            )
            .bind(chunk)
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                let ukey: String = row.try_get("ukey")?;
                let value: Option<f64> = row.try_get("value")?;
                let version: i64 = row.try_get("version")?;
                state.insert(ukey, LatestState { value, version });
            }
        }
        Ok(state)
    }

    /// Reconcile and persist a batch of measurements. The whole unit
    /// (state fetch, comparison, bulk insert) is retried from scratch on
    /// transient failures so a retry always compares against fresh state.
    /// Returns the number of rows actually written.
    pub async fn insert_measurements(&self, rows: &[Measurement]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.retry.run(|| self.insert_measurements_once(rows)).await
    }

    async fn insert_measurements_once(&self, rows: &[Measurement]) -> Result<usize, StoreError> {
        let prepared = match self.version_policy {
            VersionPolicy::Sequential => {
                let ukeys = reconcile::distinct_ukeys(rows);
                let mut latest = self.fetch_latest_state(&ukeys).await?;
                reconcile::reconcile(rows, &mut latest, VersionPolicy::Sequential)
            }
            VersionPolicy::ContentHash => {
                reconcile::reconcile(rows, &mut HashMap::new(), VersionPolicy::ContentHash)
            }
        };
        self.bulk_insert_measurements(&prepared).await
    }

    async fn bulk_insert_measurements(
        &self,
        prepared: &[VersionedRow],
    ) -> Result<usize, StoreError> {
        if prepared.is_empty() {
            return Ok(0);
        }
        let inserted_at = Utc::now();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO measurements (ts, source, metric, value, ukey, version, inserted_at) ",
        );
        builder.push_values(prepared.iter(), |mut b, row| {
            b.push_bind(row.ts)
                .push_bind(&row.source)
                .push_bind(&row.metric)
                .push_bind(row.value)
                .push_bind(&row.ukey)
                .push_bind(row.version)
                .push_bind(inserted_at);
        });
        builder.push(" ON CONFLICT DO NOTHING");
        let result = builder.build().execute(&self.pool).await?;
        let written = result.rows_affected() as usize;
        if written < prepared.len() {
            tracing::debug!(
                written,
                skipped = prepared.len() - written,
                "collapsed duplicate measurement rows"
            );
        }
        Ok(written)
    }

    /// Persist anomaly rows with the same retry discipline as measurements.
    /// No versioning applies; the table is append-only and re-flagging an
    /// instant on overlapping windows is accepted.
    pub async fn insert_anomalies(&self, rows: &[AnomalyRecord]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.retry.run(|| self.insert_anomalies_once(rows)).await
    }

    async fn insert_anomalies_once(&self, rows: &[AnomalyRecord]) -> Result<usize, StoreError> {
        let inserted_at = Utc::now();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO anomalies (ts, source, metric, value, zscore, mean, std, threshold, dow, hour, minute, inserted_at) ",
        );
        builder.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.ts)
                .push_bind(&row.source)
                .push_bind(&row.metric)
                .push_bind(row.value)
                .push_bind(row.zscore)
                .push_bind(row.mean)
                .push_bind(row.std)
                .push_bind(row.threshold)
                .push_bind(row.dow)
                .push_bind(row.hour)
                .push_bind(row.minute)
                .push_bind(inserted_at);
        });
        builder.build().execute(&self.pool).await?;
        Ok(rows.len())
    }

    /// Ascending series for one metric within [start, end), as consumed by
    /// the detection path.
    pub async fn fetch_series(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        let rows = sqlx::query_as::<_, SeriesPoint>(
            r#"
            SELECT ts, source, metric, value
            FROM measurements
            WHERE metric = $1 AND ts >= $2 AND ts < $3
            ORDER BY ts ASC
            "#,
        )
        .bind(metric)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Raw history filtered by time range / source / metric / ukey.
    pub async fn fetch_measurements(
        &self,
        filter: &MeasurementFilter,
    ) -> Result<Vec<StoredMeasurement>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT ts, source, metric, value, ukey, version, inserted_at FROM measurements",
        );
        let mut sep = " WHERE ";
        if let Some(start_ts) = filter.start_ts {
            builder.push(sep).push("ts >= ").push_bind(start_ts);
            sep = " AND ";
        }
        if let Some(end_ts) = filter.end_ts {
            builder.push(sep).push("ts <= ").push_bind(end_ts);
            sep = " AND ";
        }
        if let Some(source) = &filter.source {
            builder.push(sep).push("source = ").push_bind(source);
            sep = " AND ";
        }
        if let Some(metric) = &filter.metric {
            builder.push(sep).push("metric = ").push_bind(metric);
            sep = " AND ";
        }
        if let Some(ukey) = &filter.ukey {
            builder.push(sep).push("ukey = ").push_bind(ukey);
        }
        builder
            .push(" ORDER BY ts ")
            .push(if filter.descending { "DESC" } else { "ASC" })
            .push(" LIMIT ")
            .push_bind(filter.limit);
        let rows = builder
            .build_query_as::<StoredMeasurement>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Latest row per ukey: the max-version row, re-derived by query rather
    /// than kept by in-place updates.
    pub async fn fetch_latest_measurements(
        &self,
        ukey: Option<&str>,
        limit: i64,
        descending: bool,
    ) -> Result<Vec<StoredMeasurement>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT * FROM (SELECT DISTINCT ON (ukey) ts, source, metric, value, ukey, version, inserted_at FROM measurements",
        );
        if let Some(ukey) = ukey {
            builder.push(" WHERE ukey = ").push_bind(ukey);
        }
        builder
            .push(" ORDER BY ukey, version DESC) latest ORDER BY ts ")
            .push(if descending { "DESC" } else { "ASC" })
            .push(" LIMIT ")
            .push_bind(limit);
        let rows = builder
            .build_query_as::<StoredMeasurement>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Anomaly history with the same filter shape as raw history.
    pub async fn fetch_anomalies(&self, filter: &AnomalyFilter) -> Result<Vec<StoredAnomaly>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT ts, source, metric, value, zscore, mean, std, threshold, dow, hour, minute, inserted_at FROM anomalies",
        );
        let mut sep = " WHERE ";
        if let Some(start_ts) = filter.start_ts {
            builder.push(sep).push("ts >= ").push_bind(start_ts);
            sep = " AND ";
        }
        if let Some(end_ts) = filter.end_ts {
            builder.push(sep).push("ts <= ").push_bind(end_ts);
            sep = " AND ";
        }
        if let Some(source) = &filter.source {
            builder.push(sep).push("source = ").push_bind(source);
            sep = " AND ";
        }
        if let Some(metric) = &filter.metric {
            builder.push(sep).push("metric = ").push_bind(metric);
        }
        builder
            .push(" ORDER BY ts ")
            .push(if filter.descending { "DESC" } else { "ASC" })
            .push(" LIMIT ")
            .push_bind(filter.limit);
        let rows = builder
            .build_query_as::<StoredAnomaly>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
