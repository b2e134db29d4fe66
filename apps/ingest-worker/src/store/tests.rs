use std::env;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{MeasurementFilter, Store};
use crate::measurement::Measurement;
use crate::reconcile::VersionPolicy;
use crate::retry::RetryPolicy;

// Integration tests against a live Postgres. Opt in with
// POWERSENSE_INTEGRATION_TEST=1 and POWERSENSE_TEST_DATABASE_URL.
fn integration_database_url() -> Option<String> {
    if env::var("POWERSENSE_INTEGRATION_TEST").ok().as_deref() != Some("1") {
        return None;
    }
    env::var("POWERSENSE_TEST_DATABASE_URL").ok()
}

async fn setup_test_pool(database_url: &str, schema: &str) -> Result<PgPool> {
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(&admin_pool)
        .await?;
    drop(admin_pool);

    let schema_name = schema.to_string();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let schema = schema_name.clone();
            Box::pin(async move {
                sqlx::query(&format!("SET search_path TO {}", schema))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;
    Ok(pool)
}

async fn drop_test_schema(database_url: &str, schema: &str) -> Result<()> {
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
        .execute(&admin_pool)
        .await;
    Ok(())
}

fn test_store(pool: PgPool, policy: VersionPolicy) -> Store {
    Store::new(
        pool,
        RetryPolicy::new(2, Duration::from_millis(10)),
        500,
        policy,
    )
}

fn measurement(metric: &str, value: Option<f64>) -> Measurement {
    Measurement {
        ts: Utc.with_ymd_and_hms(2026, 2, 3, 10, 15, 0).unwrap(),
        source: "France".to_string(),
        metric: metric.to_string(),
        value,
        perimetre: "France".to_string(),
        nature: Some("Données temps réel".to_string()),
    }
}

#[tokio::test]
async fn test_sequential_versioning_end_to_end() -> Result<()> {
    let Some(database_url) = integration_database_url() else {
        return Ok(());
    };
    let schema = format!("powersense_test_seq_{}", std::process::id());
    let pool = setup_test_pool(&database_url, &schema).await?;
    let store = test_store(pool, VersionPolicy::Sequential);
    store.ensure_schema().await?;

    // no prior state: one row written at version 1
    let written = store
        .insert_measurements(&[measurement("metric1", Some(10.0))])
        .await?;
    assert_eq!(written, 1);

    // same value resubmitted: nothing written
    let written = store
        .insert_measurements(&[measurement("metric1", Some(10.0))])
        .await?;
    assert_eq!(written, 0);

    // changed value: one row written at version 2
    let written = store
        .insert_measurements(&[measurement("metric1", Some(12.0))])
        .await?;
    assert_eq!(written, 1);

    let ukey = measurement("metric1", None).ukey();
    let latest = store
        .fetch_latest_measurements(Some(&ukey), 10, true)
        .await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].version, 2);
    assert_eq!(latest[0].value, Some(12.0));

    let history = store
        .fetch_measurements(&MeasurementFilter {
            ukey: Some(ukey),
            limit: 10,
            descending: false,
            ..Default::default()
        })
        .await?;
    assert_eq!(history.len(), 2);
    assert_eq!(store.count_measurements().await?, 2);
    assert!(!store.is_empty().await?);

    drop_test_schema(&database_url, &schema).await?;
    Ok(())
}

#[tokio::test]
async fn test_content_hash_replays_collapse_on_primary_key() -> Result<()> {
    let Some(database_url) = integration_database_url() else {
        return Ok(());
    };
    let schema = format!("powersense_test_hash_{}", std::process::id());
    let pool = setup_test_pool(&database_url, &schema).await?;
    let store = test_store(pool, VersionPolicy::ContentHash);
    store.ensure_schema().await?;

    let written = store
        .insert_measurements(&[measurement("metric1", Some(10.0))])
        .await?;
    assert_eq!(written, 1);

    // same (ukey, value) hashes to the same version and is dropped by
    // ON CONFLICT DO NOTHING
    let written = store
        .insert_measurements(&[measurement("metric1", Some(10.0))])
        .await?;
    assert_eq!(written, 0);

    // a different value is a new version
    let written = store
        .insert_measurements(&[measurement("metric1", Some(11.0))])
        .await?;
    assert_eq!(written, 1);
    assert_eq!(store.count_measurements().await?, 2);

    drop_test_schema(&database_url, &schema).await?;
    Ok(())
}
