use anyhow::Result;

use powersense_ingest::bootstrap;
use powersense_ingest::config::Config;
use powersense_ingest::detect;
use powersense_ingest::fetch::UpstreamClient;
use powersense_ingest::ingest;
use powersense_ingest::store::{build_pool, Store};

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,powersense_ingest=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let pool = build_pool(&config.database_url, config.db_pool_size).await?;
    let store = Store::new(
        pool,
        config.retry_policy(),
        config.state_chunk_size,
        config.version_policy,
    );
    store.ensure_schema().await?;

    if config.bootstrap_enabled {
        // A failed backfill should not keep the live loops from starting.
        if let Err(err) = bootstrap::bootstrap_history(&store, &config).await {
            tracing::error!(error = %err, "history bootstrap failed");
        }
    }

    let client = UpstreamClient::new(&config)?;

    let ingest_handle = tokio::spawn(ingest::run_ingest_loop(
        client,
        store.clone(),
        config.clone(),
    ));
    let detect_handle = tokio::spawn(detect::run_detection_loop(store, config));

    tokio::select! {
        _ = ingest_handle => {
            tracing::error!("ingest loop exited");
        }
        _ = detect_handle => {
            tracing::error!("detection loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
