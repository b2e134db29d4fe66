mod config;
mod error;
mod routes;
mod state;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use powersense_ingest::store::{build_pool, Store};

use crate::config::ApiConfig;
use crate::state::AppState;

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,powersense_data_api=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ApiConfig::from_env()?;
    init_tracing()?;

    let pool = build_pool(&config.database_url, config.db_pool_size).await?;
    let store = Store::new(
        pool,
        config.retry_policy(),
        config.state_chunk_size,
        config.version_policy,
    );
    store.ensure_schema().await?;

    let bind_addr = config.bind_addr.clone();
    let app = routes::router(AppState { config, store });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind data API listener on {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "data API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
