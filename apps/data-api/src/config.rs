use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use powersense_ingest::reconcile::VersionPolicy;
use powersense_ingest::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub database_url: String,
    pub db_pool_size: u32,
    pub bind_addr: String,
    pub default_source: String,
    pub state_chunk_size: usize,
    pub version_policy: VersionPolicy,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_trimmed(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let database_url = env_trimmed("POWERSENSE_DATABASE_URL")
            .or_else(|| env_trimmed("DATABASE_URL"))
            .context("POWERSENSE_DATABASE_URL or DATABASE_URL is required")?;

        let version_policy = match env_trimmed("POWERSENSE_VERSION_POLICY") {
            Some(raw) => VersionPolicy::parse(&raw)
                .with_context(|| format!("unknown POWERSENSE_VERSION_POLICY: {raw}"))?,
            None => VersionPolicy::Sequential,
        };

        Ok(Self {
            database_url,
            db_pool_size: env_parse("POWERSENSE_API_DB_POOL_SIZE", 10),
            bind_addr: env_trimmed("POWERSENSE_API_BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            default_source: env_trimmed("POWERSENSE_DEFAULT_SOURCE")
                .unwrap_or_else(|| "France".to_string()),
            state_chunk_size: env_parse("POWERSENSE_STATE_CHUNK_SIZE", 500),
            version_policy,
            retry_max_attempts: env_parse("POWERSENSE_RETRY_MAX_ATTEMPTS", 5),
            retry_base_delay_ms: env_parse("POWERSENSE_RETRY_BASE_DELAY_MS", 1_000),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}
