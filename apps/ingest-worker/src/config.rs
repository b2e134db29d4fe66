use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::reconcile::VersionPolicy;
use crate::retry::RetryPolicy;

const DEFAULT_API_URL: &str = "https://odre.opendatasoft.com/api/explore/v2.1/catalog/datasets/eco2mix-national-tr/records?order_by=date_heure%20DESC";

/// Explicit worker configuration, resolved once at startup. Components take
/// what they need from here; nothing reads the environment mid-algorithm.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub api_url: String,
    pub history_data_url: Option<String>,
    pub default_source: String,
    pub page_limit: usize,
    pub fetch_window_seconds: i64,
    pub fetch_timeout_seconds: u64,
    pub ingest_interval_seconds: u64,
    pub detect_interval_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub state_chunk_size: usize,
    pub version_policy: VersionPolicy,
    pub anomaly_metric: String,
    pub anomaly_lookback_days: i64,
    pub anomaly_eval_hours: i64,
    pub anomaly_min_samples: usize,
    pub anomaly_z_threshold: f64,
    pub bootstrap_enabled: bool,
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

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let database_url = env_trimmed("POWERSENSE_DATABASE_URL")
            .or_else(|| env_trimmed("DATABASE_URL"))
            .context("POWERSENSE_DATABASE_URL or DATABASE_URL is required")?;

        let api_url =
            env_trimmed("POWERSENSE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let history_data_url = env_trimmed("POWERSENSE_HISTORY_DATA_URL");
        let default_source =
            env_trimmed("POWERSENSE_DEFAULT_SOURCE").unwrap_or_else(|| "France".to_string());

        let version_policy = match env_trimmed("POWERSENSE_VERSION_POLICY") {
            Some(raw) => VersionPolicy::parse(&raw)
                .with_context(|| format!("unknown POWERSENSE_VERSION_POLICY: {raw}"))?,
            None => VersionPolicy::Sequential,
        };

        let bootstrap_enabled = env::var("POWERSENSE_BOOTSTRAP")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            db_pool_size: env_parse("POWERSENSE_DB_POOL_SIZE", 10),
            api_url,
            history_data_url,
            default_source,
            page_limit: env_parse("POWERSENSE_PAGE_LIMIT", 100),
            fetch_window_seconds: env_parse("POWERSENSE_FETCH_WINDOW_SECONDS", 86_400),
            fetch_timeout_seconds: env_parse("POWERSENSE_FETCH_TIMEOUT_SECONDS", 30),
            ingest_interval_seconds: env_parse("POWERSENSE_INGEST_INTERVAL_SECONDS", 60),
            detect_interval_seconds: env_parse("POWERSENSE_DETECT_INTERVAL_SECONDS", 3_600),
            retry_max_attempts: env_parse("POWERSENSE_RETRY_MAX_ATTEMPTS", 5),
            retry_base_delay_ms: env_parse("POWERSENSE_RETRY_BASE_DELAY_MS", 1_000),
            state_chunk_size: env_parse("POWERSENSE_STATE_CHUNK_SIZE", 500),
            version_policy,
            anomaly_metric: env_trimmed("POWERSENSE_ANOMALY_METRIC")
                .unwrap_or_else(|| "consommation".to_string()),
            anomaly_lookback_days: env_parse("POWERSENSE_ANOMALY_LOOKBACK_DAYS", 28),
            anomaly_eval_hours: env_parse("POWERSENSE_ANOMALY_EVAL_HOURS", 24),
            anomaly_min_samples: env_parse("POWERSENSE_ANOMALY_MIN_SAMPLES", 4),
            anomaly_z_threshold: env_parse("POWERSENSE_ANOMALY_Z_THRESHOLD", 3.0),
            bootstrap_enabled,
        })
    }

    pub fn ingest_interval(&self) -> Duration {
        Duration::from_secs(self.ingest_interval_seconds)
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_secs(self.detect_interval_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}
