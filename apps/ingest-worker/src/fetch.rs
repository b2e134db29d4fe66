use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::normalize::RawRecord;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    results: Option<Vec<RawRecord>>,
}

/// Replace the `where` clause with a window on `date_heure`, keeping every
/// other query parameter (order_by etc.) intact.
pub fn build_windowed_url(base_url: &str, window_start: DateTime<Utc>) -> Result<Url> {
    let mut url = Url::parse(base_url).context("invalid upstream API url")?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "where")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let window_iso = window_start.to_rfc3339_opts(SecondsFormat::Secs, false);
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("where", &format!("date_heure >= '{window_iso}'"))
        .finish();
    Ok(url)
}

/// Set `limit`/`offset`, replacing any previous pagination parameters.
pub fn build_paged_url(base: &Url, limit: usize, offset: usize) -> Url {
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != "limit" && k != "offset")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("limit", &limit.to_string())
        .append_pair("offset", &offset.to_string())
        .finish();
    url
}

/// Client for the paginated upstream snapshot API.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    page_limit: usize,
    window_seconds: i64,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            anyhow::bail!("upstream API url is not configured");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self {
            client,
            base_url: config.api_url.clone(),
            page_limit: config.page_limit.max(1),
            window_seconds: config.fetch_window_seconds.max(1),
            retry: config.retry_policy(),
        })
    }

    async fn fetch_page(&self, url: &Url) -> Result<ApiPage, reqwest::Error> {
        self.client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Fetch every record in the recent window, paging while full pages
    /// keep coming back.
    pub async fn fetch_all(&self) -> Result<Vec<RawRecord>> {
        let window_start = Utc::now() - ChronoDuration::seconds(self.window_seconds);
        let base = build_windowed_url(&self.base_url, window_start)?;
        tracing::info!(url = %base, "fetching upstream window");

        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let page_url = build_paged_url(&base, self.page_limit, offset);
            tracing::debug!(offset, limit = self.page_limit, "fetching page");
            // Timeouts and server errors get the same retry discipline as
            // store writes; client errors fail the pass immediately.
            let page: ApiPage = self
                .retry
                .run(|| self.fetch_page(&page_url))
                .await
                .with_context(|| format!("upstream request failed: {page_url}"))?;
            let results = page.results.unwrap_or_default();
            let count = results.len();
            tracing::debug!(offset, count, total = all.len() + count, "fetched page");
            all.extend(results);
            if count < self.page_limit {
                break;
            }
            offset += self.page_limit;
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::{build_paged_url, build_windowed_url};
    use chrono::{TimeZone, Utc};
    use url::Url;

    const BASE: &str = "https://example.test/api/records?where=date_heure%3E%3Dnow()&order_by=date_heure%20DESC";

    #[test]
    fn windowed_url_replaces_where_and_keeps_other_params() {
        let window_start = Utc.with_ymd_and_hms(2026, 2, 3, 9, 0, 0).unwrap();
        let url = build_windowed_url(BASE, window_start).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&(
            "where".to_string(),
            "date_heure >= '2026-02-03T09:00:00+00:00'".to_string()
        )));
        assert!(pairs.contains(&("order_by".to_string(), "date_heure DESC".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "where").count(), 1);
    }

    #[test]
    fn paged_url_overrides_previous_pagination() {
        let base = Url::parse("https://example.test/api/records?order_by=x&limit=5&offset=40")
            .unwrap();
        let url = build_paged_url(&base, 100, 200);
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("limit".to_string(), "100".to_string())));
        assert!(pairs.contains(&("offset".to_string(), "200".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "limit").count(), 1);
        assert_eq!(pairs.iter().filter(|(k, _)| k == "offset").count(), 1);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let window_start = Utc.with_ymd_and_hms(2026, 2, 3, 9, 0, 0).unwrap();
        assert!(build_windowed_url("not a url", window_start).is_err());
    }
}
