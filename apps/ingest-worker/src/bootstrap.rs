use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;

use crate::config::Config;
use crate::normalize::{self, RawRecord};
use crate::store::Store;

/// Seed an empty store from the historical export. Skipped when no export
/// url is configured or the store already holds data.
pub async fn bootstrap_history(store: &Store, config: &Config) -> Result<usize> {
    let Some(url) = config.history_data_url.as_deref() else {
        tracing::info!("history bootstrap skipped: no export url configured");
        return Ok(0);
    };
    if !store.is_empty().await? {
        tracing::info!("history bootstrap skipped: store already has data");
        return Ok(0);
    }

    tracing::info!(url, "downloading history export");
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.fetch_timeout_seconds.max(60)))
        .build()
        .context("failed to build history download client")?;
    let bytes = client
        .get(url)
        .send()
        .await
        .context("history export request failed")?
        .error_for_status()
        .context("history export returned an error status")?
        .bytes()
        .await
        .context("failed to read history export body")?;
    tracing::info!(bytes = bytes.len(), "downloaded history export");

    // The export is latin-1 encoded; every byte maps to the same code point.
    let text: String = bytes.iter().map(|&b| b as char).collect();
    let records = parse_history_export(&text)?;
    tracing::info!(records = records.len(), "parsed history export");

    let mut rows = Vec::new();
    let today = Utc::now().date_naive();
    for rec in &records {
        for m in normalize::normalize_record(rec, &config.default_source) {
            // The live API covers today; the export only backfills the past.
            if m.ts.date_naive() < today {
                rows.push(m);
            }
        }
    }

    let written = store.insert_measurements(&rows).await?;
    tracing::info!(rows = written, "history bootstrap complete");
    Ok(written)
}

/// Parse the tab-separated export into raw records keyed by the normalized
/// metric names. Rows without a `nature` column value are dropped (the export
/// mixes in trailing annotation rows); `date_heure` is synthesized from the
/// date and time columns.
pub fn parse_history_export(text: &str) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("history export has no header row")?
        .iter()
        .map(normalize::remap_metric_name)
        .collect();

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let mut rec = RawRecord::new();
        for (key, field) in headers.iter().zip(row.iter()) {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            rec.insert(key.clone(), Value::String(field.to_string()));
        }
        if !rec.contains_key("nature") {
            skipped += 1;
            continue;
        }
        if let (Some(Value::String(date)), Some(Value::String(time))) =
            (rec.get("date"), rec.get("heure"))
        {
            let date_heure = format!("{date}T{time}:00+00:00");
            rec.insert("date_heure".to_string(), Value::String(date_heure));
        }
        records.push(rec);
    }
    if skipped > 0 {
        tracing::debug!(skipped, "skipped unusable export rows");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::parse_history_export;
    use crate::normalize::normalize_record;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    const EXPORT: &str = "P\u{e9}rim\u{e8}tre\tNature\tDate\tHeures\tConsommation\tNucl\u{e9}aire\n\
France\tDonn\u{e9}es temps r\u{e9}el\t2026-02-03\t10:15\t61250\t41837\n\
France\tDonn\u{e9}es temps r\u{e9}el\t2026-02-03\t10:30\t\t41920\n\
Les valeurs sont exprim\u{e9}es en MW\n";

    #[test]
    fn parses_rows_and_synthesizes_date_heure() {
        let records = parse_history_export(EXPORT).unwrap();
        assert_eq!(records.len(), 2, "annotation row is dropped");
        assert_eq!(
            records[0].get("date_heure"),
            Some(&Value::String("2026-02-03T10:15:00+00:00".to_string()))
        );
        assert_eq!(
            records[0].get("consommation"),
            Some(&Value::String("61250".to_string()))
        );
        assert!(
            !records[1].contains_key("consommation"),
            "empty fields are omitted"
        );
    }

    #[test]
    fn parsed_rows_normalize_into_measurements() {
        let records = parse_history_export(EXPORT).unwrap();
        let rows = normalize_record(&records[0], "France");
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].ts,
            Utc.with_ymd_and_hms(2026, 2, 3, 10, 15, 0).unwrap()
        );
        assert_eq!(rows[0].metric, "consommation");
        assert_eq!(rows[0].value, Some(61250.0));
        assert_eq!(rows[0].nature.as_deref(), Some("Donn\u{e9}es temps r\u{e9}el"));
    }

    #[test]
    fn header_only_export_yields_no_records() {
        let records = parse_history_export("P\u{e9}rim\u{e8}tre\tNature\tDate\n").unwrap();
        assert!(records.is_empty());
    }
}
