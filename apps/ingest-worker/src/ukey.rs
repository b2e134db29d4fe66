use chrono::{DateTime, Utc};

/// Build the deterministic identity key naming one logical point in the
/// time series. The key is canonical JSON: keys in lexicographic order
/// (date, metric, nature, perimetre, time), no whitespace, non-ASCII kept
/// as-is. Two calls with equal logical inputs always produce byte-identical
/// keys, which is what lets overlapping fetch windows recognize the same
/// point across runs.
pub fn format_ukey(
    ts: DateTime<Utc>,
    perimetre: &str,
    nature: Option<&str>,
    metric: &str,
) -> String {
    let date = ts.format("%Y%m%d").to_string();
    let time = ts.format("%H:%M:%S").to_string();
    // serde_json's default map is ordered by key, so the literal below
    // serializes with the canonical field order.
    serde_json::json!({
        "date": date,
        "metric": metric,
        "nature": nature,
        "perimetre": perimetre,
        "time": time,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::format_ukey;
    use chrono::{TimeZone, Utc};

    #[test]
    fn ukey_is_canonical_and_sorted() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let key = format_ukey(ts, "France", Some("Données temps réel"), "consommation");
        assert_eq!(
            key,
            r#"{"date":"20260314","metric":"consommation","nature":"Données temps réel","perimetre":"France","time":"15:09:26"}"#
        );
    }

    #[test]
    fn ukey_serializes_missing_nature_as_null() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let key = format_ukey(ts, "France", None, "eolien");
        assert!(key.contains(r#""nature":null"#));
    }

    #[test]
    fn ukey_is_deterministic_across_calls() {
        let ts = Utc.with_ymd_and_hms(2026, 6, 2, 10, 30, 0).unwrap();
        let a = format_ukey(ts, "France", Some("Temps réel"), "nucleaire");
        let b = format_ukey(ts, "France", Some("Temps réel"), "nucleaire");
        assert_eq!(a, b);
    }

    #[test]
    fn ukey_distinguishes_time_components() {
        let t0 = Utc.with_ymd_and_hms(2026, 6, 2, 10, 30, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 6, 2, 10, 45, 0).unwrap();
        let a = format_ukey(t0, "France", None, "gaz");
        let b = format_ukey(t1, "France", None, "gaz");
        assert_ne!(a, b);
    }
}
