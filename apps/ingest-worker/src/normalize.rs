use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::measurement::Measurement;

/// Raw upstream record: an ordered string-keyed field bag. Converted to
/// strongly-typed [`Measurement`]s here and never seen again downstream.
pub type RawRecord = Map<String, Value>;

/// Field names that carry metadata rather than metric values.
const METADATA_KEYS: &[&str] = &[
    "perimetre",
    "nature",
    "date",
    "heure",
    "date_heure",
    "total_count",
    "results",
];

/// Map the upstream display labels (as found in the historical export
/// headers) to the normalized metric names used by the live API.
pub fn remap_metric_name(original: &str) -> String {
    let key = original.trim();
    let mapped = match key {
        "Périmètre" => "perimetre",
        "Nature" => "nature",
        "Date" => "date",
        "Heures" => "heure",
        "Consommation" => "consommation",
        "Prévision J-1" => "prevision_j1",
        "Prévision J" => "prevision_j",
        "Fioul" => "fioul",
        "Charbon" => "charbon",
        "Gaz" => "gaz",
        "Nucléaire" => "nucleaire",
        "Eolien" => "eolien",
        "Eolien terrestre" => "eolien_terrestre",
        "Eolien offshore" => "eolien_offshore",
        "Solaire" => "solaire",
        "Hydraulique" => "hydraulique",
        "Pompage" => "pompage",
        "Bioénergies" => "bioenergies",
        "Bioénergies - Déchets" => "bioenergies_dechets",
        "Bioénergies - Biomasse" => "bioenergies_biomasse",
        "Bioénergies - Biogaz" => "bioenergies_biogaz",
        "Ech. physiques" => "ech_physiques",
        "Taux de Co2" => "taux_co2",
        "Ech. comm. Angleterre" => "ech_comm_angleterre",
        "Ech. comm. Espagne" => "ech_comm_espagne",
        "Ech. comm. Italie" => "ech_comm_italie",
        "Ech. comm. Suisse" => "ech_comm_suisse",
        "Ech. comm. Allemagne-Belgique" => "ech_comm_allemagne_belgique",
        "Fioul - TAC" => "fioul_tac",
        "Fioul - Cogén." => "fioul_cogen",
        "Fioul - Autres" => "fioul_autres",
        "Gaz - TAC" => "gaz_tac",
        "Gaz - Cogén." => "gaz_cogen",
        "Gaz - CCG" => "gaz_ccg",
        "Gaz - Autres" => "gaz_autres",
        "Hydraulique - Fil de l'eau + éclusée" => "hydraulique_fil_eau_eclusee",
        "Hydraulique - Lacs" => "hydraulique_lacs",
        "Hydraulique - STEP turbinage" => "hydraulique_step_turbinage",
        "Stockage batterie" => "stockage_batterie",
        "Déstockage batterie" => "destockage_batterie",
        _ => "",
    };
    if !mapped.is_empty() {
        return mapped.to_string();
    }
    let folded = fold_snake_case(key);
    if folded.is_empty() {
        key.to_string()
    } else {
        folded
    }
}

/// Fallback normalization for unknown labels: fold the accents the upstream
/// dataset uses, lowercase, and replace runs of non-alphanumerics with a
/// single underscore.
fn fold_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        let folded = match c {
            'à' | 'â' | 'ä' | 'À' | 'Â' | 'Ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'î' | 'ï' | 'Î' | 'Ï' => 'i',
            'ô' | 'ö' | 'Ô' | 'Ö' => 'o',
            'ù' | 'û' | 'ü' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ç' | 'Ç' => 'c',
            other => other,
        };
        if folded.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(folded.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive variants are taken as UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn looks_like_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 8
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
}

fn looks_like_time(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 5
        && bytes[..2].iter().all(u8::is_ascii_digit)
        && bytes[2] == b':'
        && bytes[3..5].iter().all(u8::is_ascii_digit)
}

/// Resolve the record timestamp: prefer the combined `date_heure` field,
/// otherwise scan field values for one date-like and one time-like string
/// and combine them.
fn resolve_timestamp(rec: &RawRecord) -> Option<DateTime<Utc>> {
    if let Some(Value::String(raw)) = rec.get("date_heure") {
        if !raw.trim().is_empty() {
            return parse_timestamp(raw);
        }
    }

    let mut date_val: Option<&str> = None;
    let mut time_val: Option<&str> = None;
    for value in rec.values() {
        let Value::String(s) = value else { continue };
        let s = s.trim();
        if date_val.is_none() && looks_like_date(s) {
            date_val = Some(s);
        }
        if time_val.is_none() && looks_like_time(s) {
            time_val = Some(s);
        }
        if date_val.is_some() && time_val.is_some() {
            break;
        }
    }
    match (date_val, time_val) {
        (Some(date), Some(time)) => parse_timestamp(&format!("{date}T{time}:00+00:00")),
        _ => None,
    }
}

fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Convert one raw upstream record into zero or more measurements: one per
/// numeric non-metadata field. Normalization failures are silent drops, not
/// propagated faults; a record with no usable timestamp or no numeric field
/// yields zero rows.
pub fn normalize_record(rec: &RawRecord, default_source: &str) -> Vec<Measurement> {
    let Some(ts) = resolve_timestamp(rec) else {
        tracing::debug!("record dropped: no usable timestamp");
        return Vec::new();
    };

    let perimetre = rec
        .get("perimetre")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_source)
        .to_string();
    let nature = rec
        .get("nature")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for (key, value) in rec {
        if METADATA_KEYS.contains(&key.as_str()) {
            continue;
        }
        if value.is_null() {
            continue;
        }
        match coerce_numeric(value) {
            Some(v) => rows.push(Measurement {
                ts,
                source: perimetre.clone(),
                metric: key.clone(),
                value: Measurement::clean_value(Some(v)),
                perimetre: perimetre.clone(),
                nature: nature.clone(),
            }),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "skipped non-numeric fields");
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::{normalize_record, remap_metric_name, RawRecord};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn record(fields: &[(&str, Value)]) -> RawRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn normalizes_numeric_fields_and_skips_metadata() {
        let rec = record(&[
            ("date_heure", json!("2026-02-03T10:15:00+00:00")),
            ("perimetre", json!("France")),
            ("nature", json!("Données temps réel")),
            ("consommation", json!(61250.0)),
            ("nucleaire", json!("41837")),
            ("commentaire", json!("indisponibilité partielle")),
            ("eolien", json!(Value::Null)),
        ]);
        let rows = normalize_record(&rec, "France");
        assert_eq!(rows.len(), 2);
        let expected_ts = Utc.with_ymd_and_hms(2026, 2, 3, 10, 15, 0).unwrap();
        for row in &rows {
            assert_eq!(row.ts, expected_ts);
            assert_eq!(row.perimetre, "France");
            assert_eq!(row.nature.as_deref(), Some("Données temps réel"));
        }
        assert_eq!(rows[0].metric, "consommation");
        assert_eq!(rows[0].value, Some(61250.0));
        assert_eq!(rows[1].metric, "nucleaire");
        assert_eq!(rows[1].value, Some(41837.0));
    }

    #[test]
    fn infers_timestamp_from_date_and_time_fields() {
        let rec = record(&[
            ("date", json!("2026-02-03")),
            ("heure", json!("10:30")),
            ("consommation", json!(60000)),
        ]);
        let rows = normalize_record(&rec, "France");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].ts,
            Utc.with_ymd_and_hms(2026, 2, 3, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn unparsable_timestamp_yields_zero_rows() {
        let rec = record(&[
            ("date_heure", json!("not-a-timestamp")),
            ("consommation", json!(60000)),
        ]);
        assert!(normalize_record(&rec, "France").is_empty());
    }

    #[test]
    fn record_without_numeric_fields_yields_zero_rows() {
        let rec = record(&[
            ("date_heure", json!("2026-02-03T10:15:00+00:00")),
            ("perimetre", json!("France")),
            ("nature", json!("Prévision")),
        ]);
        assert!(normalize_record(&rec, "France").is_empty());
    }

    #[test]
    fn source_falls_back_to_configured_default() {
        let rec = record(&[
            ("date_heure", json!("2026-02-03T10:15:00+00:00")),
            ("consommation", json!(60000)),
        ]);
        let rows = normalize_record(&rec, "France");
        assert_eq!(rows[0].source, "France");
        assert_eq!(rows[0].perimetre, "France");
        assert_eq!(rows[0].nature, None);
    }

    #[test]
    fn normalization_is_deterministic() {
        let rec = record(&[
            ("date_heure", json!("2026-02-03T10:15:00+00:00")),
            ("perimetre", json!("France")),
            ("nature", json!("Données temps réel")),
            ("consommation", json!(61250.0)),
            ("gaz", json!(4100.5)),
        ]);
        let first = normalize_record(&rec, "France");
        let second = normalize_record(&rec, "France");
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|m| m.ukey()).collect::<Vec<_>>(),
            second.iter().map(|m| m.ukey()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn remaps_known_labels_and_folds_unknown_ones() {
        assert_eq!(remap_metric_name("Nucléaire"), "nucleaire");
        assert_eq!(remap_metric_name("Prévision J-1"), "prevision_j1");
        assert_eq!(
            remap_metric_name("Hydraulique - STEP turbinage"),
            "hydraulique_step_turbinage"
        );
        assert_eq!(remap_metric_name("Ech. comm. Portugal"), "ech_comm_portugal");
        assert_eq!(remap_metric_name("  Stockage batterie "), "stockage_batterie");
    }
}
