use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::measurement::{Measurement, VersionedRow};

/// How versions are assigned to accepted rows.
///
/// `Sequential` compares against the latest known state and assigns
/// `previous + 1` (1 on first sight), skipping unchanged values. It requires
/// a read-before-write but gives strict per-key monotonicity.
///
/// `ContentHash` derives the version deterministically from (ukey, value),
/// needing no prior state; replays of the same value collapse on the
/// store's (ukey, version) primary key instead of being filtered here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VersionPolicy {
    #[default]
    Sequential,
    ContentHash,
}

impl VersionPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "sequential" => Some(Self::Sequential),
            "content-hash" | "content_hash" => Some(Self::ContentHash),
            _ => None,
        }
    }
}

/// Latest known (value, version) for one identity key.
#[derive(Clone, Debug, PartialEq)]
pub struct LatestState {
    pub value: Option<f64>,
    pub version: i64,
}

/// Null-aware value equality: absent equals absent, and an absent value is
/// unequal to any concrete one.
pub fn values_equal(left: Option<f64>, right: Option<f64>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Deterministic content version: xxh3-64 over the canonical JSON of
/// {ukey, value}, masked into the positive BIGINT range.
pub fn content_version(ukey: &str, value: Option<f64>) -> i64 {
    let payload = serde_json::json!({ "ukey": ukey, "value": value }).to_string();
    (xxh3_64(payload.as_bytes()) & i64::MAX as u64) as i64
}

/// Distinct identity keys of a batch, in first-arrival order.
pub fn distinct_ukeys(batch: &[Measurement]) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(batch.len());
    let mut ukeys = Vec::new();
    for m in batch {
        let ukey = m.ukey();
        if seen.insert(ukey.clone()) {
            ukeys.push(ukey);
        }
    }
    ukeys
}

/// Reconcile a batch against the latest known state, returning only the rows
/// that carry new information, in arrival order, each annotated with the
/// version to write.
///
/// `latest` is the prefetched per-key state; it is updated in place as rows
/// are accepted so repeated keys within one batch version sequentially
/// against each other, not just against the store snapshot. Under
/// `ContentHash` every row is emitted with its derived version and `latest`
/// is left untouched.
pub fn reconcile(
    batch: &[Measurement],
    latest: &mut HashMap<String, LatestState>,
    policy: VersionPolicy,
) -> Vec<VersionedRow> {
    let mut accepted = Vec::new();
    for m in batch {
        let ukey = m.ukey();
        let value = Measurement::clean_value(m.value);
        let version = match policy {
            VersionPolicy::ContentHash => content_version(&ukey, value),
            VersionPolicy::Sequential => {
                let prior = latest.get(&ukey);
                if let Some(state) = prior {
                    if values_equal(value, state.value) {
                        continue;
                    }
                }
                let version = prior.map(|s| s.version + 1).unwrap_or(1);
                latest.insert(ukey.clone(), LatestState { value, version });
                version
            }
        };
        accepted.push(VersionedRow {
            ts: m.ts,
            source: m.source.clone(),
            metric: m.metric.clone(),
            value,
            ukey,
            version,
        });
    }
    accepted
}
