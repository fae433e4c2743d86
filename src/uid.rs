//! UID and time utilities shared by every store.
//!
//! Identifiers are UUIDs carried across the wire with a layer prefix
//! (`core_…` for entities/relations/views/context-frames, `soil_…` for
//! facts). Prefix stripping is always permitted on input; output always
//! includes the prefix. Time is represented two ways: ISO-8601 wall-clock
//! timestamps, and an integer day-counter used by the relation horizon
//! arithmetic.
use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Layer a UID belongs to, used to pick its wire prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Core,
    Soil,
    Rel,
}

impl Layer {
    fn prefix(self) -> &'static str {
        match self {
            Layer::Core => "core_",
            Layer::Soil => "soil_",
            Layer::Rel => "rel_",
        }
    }
}

const KNOWN_PREFIXES: &[&str] = &["core_", "soil_", "rel_"];

/// Prepend `layer`'s prefix to `uuid`. If `uuid` already carries a known
/// prefix it is stripped first, so this is idempotent under re-application
/// with the same layer.
pub fn add_prefix(layer: Layer, uuid: &str) -> String {
    format!("{}{}", layer.prefix(), strip_prefix(uuid))
}

/// Remove a known layer prefix from `uuid`. A non-prefixed UUID is returned
/// unchanged — this is a total function.
pub fn strip_prefix(uuid: &str) -> &str {
    for prefix in KNOWN_PREFIXES {
        if let Some(rest) = uuid.strip_prefix(prefix) {
            return rest;
        }
    }
    uuid
}

/// Generate a fresh type-4 UUID (bare, unprefixed).
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// The epoch the day-counter is measured from: 2020-01-01 UTC.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid epoch date")
}

/// The current day as an integer count of days since `EPOCH_2020_01_01`.
pub fn current_day() -> i64 {
    (Utc::now().date_naive() - epoch()).num_days()
}

/// Inverse of [`current_day`]: the calendar date for a given day counter.
pub fn day_to_date(day: i64) -> NaiveDate {
    epoch() + chrono::Duration::days(day)
}

/// SHA-256 hex digest over a canonical concatenation of the given parts.
fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// `compute_entity_hash(type, created_at, updated_at, previous_hash)` —
/// SHA-256 hex over a canonical concatenation of the entity's chain fields.
pub fn compute_entity_hash(
    entity_type: &str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    previous_hash: Option<&str>,
) -> String {
    hash_parts(&[
        entity_type,
        &created_at.to_rfc3339(),
        &updated_at.to_rfc3339(),
        previous_hash.unwrap_or(""),
    ])
}

/// `compute_integrity_hash(fact)` — SHA-256 over `(type, data, metadata,
/// realized_at, canonical_at)` using canonical (key-sorted) JSON for the
/// data/metadata maps.
pub fn compute_integrity_hash(
    fact_type: &str,
    data: &serde_json::Value,
    metadata: &serde_json::Value,
    realized_at: DateTime<Utc>,
    canonical_at: DateTime<Utc>,
) -> String {
    let canonical_data = canonical_json(data);
    let canonical_metadata = canonical_json(metadata);
    hash_parts(&[
        fact_type,
        &canonical_data,
        &canonical_metadata,
        &realized_at.to_rfc3339(),
        &canonical_at.to_rfc3339(),
    ])
}

/// Render JSON with map keys sorted, so semantically identical objects
/// hash identically regardless of field insertion order.
fn canonical_json(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_round_trip() {
        let bare = generate_uuid();
        let prefixed = add_prefix(Layer::Core, &bare);
        assert_eq!(strip_prefix(&prefixed), bare);
        assert_eq!(add_prefix(Layer::Core, strip_prefix(&prefixed)), prefixed);
    }

    #[test]
    fn strip_prefix_is_total_on_bare_uuid() {
        let bare = generate_uuid();
        assert_eq!(strip_prefix(&bare), bare);
    }

    #[test]
    fn day_to_date_inverts_current_day() {
        let day = current_day();
        let date = day_to_date(day);
        assert_eq!(date, Utc::now().date_naive());
    }

    #[test]
    fn entity_hash_is_deterministic() {
        let created = Utc::now();
        let h1 = compute_entity_hash("Entity", created, created, None);
        let h2 = compute_entity_hash("Entity", created, created, None);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn entity_hash_changes_with_previous_hash() {
        let created = Utc::now();
        let h1 = compute_entity_hash("Entity", created, created, None);
        let h2 = compute_entity_hash("Entity", created, created, Some(&h1));
        assert_ne!(h1, h2);
    }

    #[test]
    fn integrity_hash_ignores_key_order() {
        let data_a = serde_json::json!({"a": 1, "b": 2});
        let data_b = serde_json::json!({"b": 2, "a": 1});
        let meta = serde_json::json!({});
        let now = Utc::now();
        let h1 = compute_integrity_hash("Note", &data_a, &meta, now, now);
        let h2 = compute_integrity_hash("Note", &data_b, &meta, now, now);
        assert_eq!(h1, h2);
    }
}
