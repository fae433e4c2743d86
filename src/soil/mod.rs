//! Fact Store ("Soil") — append-only store of typed facts.
//!
//! Facts are immutable. Amendment never rewrites a row; it creates a new
//! fact plus a `supersedes` [`SystemRelation`] from new to old and sets
//! `superseded_by` on the old one. Unlike the Entity Store, a fact row is
//! never touched except by [`FactStore::mark_superseded`].
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CoreError, CoreResult};
use crate::search::{coverage_paths, matches_substring, Coverage};
use crate::uid::{self, Layer};

/// Fidelity marker for a fact — whether it represents a full capture of
/// the source event or only a partial one (e.g. a truncated tool call).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    Full,
    Partial,
}

/// An immutable fact ("Item" in the persisted `item` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub uuid: String,
    #[serde(rename = "_type")]
    pub fact_type: String,
    pub data: JsonValue,
    pub metadata: JsonValue,
    pub integrity_hash: String,
    pub fidelity: Fidelity,
    pub realized_at: DateTime<Utc>,
    pub canonical_at: DateTime<Utc>,
    pub superseded_by: Option<String>,
    pub superseded_at: Option<DateTime<Utc>>,
}

/// An immutable audit/lineage edge between two facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRelation {
    pub uuid: String,
    pub kind: String,
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
    pub created_at: DateTime<Utc>,
    pub evidence: Option<JsonValue>,
}

/// Equality filters accepted by [`FactStore::list_facts`].
#[derive(Debug, Clone, Default)]
pub struct FactFilters {
    pub fact_type: Option<String>,
    pub include_superseded: bool,
    pub start_index: usize,
    pub count: usize,
}

/// A page of facts plus the total count matching the filter (ignoring
/// pagination), mirroring the Entity Store's `query_with_filters` shape.
#[derive(Debug, Clone)]
pub struct FactPage {
    pub rows: Vec<Fact>,
    pub total: usize,
}

/// Append-only fact store. Thread-safe via `DashMap`; facts and system
/// relations never move once inserted — mutation is limited to the two
/// supersession fields on a `Fact`.
pub struct FactStore {
    facts: DashMap<String, Fact>,
    relations: DashMap<String, SystemRelation>,
    insertion_order: DashMap<String, u64>,
    next_seq: AtomicU64,
    baseline_types: Vec<String>,
}

impl FactStore {
    pub fn new(baseline_types: Vec<String>) -> Self {
        Self {
            facts: DashMap::new(),
            relations: DashMap::new(),
            insertion_order: DashMap::new(),
            next_seq: AtomicU64::new(0),
            baseline_types,
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Store a new immutable fact. Computes `integrity_hash` if the caller
    /// left it empty. Fails `validation_error` if `_type` is outside the
    /// configured baseline set.
    pub fn create_fact(&self, mut fact: Fact) -> CoreResult<String> {
        if !self.baseline_types.iter().any(|t| t == &fact.fact_type) {
            return Err(CoreError::Validation(format!(
                "unknown fact type '{}'",
                fact.fact_type
            )));
        }
        if fact.uuid.is_empty() {
            fact.uuid = uid::add_prefix(Layer::Soil, &uid::generate_uuid());
        }
        if fact.integrity_hash.is_empty() {
            fact.integrity_hash = uid::compute_integrity_hash(
                &fact.fact_type,
                &fact.data,
                &fact.metadata,
                fact.realized_at,
                fact.canonical_at,
            );
        }
        let uuid = fact.uuid.clone();
        tracing::debug!(uuid = %uuid, fact_type = %fact.fact_type, "soil: fact created");
        self.insertion_order.insert(uuid.clone(), self.next_seq());
        self.facts.insert(uuid.clone(), fact);
        Ok(uuid)
    }

    pub fn get_fact(&self, uuid: &str) -> CoreResult<Fact> {
        let key = uid::strip_prefix(uuid);
        self.facts
            .iter()
            .find(|entry| uid::strip_prefix(&entry.uuid) == key)
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::NotFound(format!("fact '{}' not found", uuid)))
    }

    /// Set `superseded_by`/`superseded_at` on `original`. Idempotent when
    /// called again with the same `new`; fails `validation_error` if
    /// `original` is already superseded by a *different* fact.
    pub fn mark_superseded(
        &self,
        original: &str,
        new: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let key = uid::strip_prefix(original).to_string();
        let mut entry = self
            .facts
            .iter_mut()
            .find(|e| uid::strip_prefix(&e.uuid) == key)
            .ok_or_else(|| CoreError::NotFound(format!("fact '{}' not found", original)))?;
        match &entry.superseded_by {
            Some(existing) if uid::strip_prefix(existing) != uid::strip_prefix(new) => {
                Err(CoreError::Validation(format!(
                    "fact '{}' already superseded by a different fact",
                    original
                )))
            }
            _ => {
                entry.superseded_by = Some(new.to_string());
                entry.superseded_at = Some(at);
                Ok(())
            }
        }
    }

    /// Insert an immutable system relation. Insert-only.
    pub fn create_system_relation(&self, mut rel: SystemRelation) -> CoreResult<String> {
        if rel.uuid.is_empty() {
            rel.uuid = uid::add_prefix(Layer::Rel, &uid::generate_uuid());
        }
        let uuid = rel.uuid.clone();
        tracing::debug!(uuid = %uuid, kind = %rel.kind, "soil: system relation created");
        self.relations.insert(uuid.clone(), rel);
        Ok(uuid)
    }

    pub fn get_system_relation(&self, uuid: &str) -> CoreResult<SystemRelation> {
        let key = uid::strip_prefix(uuid);
        self.relations
            .iter()
            .find(|entry| uid::strip_prefix(&entry.uuid) == key)
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::NotFound(format!("system relation '{}' not found", uuid)))
    }

    /// Count the `result_of` relations that point at `action_uuid` as target.
    pub fn count_result_of(&self, action_uuid: &str) -> usize {
        let key = uid::strip_prefix(action_uuid);
        self.relations
            .iter()
            .filter(|r| r.kind == "result_of" && uid::strip_prefix(&r.target) == key)
            .count()
    }

    /// Count the `result_of` relations that originate at `result_uuid` as source.
    pub fn count_result_of_by_source(&self, result_uuid: &str) -> usize {
        let key = uid::strip_prefix(result_uuid);
        self.relations
            .iter()
            .filter(|r| r.kind == "result_of" && uid::strip_prefix(&r.source) == key)
            .count()
    }

    /// Equality filters on `_type`, pagination by `(start_index, count)`;
    /// excludes superseded facts by default.
    pub fn list_facts(&self, filters: &FactFilters) -> FactPage {
        let mut matched: Vec<Fact> = self
            .facts
            .iter()
            .filter(|f| {
                filters
                    .fact_type
                    .as_ref()
                    .map(|t| t == &f.fact_type)
                    .unwrap_or(true)
            })
            .filter(|f| filters.include_superseded || f.superseded_by.is_none())
            .map(|f| f.clone())
            .collect();
        matched.sort_by_key(|f| {
            self.insertion_order
                .get(&f.uuid)
                .map(|v| *v)
                .unwrap_or(u64::MAX)
        });
        let total = matched.len();
        let count = if filters.count == 0 {
            total
        } else {
            filters.count
        };
        let rows = matched
            .into_iter()
            .skip(filters.start_index)
            .take(count)
            .collect();
        FactPage { rows, total }
    }

    /// Case-insensitive substring scan over `data`/`metadata` JSON paths
    /// determined by `coverage`.
    pub fn search_facts(&self, query: &str, coverage: Coverage, limit: usize) -> Vec<Fact> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for entry in self.facts.iter() {
            if entry.superseded_by.is_some() {
                continue;
            }
            let paths = coverage_paths(coverage, &entry.data, &entry.metadata);
            if matches_substring(&paths, &needle) {
                results.push(entry.clone());
                if results.len() >= limit {
                    break;
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FactStore {
        FactStore::new(vec!["Note".into(), "Action".into(), "ActionResult".into()])
    }

    fn note(title: &str) -> Fact {
        let now = Utc::now();
        Fact {
            uuid: String::new(),
            fact_type: "Note".into(),
            data: serde_json::json!({"title": title}),
            metadata: serde_json::json!({}),
            integrity_hash: String::new(),
            fidelity: Fidelity::Full,
            realized_at: now,
            canonical_at: now,
            superseded_by: None,
            superseded_at: None,
        }
    }

    #[test]
    fn create_rejects_unknown_type() {
        let store = store();
        let mut f = note("x");
        f.fact_type = "Bogus".into();
        assert!(matches!(store.create_fact(f), Err(CoreError::Validation(_))));
    }

    #[test]
    fn amend_then_second_amend_fails() {
        let store = store();
        let u1 = store.create_fact(note("Original")).unwrap();
        let u2 = store.create_fact(note("Corrected")).unwrap();
        store.mark_superseded(&u1, &u2, Utc::now()).unwrap();
        let again = store.create_fact(note("Again"));
        let u3 = again.unwrap();
        assert!(store.mark_superseded(&u1, &u3, Utc::now()).is_err());
    }

    #[test]
    fn mark_superseded_idempotent_with_same_target() {
        let store = store();
        let u1 = store.create_fact(note("Original")).unwrap();
        let u2 = store.create_fact(note("Corrected")).unwrap();
        store.mark_superseded(&u1, &u2, Utc::now()).unwrap();
        assert!(store.mark_superseded(&u1, &u2, Utc::now()).is_ok());
    }

    #[test]
    fn list_facts_excludes_superseded_by_default() {
        let store = store();
        let u1 = store.create_fact(note("Original")).unwrap();
        let u2 = store.create_fact(note("Corrected")).unwrap();
        store.mark_superseded(&u1, &u2, Utc::now()).unwrap();
        let page = store.list_facts(&FactFilters {
            fact_type: Some("Note".into()),
            include_superseded: false,
            start_index: 0,
            count: 0,
        });
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].uuid, u2);
    }
}
