//! Transaction Coordinator — cross-store atomicity bookkeeping and the
//! derived system-status machine.
//!
//! The "atomicity" the coordinator owns is narrow: the Fact Store and
//! Entity Store are independent `DashMap`-backed stores with no shared
//! transaction log, so what the coordinator actually guarantees is
//! acquisition ordering (Fact before Entity, spec.md §5) and a
//! consistency sweep that can be run at startup or on demand.
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::entity::EntityStore;
use crate::soil::{FactFilters, FactStore};

/// Derived system status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Normal,
    Inconsistent,
    ReadOnly,
    SafeMode,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Normal => "normal",
            SystemStatus::Inconsistent => "inconsistent",
            SystemStatus::ReadOnly => "read_only",
            SystemStatus::SafeMode => "safe_mode",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub status: SystemStatus,
    pub issues: Vec<String>,
}

pub struct TransactionCoordinator {
    read_only: AtomicBool,
    safe_mode: AtomicBool,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self {
            read_only: AtomicBool::new(false),
            safe_mode: AtomicBool::new(false),
        }
    }

    pub fn set_read_only(&self, value: bool) {
        self.read_only.store(value, Ordering::SeqCst);
    }

    pub fn set_safe_mode(&self, value: bool) {
        self.safe_mode.store(value, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::SeqCst)
    }

    /// Run once at startup: currently a no-op beyond the initial
    /// consistency sweep, since both stores are in-process and always
    /// "exist" once constructed — there is no on-disk schema to migrate.
    pub fn init_system(&self, entities: &EntityStore, facts: &FactStore) -> ConsistencyReport {
        tracing::info!("transaction: system initialized");
        self.check_consistency(entities, facts)
    }

    /// Sweep both stores for the invariants spec.md §4.8 lists. Returns
    /// `ReadOnly`/`SafeMode` if those flags are set regardless of sweep
    /// results (an operator override takes priority), else `Inconsistent`
    /// if any check failed, else `Normal`.
    pub fn check_consistency(&self, entities: &EntityStore, facts: &FactStore) -> ConsistencyReport {
        let mut issues = Vec::new();

        let deltas = facts.list_facts(&FactFilters {
            fact_type: Some("ArtifactDelta".to_string()),
            include_superseded: true,
            start_index: 0,
            count: 0,
        });
        for delta in &deltas.rows {
            if let Some(artifact_uuid) = delta.data.get("artifact_uuid").and_then(|v| v.as_str()) {
                if entities.get_entity(artifact_uuid).is_err() {
                    issues.push(format!(
                        "ArtifactDelta '{}' references missing artifact '{}'",
                        delta.uuid, artifact_uuid
                    ));
                }
            }
        }

        let results = facts.list_facts(&FactFilters {
            fact_type: Some("ActionResult".to_string()),
            include_superseded: true,
            start_index: 0,
            count: 0,
        });
        for result in &results.rows {
            if facts.count_result_of_by_source(&result.uuid) != 1 {
                issues.push(format!(
                    "ActionResult '{}' does not have exactly one result_of relation",
                    result.uuid
                ));
            }
        }

        let all_entities = entities.query_with_filters(&crate::entity::EntityFilters {
            entity_type: None,
            include_superseded: true,
            limit: 0,
            offset: 0,
        });
        for entity in &all_entities.0 {
            if !entities.verify_chain(&entity.uuid) {
                issues.push(format!("entity '{}' has a broken hash chain", entity.uuid));
            }
        }

        let alive_relations = entities.relations().list_all(&crate::entity::RelationFilters {
            kind: None,
            alive_only: true,
        });
        for relation in &alive_relations {
            if entities.get_entity(&relation.source).is_err() {
                issues.push(format!(
                    "relation '{}' references missing source '{}'",
                    relation.uuid, relation.source
                ));
            }
            if entities.get_entity(&relation.target).is_err() {
                issues.push(format!(
                    "relation '{}' references missing target '{}'",
                    relation.uuid, relation.target
                ));
            }
        }

        let status = if self.is_safe_mode() {
            SystemStatus::SafeMode
        } else if self.is_read_only() {
            SystemStatus::ReadOnly
        } else if !issues.is_empty() {
            SystemStatus::Inconsistent
        } else {
            SystemStatus::Normal
        };

        if status != SystemStatus::Normal {
            tracing::warn!(status = status.as_str(), issue_count = issues.len(), "transaction: consistency issues detected");
        }

        ConsistencyReport { status, issues }
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soil::{Fact, Fidelity};

    #[test]
    fn consistency_normal_on_fresh_stores() {
        let entities = EntityStore::new(vec!["Entity".into()]);
        let facts = FactStore::new(vec!["ActionResult".into()]);
        let coordinator = TransactionCoordinator::new();
        let report = coordinator.check_consistency(&entities, &facts);
        assert_eq!(report.status, SystemStatus::Normal);
    }

    #[test]
    fn dangling_artifact_delta_is_inconsistent() {
        let entities = EntityStore::new(vec!["Entity".into()]);
        let facts = FactStore::new(vec!["ArtifactDelta".into()]);
        let now = chrono::Utc::now();
        facts
            .create_fact(Fact {
                uuid: String::new(),
                fact_type: "ArtifactDelta".into(),
                data: serde_json::json!({"artifact_uuid": "core_missing"}),
                metadata: serde_json::json!({}),
                integrity_hash: String::new(),
                fidelity: Fidelity::Full,
                realized_at: now,
                canonical_at: now,
                superseded_by: None,
                superseded_at: None,
            })
            .unwrap();
        let coordinator = TransactionCoordinator::new();
        let report = coordinator.check_consistency(&entities, &facts);
        assert_eq!(report.status, SystemStatus::Inconsistent);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn relation_dangling_on_missing_target_is_inconsistent() {
        let entities = EntityStore::new(vec!["Entity".into()]);
        let facts = FactStore::new(vec![]);
        let source = entities.create_entity("Entity", None).unwrap();
        entities
            .relations()
            .create_relation("explicit_link", &source, "Entity", "core_missing", "Entity", Some(7))
            .unwrap();
        let coordinator = TransactionCoordinator::new();
        let report = coordinator.check_consistency(&entities, &facts);
        assert_eq!(report.status, SystemStatus::Inconsistent);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn read_only_override_takes_priority() {
        let entities = EntityStore::new(vec!["Entity".into()]);
        let facts = FactStore::new(vec![]);
        let coordinator = TransactionCoordinator::new();
        coordinator.set_read_only(true);
        let report = coordinator.check_consistency(&entities, &facts);
        assert_eq!(report.status, SystemStatus::ReadOnly);
    }
}
