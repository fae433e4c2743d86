//! Entity Store ("Core") — mutable, hash-chained entities.
//!
//! Unlike the Fact Store, an entity row is mutated in place by
//! [`EntityStore::update_data`], which advances the hash chain rather than
//! appending a new immutable record. Soft-delete is supersession by a
//! freshly-minted `Tombstone` entity, exactly as for facts.
mod relation;

pub use relation::{RelationEdit, RelationFilters, RelationQuery, UserRelation, SAFETY_COEFFICIENT, USER_RELATION_KINDS};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CoreError, CoreResult};
use crate::search::{coverage_paths, matches_substring, Coverage};
use crate::uid::{self, Layer};

pub use relation::RelationStore;

/// A mutable, hash-chained entity ("Core" row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub uuid: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: JsonValue,
    pub metadata: JsonValue,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub superseded_by: Option<String>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub group_id: String,
    pub derived_from: Option<String>,
}

/// Optimistic-concurrency precondition for [`EntityStore::update_data`].
#[derive(Debug, Clone, Default)]
pub struct UpdatePrecondition {
    pub based_on_version: Option<u64>,
    pub based_on_hash: Option<String>,
}

/// Equality filters for [`EntityStore::query_with_filters`].
#[derive(Debug, Clone, Default)]
pub struct EntityFilters {
    pub entity_type: Option<String>,
    pub include_superseded: bool,
    pub limit: usize,
    pub offset: usize,
}

/// Mutable entity store plus the relation sub-store ("Core").
pub struct EntityStore {
    entities: DashMap<String, Entity>,
    /// Full version history per entity `group_id`, for hash-chain
    /// verification and for `Entity`'s `derived_from`/lineage queries.
    history: DashMap<String, Vec<Entity>>,
    insertion_order: DashMap<String, u64>,
    next_seq: AtomicU64,
    baseline_types: Vec<String>,
    relations: RelationStore,
}

impl EntityStore {
    pub fn new(baseline_types: Vec<String>) -> Self {
        Self {
            entities: DashMap::new(),
            history: DashMap::new(),
            insertion_order: DashMap::new(),
            next_seq: AtomicU64::new(0),
            baseline_types,
            relations: RelationStore::new(),
        }
    }

    pub fn relations(&self) -> &RelationStore {
        &self.relations
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns `true` for types in the configured baseline set, or for
    /// `Tombstone`, which is always constructible internally regardless of
    /// configuration (soft-delete must never be blocked by config).
    fn is_allowed_type(&self, entity_type: &str) -> bool {
        entity_type == "Tombstone" || self.baseline_types.iter().any(|t| t == entity_type)
    }

    /// Construct a fresh entity: `version = 1`, `previous_hash = None`.
    pub fn create_entity(&self, entity_type: &str, data: Option<JsonValue>) -> CoreResult<String> {
        if !self.is_allowed_type(entity_type) {
            return Err(CoreError::Validation(format!(
                "unknown entity type '{}'",
                entity_type
            )));
        }
        let now = Utc::now();
        let uuid = uid::add_prefix(Layer::Core, &uid::generate_uuid());
        let hash = uid::compute_entity_hash(entity_type, now, now, None);
        let entity = Entity {
            uuid: uuid.clone(),
            entity_type: entity_type.to_string(),
            data: data.unwrap_or(JsonValue::Object(Default::default())),
            metadata: JsonValue::Object(Default::default()),
            hash,
            previous_hash: None,
            version: 1,
            created_at: now,
            updated_at: now,
            superseded_by: None,
            superseded_at: None,
            group_id: uuid.clone(),
            derived_from: None,
        };
        tracing::debug!(uuid = %uuid, entity_type, "core: entity created");
        self.insertion_order.insert(uuid.clone(), self.next_seq());
        self.history.insert(uuid.clone(), vec![entity.clone()]);
        self.entities.insert(uuid.clone(), entity);
        Ok(uuid)
    }

    /// Returns the current row; does not follow `superseded_by`.
    pub fn get_entity(&self, uuid: &str) -> CoreResult<Entity> {
        let key = uid::strip_prefix(uuid);
        self.entities
            .iter()
            .find(|e| uid::strip_prefix(&e.uuid) == key)
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotFound(format!("entity '{}' not found", uuid)))
    }

    /// Atomic read-modify-write: merges `set` into the existing `data`
    /// map, then removes every key named in `unset`, advances the hash
    /// chain, and bumps `version` by exactly 1. Fails `lock_conflict` if
    /// `precondition` was supplied and does not match the current row.
    pub fn update_data(
        &self,
        uuid: &str,
        set: JsonValue,
        unset: Vec<String>,
        precondition: &UpdatePrecondition,
    ) -> CoreResult<Entity> {
        let key = uid::strip_prefix(uuid).to_string();
        let mut entry = self
            .entities
            .iter_mut()
            .find(|e| uid::strip_prefix(&e.uuid) == key)
            .ok_or_else(|| CoreError::NotFound(format!("entity '{}' not found", uuid)))?;

        if let Some(expected_version) = precondition.based_on_version {
            if entry.version != expected_version {
                return Err(CoreError::LockConflict(format!(
                    "entity '{}' is at version {}, not {}",
                    uuid, entry.version, expected_version
                )));
            }
        }
        if let Some(expected_hash) = &precondition.based_on_hash {
            if &entry.hash != expected_hash {
                return Err(CoreError::LockConflict(format!(
                    "entity '{}' hash mismatch", uuid
                )));
            }
        }

        if let (JsonValue::Object(existing), JsonValue::Object(incoming)) =
            (&mut entry.data, set.clone())
        {
            for (k, v) in incoming {
                existing.insert(k, v);
            }
            for key in &unset {
                existing.remove(key);
            }
        } else {
            entry.data = set;
        }

        let now = Utc::now();
        entry.previous_hash = Some(entry.hash.clone());
        entry.version += 1;
        entry.updated_at = now;
        entry.hash =
            uid::compute_entity_hash(&entry.entity_type, entry.created_at, now, entry.previous_hash.as_deref());

        let updated = entry.clone();
        drop(entry);
        self.history
            .entry(updated.group_id.clone())
            .or_default()
            .push(updated.clone());
        tracing::debug!(uuid = %uuid, version = updated.version, "core: entity updated");
        Ok(updated)
    }

    /// Set `superseded_by`/`superseded_at` on `original`.
    pub fn supersede(&self, original: &str, new: &str, at: DateTime<Utc>) -> CoreResult<()> {
        let key = uid::strip_prefix(original).to_string();
        let mut entry = self
            .entities
            .iter_mut()
            .find(|e| uid::strip_prefix(&e.uuid) == key)
            .ok_or_else(|| CoreError::NotFound(format!("entity '{}' not found", original)))?;
        entry.superseded_by = Some(new.to_string());
        entry.superseded_at = Some(at);
        Ok(())
    }

    /// Soft-delete: mints a fresh `Tombstone` entity and supersedes
    /// `uuid` with it. Returns the superseded original.
    pub fn forget(&self, uuid: &str) -> CoreResult<Entity> {
        let tombstone_uuid = self.create_entity("Tombstone", None)?;
        self.supersede(uuid, &tombstone_uuid, Utc::now())?;
        self.get_entity(uuid)
    }

    /// Verify the stored hash chain for `uuid`'s `group_id`: replays
    /// `compute_entity_hash` for every recorded version and checks it
    /// against the stored `hash`, and that `previous_hash_{n+1} = hash_n`.
    pub fn verify_chain(&self, uuid: &str) -> bool {
        let key = uid::strip_prefix(uuid);
        let group_id = match self.entities.iter().find(|e| uid::strip_prefix(&e.uuid) == key) {
            Some(e) => e.group_id.clone(),
            None => return false,
        };
        let versions = match self.history.get(&group_id) {
            Some(v) => v.clone(),
            None => return false,
        };
        let mut prev_hash: Option<String> = None;
        for version in &versions {
            let expected = uid::compute_entity_hash(
                &version.entity_type,
                version.created_at,
                version.updated_at,
                prev_hash.as_deref(),
            );
            if expected != version.hash {
                return false;
            }
            if version.previous_hash != prev_hash {
                return false;
            }
            prev_hash = Some(version.hash.clone());
        }
        true
    }

    /// Equality filter on `type`; excludes superseded rows by default.
    pub fn query_with_filters(&self, filters: &EntityFilters) -> (Vec<Entity>, usize) {
        let mut matched: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| {
                filters
                    .entity_type
                    .as_ref()
                    .map(|t| t == &e.entity_type)
                    .unwrap_or(true)
            })
            .filter(|e| filters.include_superseded || e.superseded_by.is_none())
            .map(|e| e.clone())
            .collect();
        matched.sort_by_key(|e| {
            self.insertion_order
                .get(&e.uuid)
                .map(|v| *v)
                .unwrap_or(u64::MAX)
        });
        let total = matched.len();
        let limit = if filters.limit == 0 {
            total
        } else {
            filters.limit
        };
        let rows = matched.into_iter().skip(filters.offset).take(limit).collect();
        (rows, total)
    }

    pub fn search_entities(&self, query: &str, coverage: Coverage, limit: usize) -> Vec<Entity> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for entry in self.entities.iter() {
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

    fn store() -> EntityStore {
        EntityStore::new(vec!["Entity".into(), "Artifact".into()])
    }

    #[test]
    fn create_then_update_advances_chain() {
        let store = store();
        let uuid = store
            .create_entity("Entity", Some(serde_json::json!({"name": "Test", "value": 1})))
            .unwrap();
        let first = store.get_entity(&uuid).unwrap();
        assert_eq!(first.version, 1);
        assert!(first.previous_hash.is_none());

        let updated = store
            .update_data(
                &uuid,
                serde_json::json!({"name": "Updated", "new": "x"}),
                Vec::new(),
                &UpdatePrecondition::default(),
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.previous_hash.as_deref(), Some(first.hash.as_str()));
        assert_eq!(updated.data["value"], 1);
        assert_eq!(updated.data["name"], "Updated");
        assert!(store.verify_chain(&uuid));
    }

    #[test]
    fn update_with_stale_precondition_fails_lock_conflict() {
        let store = store();
        let uuid = store.create_entity("Entity", None).unwrap();
        let precondition = UpdatePrecondition {
            based_on_version: Some(99),
            based_on_hash: None,
        };
        let result = store.update_data(&uuid, serde_json::json!({}), Vec::new(), &precondition);
        assert!(matches!(result, Err(CoreError::LockConflict(_))));
    }

    #[test]
    fn update_data_removes_unset_keys() {
        let store = store();
        let uuid = store
            .create_entity("Entity", Some(serde_json::json!({"name": "Test", "temp": "remove_me"})))
            .unwrap();
        let updated = store
            .update_data(
                &uuid,
                serde_json::json!({}),
                vec!["temp".to_string()],
                &UpdatePrecondition::default(),
            )
            .unwrap();
        assert!(updated.data.get("temp").is_none());
        assert_eq!(updated.data["name"], "Test");
    }

    #[test]
    fn forget_supersedes_with_tombstone() {
        let store = store();
        let uuid = store.create_entity("Entity", None).unwrap();
        let forgotten = store.forget(&uuid).unwrap();
        assert!(forgotten.superseded_by.is_some());
        let tombstone = store.get_entity(forgotten.superseded_by.as_ref().unwrap()).unwrap();
        assert_eq!(tombstone.entity_type, "Tombstone");
    }

    #[test]
    fn get_returns_forgotten_entity_unchanged() {
        let store = store();
        let uuid = store.create_entity("Entity", None).unwrap();
        store.forget(&uuid).unwrap();
        let fetched = store.get_entity(&uuid).unwrap();
        assert!(fetched.superseded_by.is_some());
    }
}
