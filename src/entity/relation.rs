//! User relation sub-store — the time-horizon relation graph.
//!
//! Relations are mutable but narrow: only `time_horizon`, `last_access_at`,
//! `metadata`, and `evidence` ever change after creation. A relation is
//! **alive** iff `time_horizon >= today`; access refreshes the horizon by
//! the decay arithmetic in `update_time_horizon`.
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, CoreResult};
use crate::uid::{self, Layer};

/// The bounded set of relation kinds the store accepts. `explicit_link`
/// is the baseline kind created by the `link` verb; the others support
/// `explore`/`track`-style lineage queries.
pub const USER_RELATION_KINDS: &[&str] = &[
    "explicit_link",
    "reference",
    "mentions",
    "depends_on",
];

/// The multiplicative factor applied to elapsed days when a relation is
/// accessed, refreshing its horizon ("safety coefficient", spec.md §3).
pub const SAFETY_COEFFICIENT: f64 = 1.2;

const DEFAULT_INITIAL_HORIZON_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRelation {
    pub uuid: String,
    pub kind: String,
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
    pub time_horizon: i64,
    pub last_access_at: i64,
    pub created_at: i64,
    pub metadata: JsonValue,
    pub evidence: Option<JsonValue>,
}

impl UserRelation {
    pub fn is_alive(&self, today: i64) -> bool {
        self.time_horizon >= today
    }
}

/// Mutable fields accepted by [`RelationStore::edit_relation`].
#[derive(Debug, Clone, Default)]
pub struct RelationEdit {
    pub time_horizon: Option<i64>,
    pub metadata: Option<JsonValue>,
    pub evidence: Option<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationFilters {
    pub kind: Option<String>,
    pub alive_only: bool,
}

/// General filter query for [`RelationStore::query`] — `query_relation`'s
/// wire shape, unanchored on either end unlike `explore`/`list_inbound`/
/// `list_outbound`.
#[derive(Debug, Clone, Default)]
pub struct RelationQuery {
    pub source: Option<String>,
    pub target: Option<String>,
    pub kind: Option<String>,
    pub alive_only: bool,
    pub limit: Option<usize>,
}

pub struct RelationStore {
    relations: DashMap<String, UserRelation>,
}

impl RelationStore {
    pub fn new() -> Self {
        Self {
            relations: DashMap::new(),
        }
    }

    /// `time_horizon = today + initial_horizon_days`;
    /// `last_access_at = created_at = today`. Validates `kind`.
    pub fn create_relation(
        &self,
        kind: &str,
        source: &str,
        source_type: &str,
        target: &str,
        target_type: &str,
        initial_horizon_days: Option<i64>,
    ) -> CoreResult<String> {
        if !USER_RELATION_KINDS.contains(&kind) {
            return Err(CoreError::Validation(format!(
                "unknown relation kind '{}'",
                kind
            )));
        }
        let today = uid::current_day();
        let horizon_days = initial_horizon_days.unwrap_or(DEFAULT_INITIAL_HORIZON_DAYS);
        let uuid = uid::add_prefix(Layer::Core, &uid::generate_uuid());
        let relation = UserRelation {
            uuid: uuid.clone(),
            kind: kind.to_string(),
            source: source.to_string(),
            source_type: source_type.to_string(),
            target: target.to_string(),
            target_type: target_type.to_string(),
            time_horizon: today + horizon_days,
            last_access_at: today,
            created_at: today,
            metadata: JsonValue::Object(Default::default()),
            evidence: None,
        };
        tracing::debug!(uuid = %uuid, kind, "core: relation created");
        self.relations.insert(uuid.clone(), relation);
        Ok(uuid)
    }

    pub fn get_relation(&self, uuid: &str) -> CoreResult<UserRelation> {
        let key = uid::strip_prefix(uuid);
        self.relations
            .iter()
            .find(|r| uid::strip_prefix(&r.uuid) == key)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::NotFound(format!("relation '{}' not found", uuid)))
    }

    pub fn delete_relation(&self, uuid: &str) -> CoreResult<()> {
        let key = uid::strip_prefix(uuid).to_string();
        let found = self
            .relations
            .iter()
            .find(|r| uid::strip_prefix(&r.uuid) == key)
            .map(|r| r.uuid.clone());
        match found {
            Some(full_uuid) => {
                self.relations.remove(&full_uuid);
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("relation '{}' not found", uuid))),
        }
    }

    pub fn edit_relation(&self, uuid: &str, set: RelationEdit) -> CoreResult<UserRelation> {
        let key = uid::strip_prefix(uuid).to_string();
        let mut entry = self
            .relations
            .iter_mut()
            .find(|r| uid::strip_prefix(&r.uuid) == key)
            .ok_or_else(|| CoreError::NotFound(format!("relation '{}' not found", uuid)))?;
        if let Some(horizon) = set.time_horizon {
            entry.time_horizon = horizon;
        }
        if let Some(metadata) = set.metadata {
            entry.metadata = metadata;
        }
        if let Some(evidence) = set.evidence {
            entry.evidence = Some(evidence);
        }
        Ok(entry.clone())
    }

    fn matches(&self, relation: &UserRelation, filters: &RelationFilters, today: i64) -> bool {
        filters
            .kind
            .as_ref()
            .map(|k| k == &relation.kind)
            .unwrap_or(true)
            && (!filters.alive_only || relation.is_alive(today))
    }

    pub fn list_inbound(&self, uuid: &str, filters: &RelationFilters) -> Vec<UserRelation> {
        let key = uid::strip_prefix(uuid);
        let today = uid::current_day();
        self.relations
            .iter()
            .filter(|r| uid::strip_prefix(&r.target) == key)
            .filter(|r| self.matches(r, filters, today))
            .map(|r| r.clone())
            .collect()
    }

    pub fn list_outbound(&self, uuid: &str, filters: &RelationFilters) -> Vec<UserRelation> {
        let key = uid::strip_prefix(uuid);
        let today = uid::current_day();
        self.relations
            .iter()
            .filter(|r| uid::strip_prefix(&r.source) == key)
            .filter(|r| self.matches(r, filters, today))
            .map(|r| r.clone())
            .collect()
    }

    /// Every relation in the store matching `filters`, with no source/target
    /// constraint. Used by the consistency sweep.
    pub fn list_all(&self, filters: &RelationFilters) -> Vec<UserRelation> {
        let today = uid::current_day();
        self.relations
            .iter()
            .filter(|r| self.matches(r, filters, today))
            .map(|r| r.clone())
            .collect()
    }

    /// General filter query backing the `query_relation` verb: any
    /// combination of `source`/`target`/`kind`/`alive_only`, capped by
    /// `limit`. Unlike `explore`, neither end is required.
    pub fn query(&self, query: &RelationQuery) -> Vec<UserRelation> {
        let today = uid::current_day();
        let mut rows: Vec<UserRelation> = self
            .relations
            .iter()
            .filter(|r| {
                query
                    .source
                    .as_ref()
                    .map(|s| uid::strip_prefix(&r.source) == uid::strip_prefix(s))
                    .unwrap_or(true)
                    && query
                        .target
                        .as_ref()
                        .map(|t| uid::strip_prefix(&r.target) == uid::strip_prefix(t))
                        .unwrap_or(true)
                    && query.kind.as_ref().map(|k| k == &r.kind).unwrap_or(true)
                    && (!query.alive_only || r.is_alive(today))
            })
            .map(|r| r.clone())
            .collect();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        rows
    }

    /// `time_horizon := time_horizon + floor((today - last_access_at) * S)`,
    /// `last_access_at := today`. Atomic read-modify-write.
    pub fn update_time_horizon(&self, uuid: &str, coefficient: f64) -> CoreResult<UserRelation> {
        let key = uid::strip_prefix(uuid).to_string();
        let mut entry = self
            .relations
            .iter_mut()
            .find(|r| uid::strip_prefix(&r.uuid) == key)
            .ok_or_else(|| CoreError::NotFound(format!("relation '{}' not found", uuid)))?;
        let today = uid::current_day();
        let elapsed = (today - entry.last_access_at) as f64;
        let growth = (elapsed * coefficient).floor() as i64;
        entry.time_horizon += growth;
        entry.last_access_at = today;
        Ok(entry.clone())
    }

    /// `max(time_horizon)` over inbound alive relations, or `None`.
    pub fn fact_time_horizon(&self, uuid: &str) -> Option<i64> {
        let filters = RelationFilters {
            kind: None,
            alive_only: true,
        };
        self.list_inbound(uuid, &filters)
            .into_iter()
            .map(|r| r.time_horizon)
            .max()
    }

    /// Sets `time_horizon = today - 1`. One-way — there is no "un-expire".
    pub fn expire(&self, uuid: &str) -> CoreResult<UserRelation> {
        let key = uid::strip_prefix(uuid).to_string();
        let mut entry = self
            .relations
            .iter_mut()
            .find(|r| uid::strip_prefix(&r.uuid) == key)
            .ok_or_else(|| CoreError::NotFound(format!("relation '{}' not found", uuid)))?;
        entry.time_horizon = uid::current_day() - 1;
        Ok(entry.clone())
    }
}

impl Default for RelationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_sets_horizon_seven_days_out() {
        let store = RelationStore::new();
        let uuid = store
            .create_relation("explicit_link", "core_a", "Entity", "core_b", "Entity", Some(7))
            .unwrap();
        let rel = store.get_relation(&uuid).unwrap();
        let today = uid::current_day();
        assert_eq!(rel.time_horizon, today + 7);
        assert_eq!(rel.last_access_at, today);
    }

    #[test]
    fn update_time_horizon_applies_safety_coefficient() {
        let store = RelationStore::new();
        let uuid = store
            .create_relation("explicit_link", "core_a", "Entity", "core_b", "Entity", Some(7))
            .unwrap();
        {
            let key = uid::strip_prefix(&uuid).to_string();
            let mut entry = store
                .relations
                .iter_mut()
                .find(|r| uid::strip_prefix(&r.uuid) == key)
                .unwrap();
            entry.last_access_at -= 1;
        }
        let updated = store.update_time_horizon(&uuid, SAFETY_COEFFICIENT).unwrap();
        let today = uid::current_day();
        assert_eq!(updated.time_horizon, today + 7 + 1);
        assert_eq!(updated.last_access_at, today);
    }

    #[test]
    fn expire_then_not_alive_and_filtered_from_inbound() {
        let store = RelationStore::new();
        let uuid = store
            .create_relation("explicit_link", "core_a", "Entity", "core_b", "Entity", Some(7))
            .unwrap();
        store.expire(&uuid).unwrap();
        let rel = store.get_relation(&uuid).unwrap();
        assert!(!rel.is_alive(uid::current_day()));
        let inbound = store.list_inbound(
            "core_b",
            &RelationFilters {
                kind: None,
                alive_only: true,
            },
        );
        assert!(inbound.is_empty());
    }

    #[test]
    fn create_rejects_unknown_kind() {
        let store = RelationStore::new();
        let result = store.create_relation("bogus_kind", "a", "Entity", "b", "Entity", None);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
