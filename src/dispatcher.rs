//! Verb Dispatcher — the single entry point every transport (HTTP, CLI,
//! audit wrapper) routes through. `Op` is the closed, internally-tagged
//! union of every verb bundle; [`dispatch`] matches on it and drives the
//! store methods, returning the raw JSON result (the audit/envelope layer
//! wraps it in `{ok, actor, timestamp, result|error}`).
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::artifact;
use crate::context::{is_substantive, OwnerType};
use crate::core::MemoGarden;
use crate::entity::{RelationEdit, RelationFilters, RelationQuery, UpdatePrecondition};
use crate::error::{CoreError, CoreResult};
use crate::search::{self, SearchParams};
use crate::soil::{Fact, FactFilters, Fidelity};
use crate::uid;

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Create {
        #[serde(rename = "type")]
        entity_type: String,
        data: Option<JsonValue>,
    },
    Edit {
        target: String,
        set: Option<JsonValue>,
        unset: Option<Vec<String>>,
        based_on_version: Option<u64>,
        based_on_hash: Option<String>,
    },
    Forget {
        target: String,
    },
    Get {
        target: String,
    },
    Query {
        target_type: Option<String>,
        entity_type: Option<String>,
        fact_type: Option<String>,
        #[serde(default)]
        include_superseded: bool,
        #[serde(default)]
        limit: usize,
        #[serde(default)]
        offset: usize,
    },
    Add {
        #[serde(rename = "type")]
        fact_type: String,
        data: Option<JsonValue>,
        metadata: Option<JsonValue>,
        fidelity: Option<String>,
    },
    Amend {
        uuid: String,
        #[serde(rename = "type")]
        fact_type: String,
        data: Option<JsonValue>,
        metadata: Option<JsonValue>,
        fidelity: Option<String>,
    },
    Link {
        kind: String,
        source: String,
        source_type: String,
        target: String,
        target_type: String,
        initial_horizon_days: Option<i64>,
    },
    Unlink {
        target: String,
    },
    EditRelation {
        target: String,
        time_horizon: Option<i64>,
        metadata: Option<JsonValue>,
        evidence: Option<JsonValue>,
    },
    GetRelation {
        target: String,
    },
    QueryRelation {
        source: Option<String>,
        target: Option<String>,
        kind: Option<String>,
        #[serde(default)]
        alive_only: bool,
        limit: Option<usize>,
    },
    Explore {
        uuid: String,
        kind: Option<String>,
    },
    Track {
        source: String,
        source_type: String,
        target: String,
        target_type: String,
        kind: Option<String>,
    },
    Enter {
        owner: String,
        owner_type: String,
        scope: String,
    },
    Leave {
        owner: String,
        owner_type: String,
        scope: String,
    },
    Focus {
        owner: String,
        owner_type: String,
        scope: String,
    },
    CommitArtifact {
        artifact_uuid: String,
        ops: String,
        references: Option<JsonValue>,
        based_on_hash: String,
        source_message: Option<String>,
    },
    GetArtifactAtCommit {
        artifact_uuid: String,
        commit_hash: String,
    },
    DiffCommits {
        artifact_uuid: String,
        a: String,
        b: String,
    },
    Fold {
        target: String,
        summary_content: String,
        author: String,
        fragment_ids: Option<JsonValue>,
    },
    GetConversation {
        log_uuid: String,
    },
    Search {
        #[serde(flatten)]
        params: SearchParams,
    },
}

impl Op {
    /// The verb name, for audit-fact `data.operation` and tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Create { .. } => "create",
            Op::Edit { .. } => "edit",
            Op::Forget { .. } => "forget",
            Op::Get { .. } => "get",
            Op::Query { .. } => "query",
            Op::Add { .. } => "add",
            Op::Amend { .. } => "amend",
            Op::Link { .. } => "link",
            Op::Unlink { .. } => "unlink",
            Op::EditRelation { .. } => "edit_relation",
            Op::GetRelation { .. } => "get_relation",
            Op::QueryRelation { .. } => "query_relation",
            Op::Explore { .. } => "explore",
            Op::Track { .. } => "track",
            Op::Enter { .. } => "enter",
            Op::Leave { .. } => "leave",
            Op::Focus { .. } => "focus",
            Op::CommitArtifact { .. } => "commit_artifact",
            Op::GetArtifactAtCommit { .. } => "get_artifact_at_commit",
            Op::DiffCommits { .. } => "diff_commits",
            Op::Fold { .. } => "fold",
            Op::GetConversation { .. } => "get_conversation",
            Op::Search { .. } => "search",
        }
    }
}

fn parse_fidelity(fidelity: Option<String>) -> Fidelity {
    match fidelity.as_deref() {
        Some("partial") => Fidelity::Partial,
        _ => Fidelity::Full,
    }
}

fn parse_owner_type(raw: &str) -> CoreResult<OwnerType> {
    match raw {
        "operator" => Ok(OwnerType::Operator),
        "agent" => Ok(OwnerType::Agent),
        "scope" => Ok(OwnerType::Scope),
        other => Err(CoreError::Validation(format!("unknown owner_type '{}'", other))),
    }
}

/// Touch `actor`'s operator context frame for a substantive entity that
/// was just read, maintaining the LRU-N container window (spec.md §5,
/// I-LRU). Best-effort: failures are logged, never propagated — a context
/// bookkeeping miss must not fail the read it rode in on.
fn touch_context(garden: &MemoGarden, actor: &str, entity_type: &str, uuid: &str) {
    if !is_substantive(entity_type) {
        return;
    }
    let frame = match garden.context.get_context_frame(actor, OwnerType::Operator, true) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(actor, %err, "dispatcher: could not resolve context frame");
            return;
        }
    };
    match garden
        .context
        .update_containers(&frame.uuid, uuid, garden.config.context_size)
    {
        Ok(updated) => {
            garden.events.publish("frame_updated", json!({ "frame": updated.uuid }), None).ok();
        }
        Err(err) => {
            tracing::warn!(actor, %err, "dispatcher: context container update failed");
        }
    }
}

/// Route `op` to the owning store and run it. Returns the JSON-shaped
/// domain result; the audit layer wraps it into the wire envelope.
pub fn dispatch(garden: &MemoGarden, actor: &str, op: Op) -> CoreResult<JsonValue> {
    match op {
        Op::Create { entity_type, data } => {
            let uuid = garden.entities.create_entity(&entity_type, data)?;
            Ok(json!({ "uuid": uuid }))
        }
        Op::Edit { target, set, unset, based_on_version, based_on_hash } => {
            if let Some(unset_fields) = &unset {
                if unset_fields.is_empty() {
                    return Err(CoreError::Validation(
                        "unset must not be empty when provided".to_string(),
                    ));
                }
            }
            let precondition = UpdatePrecondition { based_on_version, based_on_hash };
            let entity = garden.entities.update_data(
                &target,
                set.unwrap_or(json!({})),
                unset.unwrap_or_default(),
                &precondition,
            )?;
            Ok(serde_json::to_value(entity)?)
        }
        Op::Forget { target } => {
            let entity = garden.entities.forget(&target)?;
            Ok(serde_json::to_value(entity)?)
        }
        Op::Get { target } => {
            if target.starts_with("soil_") {
                let fact = garden.facts.get_fact(&target)?;
                Ok(serde_json::to_value(fact)?)
            } else {
                let entity = garden.entities.get_entity(&target)?;
                touch_context(garden, actor, &entity.entity_type, &entity.uuid);
                Ok(serde_json::to_value(entity)?)
            }
        }
        Op::Query { target_type, entity_type, fact_type, include_superseded, limit, offset } => {
            if target_type.as_deref() == Some("fact") {
                let page = garden.facts.list_facts(&FactFilters {
                    fact_type,
                    include_superseded,
                    start_index: offset,
                    count: limit,
                });
                Ok(json!({ "rows": page.rows, "total": page.total }))
            } else {
                let (rows, total) = garden.entities.query_with_filters(&crate::entity::EntityFilters {
                    entity_type,
                    include_superseded,
                    limit,
                    offset,
                });
                Ok(json!({ "rows": rows, "total": total }))
            }
        }
        Op::Add { fact_type, data, metadata, fidelity } => {
            let now = chrono::Utc::now();
            let is_message = fact_type == "Message";
            let fact = Fact {
                uuid: String::new(),
                fact_type,
                data: data.unwrap_or(JsonValue::Object(Default::default())),
                metadata: metadata.unwrap_or(JsonValue::Object(Default::default())),
                integrity_hash: String::new(),
                fidelity: parse_fidelity(fidelity),
                realized_at: now,
                canonical_at: now,
                superseded_by: None,
                superseded_at: None,
            };
            let uuid = garden.facts.create_fact(fact)?;
            if is_message {
                garden.events.publish("message_sent", json!({ "uuid": uuid }), None).ok();
            }
            Ok(json!({ "uuid": uuid }))
        }
        Op::Amend { uuid, fact_type, data, metadata, fidelity } => {
            let now = chrono::Utc::now();
            let fact = Fact {
                uuid: String::new(),
                fact_type,
                data: data.unwrap_or(JsonValue::Object(Default::default())),
                metadata: metadata.unwrap_or(JsonValue::Object(Default::default())),
                integrity_hash: String::new(),
                fidelity: parse_fidelity(fidelity),
                realized_at: now,
                canonical_at: now,
                superseded_by: None,
                superseded_at: None,
            };
            let new_uuid = garden.facts.create_fact(fact)?;
            garden.facts.mark_superseded(&uuid, &new_uuid, now)?;
            Ok(json!({ "uuid": new_uuid }))
        }
        Op::Link { kind, source, source_type, target, target_type, initial_horizon_days } => {
            let uuid = garden.entities.relations().create_relation(
                &kind, &source, &source_type, &target, &target_type, initial_horizon_days,
            )?;
            garden.events.publish("relation_created", json!({ "uuid": uuid, "kind": kind }), None).ok();
            Ok(json!({ "uuid": uuid }))
        }
        Op::Unlink { target } => {
            garden.entities.relations().delete_relation(&target)?;
            Ok(json!({}))
        }
        Op::EditRelation { target, time_horizon, metadata, evidence } => {
            let relation = garden.entities.relations().edit_relation(&target, RelationEdit { time_horizon, metadata, evidence })?;
            garden.events.publish("relation_modified", json!({ "uuid": relation.uuid }), None).ok();
            Ok(serde_json::to_value(relation)?)
        }
        Op::GetRelation { target } => {
            let relation = garden.entities.relations().get_relation(&target)?;
            Ok(serde_json::to_value(relation)?)
        }
        Op::QueryRelation { source, target, kind, alive_only, limit } => {
            let query = RelationQuery { source, target, kind, alive_only, limit };
            let rows = garden.entities.relations().query(&query);
            Ok(json!({ "count": rows.len(), "results": rows }))
        }
        Op::Explore { uuid, kind } => {
            let filters = RelationFilters { kind, alive_only: true };
            let mut rows = garden.entities.relations().list_outbound(&uuid, &filters);
            rows.extend(garden.entities.relations().list_inbound(&uuid, &filters));
            Ok(json!({ "rows": rows }))
        }
        Op::Track { source, source_type, target, target_type, kind } => {
            let kind = kind.unwrap_or_else(|| "explicit_link".to_string());
            let existing = garden
                .entities
                .relations()
                .list_outbound(&source, &RelationFilters { kind: Some(kind.clone()), alive_only: false })
                .into_iter()
                .find(|r| uid::strip_prefix(&r.target) == uid::strip_prefix(&target));
            let relation = match existing {
                Some(rel) => garden
                    .entities
                    .relations()
                    .update_time_horizon(&rel.uuid, garden.config.safety_coefficient)?,
                None => {
                    let uuid = garden.entities.relations().create_relation(
                        &kind, &source, &source_type, &target, &target_type, None,
                    )?;
                    garden.entities.relations().get_relation(&uuid)?
                }
            };
            garden.events.publish("relation_modified", json!({ "uuid": relation.uuid }), None).ok();
            Ok(serde_json::to_value(relation)?)
        }
        Op::Enter { owner, owner_type, scope } => {
            let owner_type = parse_owner_type(&owner_type)?;
            let frame = garden.context.get_context_frame(&owner, owner_type, true)?;
            let frame = garden.context.enter_scope(&frame.uuid, &scope)?;
            garden.events.publish("scope_created", json!({ "owner": owner, "scope": scope }), None).ok();
            Ok(serde_json::to_value(frame)?)
        }
        Op::Leave { owner, owner_type, scope } => {
            let owner_type = parse_owner_type(&owner_type)?;
            let frame = garden.context.get_context_frame(&owner, owner_type, true)?;
            let frame = garden.context.leave_scope(&frame.uuid, &scope)?;
            garden.events.publish("scope_modified", json!({ "owner": owner, "scope": scope }), None).ok();
            Ok(serde_json::to_value(frame)?)
        }
        Op::Focus { owner, owner_type, scope } => {
            let owner_type = parse_owner_type(&owner_type)?;
            let frame = garden.context.get_context_frame(&owner, owner_type, true)?;
            let frame = garden.context.focus_scope(&frame.uuid, &scope)?;
            garden.events.publish("scope_modified", json!({ "owner": owner, "scope": scope }), None).ok();
            Ok(serde_json::to_value(frame)?)
        }
        Op::CommitArtifact { artifact_uuid, ops, references, based_on_hash, source_message } => {
            let result = artifact::commit_delta(
                &garden.entities,
                &garden.facts,
                &artifact_uuid,
                &ops,
                references.unwrap_or(json!({})),
                &based_on_hash,
                source_message.as_deref(),
            )?;
            garden.events.publish("artifact_delta", json!({ "artifact_uuid": artifact_uuid, "new_hash": result.new_hash }), None).ok();
            Ok(serde_json::to_value(result)?)
        }
        Op::GetArtifactAtCommit { artifact_uuid, commit_hash } => {
            let content = artifact::get_artifact_at_commit(&garden.entities, &garden.facts, &artifact_uuid, &commit_hash)?;
            Ok(json!({ "content": content }))
        }
        Op::DiffCommits { artifact_uuid, a, b } => {
            let lines = artifact::diff_commits(&garden.entities, &garden.facts, &artifact_uuid, &a, &b)?;
            Ok(json!({ "lines": lines }))
        }
        Op::Fold { target, summary_content, author, fragment_ids } => {
            let entity = artifact::fold(&garden.entities, &target, &summary_content, &author, fragment_ids)?;
            Ok(serde_json::to_value(entity)?)
        }
        Op::GetConversation { log_uuid } => {
            let entity = garden.entities.get_entity(&log_uuid)?;
            Ok(serde_json::to_value(entity)?)
        }
        Op::Search { params } => {
            let hits = search::search(&garden.entities, &garden.facts, &params);
            Ok(json!({ "hits": hits }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoGardenConfig;

    fn garden() -> MemoGarden {
        MemoGarden::new(MemoGardenConfig::default())
    }

    #[test]
    fn create_then_get_round_trips() {
        let garden = garden();
        let result = dispatch(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }).unwrap();
        let uuid = result["uuid"].as_str().unwrap().to_string();
        let fetched = dispatch(&garden, "alice", Op::Get { target: uuid.clone() }).unwrap();
        assert_eq!(fetched["uuid"], uuid);
    }

    #[test]
    fn get_touches_operator_context_for_substantive_type() {
        let garden = garden();
        let result = dispatch(&garden, "alice", Op::Create { entity_type: "Artifact".into(), data: None }).unwrap();
        let uuid = result["uuid"].as_str().unwrap().to_string();
        dispatch(&garden, "alice", Op::Get { target: uuid.clone() }).unwrap();
        let frame = garden.context.get_context_frame("alice", OwnerType::Operator, false).unwrap();
        assert!(frame.containers.contains(&uuid));
    }

    #[test]
    fn get_nonexistent_entity_is_not_found() {
        let garden = garden();
        let result = dispatch(&garden, "alice", Op::Get { target: "core_missing".into() });
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn track_creates_then_refreshes_on_second_call() {
        let garden = garden();
        let a = dispatch(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }).unwrap();
        let b = dispatch(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }).unwrap();
        let source = a["uuid"].as_str().unwrap().to_string();
        let target = b["uuid"].as_str().unwrap().to_string();
        let first = dispatch(&garden, "alice", Op::Track {
            source: source.clone(), source_type: "Entity".into(),
            target: target.clone(), target_type: "Entity".into(), kind: None,
        }).unwrap();
        let second = dispatch(&garden, "alice", Op::Track {
            source, source_type: "Entity".into(), target, target_type: "Entity".into(), kind: None,
        }).unwrap();
        assert_eq!(first["uuid"], second["uuid"]);
    }
}
