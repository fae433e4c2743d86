//! Audit & Event Bus — audit half. Wraps [`dispatch`] so every verb call
//! (unless `bypass_semantic_api` is set) is bracketed by an `Action` fact
//! written before the call and an `ActionResult` fact linked to it by a
//! `result_of` system relation written after — success or failure alike.
//! Each bracket fact is its own fire-and-forget write: a failure to record
//! the audit trail is logged and swallowed, never allowed to mask the
//! caller's real result.
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::core::MemoGarden;
use crate::dispatcher::{dispatch, Op};
use crate::error::CoreError;
use crate::soil::{Fact, Fidelity, SystemRelation};
use crate::uid;

/// The wire envelope every verb call returns, success or failure.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub ok: bool,
    pub actor: String,
    pub timestamp: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

/// `op`'s wire fields minus the `op` tag itself — spec.md §4.7's
/// "`params` is a JSON-serialised copy of the request with `op` and
/// `bypass_semantic_api` removed" (the latter never reaches `Op` at all,
/// since it's stripped by `WireRequest` before `Op` is deserialized).
fn build_params(op: &Op) -> JsonValue {
    let mut value = serde_json::to_value(op).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(map) = &mut value {
        map.remove("op");
    }
    value
}

fn write_action(garden: &MemoGarden, actor: &str, op: &Op, request_id: &str) -> Option<String> {
    let now = Utc::now();
    let fact = Fact {
        uuid: String::new(),
        fact_type: "Action".to_string(),
        data: json!({
            "actor": actor,
            "operation": op.name(),
            "params": build_params(op),
            "context": JsonValue::Null,
            "request_id": request_id,
            "parent_action": JsonValue::Null,
        }),
        metadata: json!({}),
        integrity_hash: String::new(),
        fidelity: Fidelity::Full,
        realized_at: now,
        canonical_at: now,
        superseded_by: None,
        superseded_at: None,
    };
    match garden.facts.create_fact(fact) {
        Ok(uuid) => Some(uuid),
        Err(err) => {
            tracing::warn!(%err, "audit: failed to write Action fact");
            None
        }
    }
}

/// A short one-line summary of the outcome, always prefixed by the verb
/// name (audit consumers filter on that prefix, e.g. `starts_with("get")`).
fn result_summary(op_name: &str, envelope: &Envelope) -> String {
    match &envelope.error {
        None => format!("{op_name} succeeded"),
        Some(error) => format!("{op_name} failed: {}", error.message),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_action_result(
    garden: &MemoGarden,
    action_uuid: &str,
    op_name: &str,
    envelope: &Envelope,
    duration_ms: u64,
    error_type: Option<&str>,
    error_traceback: Option<&str>,
) {
    let now = Utc::now();
    let error = envelope.error.as_ref().map(|e| {
        json!({
            "code": e.code,
            "message": e.message,
            "details": e.details,
        })
    });
    let fact = Fact {
        uuid: String::new(),
        fact_type: "ActionResult".to_string(),
        data: json!({
            "status": if envelope.ok { "success" } else { "error" },
            "duration_ms": duration_ms,
            "result": envelope.result,
            "error": error,
            "result_summary": result_summary(op_name, envelope),
            "error_type": error_type,
            "error_traceback": error_traceback,
        }),
        metadata: json!({}),
        integrity_hash: String::new(),
        fidelity: Fidelity::Full,
        realized_at: now,
        canonical_at: now,
        superseded_by: None,
        superseded_at: None,
    };
    let result_uuid = match garden.facts.create_fact(fact) {
        Ok(uuid) => uuid,
        Err(err) => {
            tracing::warn!(%err, "audit: failed to write ActionResult fact");
            return;
        }
    };
    let relation = SystemRelation {
        uuid: String::new(),
        kind: "result_of".to_string(),
        source: result_uuid,
        source_type: "ActionResult".to_string(),
        target: action_uuid.to_string(),
        target_type: "Action".to_string(),
        created_at: now,
        evidence: None,
    };
    if let Err(err) = garden.facts.create_system_relation(relation) {
        tracing::warn!(%err, "audit: failed to link ActionResult to Action");
    }
}

/// Run `op` for `actor` through the dispatcher, writing the audit trail
/// unless `bypass_semantic_api` is set. Always returns an [`Envelope`] —
/// dispatch errors are captured in `error`, never propagated as `Err`.
pub fn run(garden: &MemoGarden, actor: &str, op: Op, bypass_semantic_api: bool) -> Envelope {
    let op_name = op.name();
    let request_id = uid::generate_uuid();
    let action_uuid = if bypass_semantic_api {
        None
    } else {
        write_action(garden, actor, &op, &request_id)
    };

    let start = Instant::now();
    let outcome = dispatch(garden, actor, op);
    let duration_ms = start.elapsed().as_millis() as u64;

    let (envelope, error_type, error_traceback) = match outcome {
        Ok(result) => (
            Envelope {
                ok: true,
                actor: actor.to_string(),
                timestamp: Utc::now(),
                result: Some(result),
                error: None,
            },
            None,
            None,
        ),
        Err(err) => {
            tracing::warn!(op = op_name, %err, "dispatcher: op failed");
            let error_type = err.variant_name().to_string();
            let error_traceback = format!("{err:?}");
            let envelope = Envelope {
                ok: false,
                actor: actor.to_string(),
                timestamp: Utc::now(),
                result: None,
                error: Some(error_body(&err)),
            };
            (envelope, Some(error_type), Some(error_traceback))
        }
    };

    if let Some(action_uuid) = action_uuid {
        write_action_result(
            garden,
            &action_uuid,
            op_name,
            &envelope,
            duration_ms,
            error_type.as_deref(),
            error_traceback.as_deref(),
        );
    }

    envelope
}

fn error_body(err: &CoreError) -> ErrorBody {
    ErrorBody {
        code: err.code().as_str(),
        message: err.to_string(),
        details: None,
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
    fn failed_get_produces_linked_action_and_result_s6() {
        let garden = garden();
        let envelope = run(&garden, "alice", Op::Get { target: "core_missing".into() }, false);
        assert!(!envelope.ok);
        assert_eq!(envelope.error.as_ref().unwrap().code, "not_found");

        let actions = garden.facts.list_facts(&crate::soil::FactFilters {
            fact_type: Some("Action".into()),
            include_superseded: false,
            start_index: 0,
            count: 0,
        });
        assert_eq!(actions.total, 1);
        let action = &actions.rows[0];
        assert_eq!(action.data["operation"], "get");
        assert_eq!(action.data["params"]["target"], "core_missing");
        assert!(action.data["request_id"].is_string());

        let results = garden.facts.list_facts(&crate::soil::FactFilters {
            fact_type: Some("ActionResult".into()),
            include_superseded: false,
            start_index: 0,
            count: 0,
        });
        assert_eq!(results.total, 1);
        let result = &results.rows[0];
        assert_eq!(result.data["status"], "error");
        assert!(result.data["duration_ms"].is_u64());
        assert_eq!(result.data["error"]["code"], "not_found");
        assert!(result.data["result_summary"].as_str().unwrap().starts_with("get"));
        assert_eq!(result.data["error_type"], "CoreError::NotFound");
        assert_eq!(garden.facts.count_result_of(&action.uuid), 1);
    }

    #[test]
    fn bypass_semantic_api_suppresses_audit_facts() {
        let garden = garden();
        run(&garden, "alice", Op::Get { target: "core_missing".into() }, true);
        let actions = garden.facts.list_facts(&crate::soil::FactFilters {
            fact_type: Some("Action".into()),
            include_superseded: false,
            start_index: 0,
            count: 0,
        });
        assert_eq!(actions.total, 0);
    }

    #[test]
    fn successful_op_is_audited_too() {
        let garden = garden();
        let envelope = run(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }, false);
        assert!(envelope.ok);
        let actions = garden.facts.list_facts(&crate::soil::FactFilters {
            fact_type: Some("Action".into()),
            include_superseded: false,
            start_index: 0,
            count: 0,
        });
        assert_eq!(actions.total, 1);
        assert_eq!(actions.rows[0].data["operation"], "create");

        let results = garden.facts.list_facts(&crate::soil::FactFilters {
            fact_type: Some("ActionResult".into()),
            include_superseded: false,
            start_index: 0,
            count: 0,
        });
        assert_eq!(results.rows[0].data["status"], "success");
        assert!(results.rows[0].data["error"].is_null());
    }
}
