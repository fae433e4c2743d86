//! End-to-end scenarios driven through the audited dispatcher, exercising
//! the six walkthroughs the core modules were built against.
use memogarden_core::audit;
use memogarden_core::dispatcher::Op;
use memogarden_core::soil::FactFilters;
use memogarden_core::{MemoGarden, MemoGardenConfig};
use serde_json::json;

fn garden() -> MemoGarden {
    MemoGarden::new(MemoGardenConfig::default())
}

/// S1: create an entity, edit it, forget it, get it back.
#[test]
fn s1_create_edit_forget_get() {
    let garden = garden();

    let created = audit::run(&garden, "alice", Op::Create {
        entity_type: "Entity".into(),
        data: Some(json!({"name": "Groceries"})),
    }, false);
    assert!(created.ok);
    let uuid = created.result.unwrap()["uuid"].as_str().unwrap().to_string();

    let edited = audit::run(&garden, "alice", Op::Edit {
        target: uuid.clone(),
        set: Some(json!({"name": "Groceries (updated)"})),
        unset: None,
        based_on_version: None,
        based_on_hash: None,
    }, false);
    assert!(edited.ok);
    assert_eq!(edited.result.as_ref().unwrap()["version"], 2);

    let forgotten = audit::run(&garden, "alice", Op::Forget { target: uuid.clone() }, false);
    assert!(forgotten.ok);
    assert!(forgotten.result.unwrap()["superseded_by"].is_string());

    let fetched = audit::run(&garden, "alice", Op::Get { target: uuid }, false);
    assert!(fetched.ok);
    assert!(fetched.result.unwrap()["superseded_by"].is_string());
}

/// S2: amend a fact and confirm the original is superseded.
#[test]
fn s2_amend_fact() {
    let garden = garden();
    let original = audit::run(&garden, "alice", Op::Add {
        fact_type: "Note".into(),
        data: Some(json!({"title": "Draft"})),
        metadata: None,
        fidelity: None,
    }, false);
    let uuid = original.result.unwrap()["uuid"].as_str().unwrap().to_string();

    let amended = audit::run(&garden, "alice", Op::Amend {
        uuid: uuid.clone(),
        fact_type: "Note".into(),
        data: Some(json!({"title": "Final"})),
        metadata: None,
        fidelity: None,
    }, false);
    assert!(amended.ok);

    let page = garden.facts.list_facts(&FactFilters {
        fact_type: Some("Note".into()),
        include_superseded: false,
        start_index: 0,
        count: 0,
    });
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].data["title"], "Final");

    let original_row = garden.facts.get_fact(&uuid).unwrap();
    assert!(original_row.superseded_by.is_some());
}

/// S3: link two entities, access the relation via `track`, and watch the
/// horizon decay arithmetic run (exercised at the dispatcher boundary).
#[test]
fn s3_relation_decay_via_track() {
    let garden = garden();
    let a = audit::run(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }, false);
    let b = audit::run(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }, false);
    let source = a.result.unwrap()["uuid"].as_str().unwrap().to_string();
    let target = b.result.unwrap()["uuid"].as_str().unwrap().to_string();

    let linked = audit::run(&garden, "alice", Op::Link {
        kind: "explicit_link".into(),
        source: source.clone(),
        source_type: "Entity".into(),
        target: target.clone(),
        target_type: "Entity".into(),
        initial_horizon_days: Some(7),
    }, false);
    assert!(linked.ok);

    let tracked = audit::run(&garden, "alice", Op::Track {
        source, source_type: "Entity".into(), target, target_type: "Entity".into(), kind: Some("explicit_link".into()),
    }, false);
    assert!(tracked.ok);
    assert!(tracked.result.unwrap()["time_horizon"].as_i64().is_some());
}

/// S4: scope state machine through enter/leave/focus verbs.
#[test]
fn s4_scope_state_machine() {
    let garden = garden();
    let entered = audit::run(&garden, "operator1", Op::Enter {
        owner: "operator1".into(), owner_type: "operator".into(), scope: "project-x".into(),
    }, false);
    assert!(entered.ok);
    assert_eq!(entered.result.as_ref().unwrap()["primary_scope"], "project-x");

    let entered_second = audit::run(&garden, "operator1", Op::Enter {
        owner: "operator1".into(), owner_type: "operator".into(), scope: "project-y".into(),
    }, false);
    assert_eq!(entered_second.result.as_ref().unwrap()["primary_scope"], "project-x");

    let focused = audit::run(&garden, "operator1", Op::Focus {
        owner: "operator1".into(), owner_type: "operator".into(), scope: "project-y".into(),
    }, false);
    assert_eq!(focused.result.as_ref().unwrap()["primary_scope"], "project-y");

    let left = audit::run(&garden, "operator1", Op::Leave {
        owner: "operator1".into(), owner_type: "operator".into(), scope: "project-y".into(),
    }, false);
    assert!(left.result.as_ref().unwrap()["primary_scope"].is_null());
}

/// S5: commit an artifact delta, then attempt a second commit against the
/// stale hash and confirm the optimistic lock rejects it.
#[test]
fn s5_artifact_commit_conflict() {
    let garden = garden();
    let created = audit::run(&garden, "alice", Op::Create {
        entity_type: "Artifact".into(),
        data: Some(json!({"content": "", "hash": "e3b0c44298fc1c14", "line_count": 0})),
    }, false);
    let artifact_uuid = created.result.unwrap()["uuid"].as_str().unwrap().to_string();

    let first = audit::run(&garden, "alice", Op::CommitArtifact {
        artifact_uuid: artifact_uuid.clone(),
        ops: "+1:hello".into(),
        references: None,
        based_on_hash: "e3b0c44298fc1c14".into(),
        source_message: None,
    }, false);
    assert!(first.ok);

    let conflict = audit::run(&garden, "alice", Op::CommitArtifact {
        artifact_uuid,
        ops: "+1:goodbye".into(),
        references: None,
        based_on_hash: "e3b0c44298fc1c14".into(),
        source_message: None,
    }, false);
    assert!(!conflict.ok);
    assert_eq!(conflict.error.unwrap().code, "lock_conflict");
}

/// S6: a get on a nonexistent entity fails `not_found` and leaves behind
/// exactly one linked Action/ActionResult pair.
#[test]
fn s6_audit_on_error() {
    let garden = garden();
    let envelope = audit::run(&garden, "alice", Op::Get { target: "core_does_not_exist".into() }, false);
    assert!(!envelope.ok);
    assert_eq!(envelope.error.as_ref().unwrap().code, "not_found");

    let actions = garden.facts.list_facts(&FactFilters {
        fact_type: Some("Action".into()),
        include_superseded: false,
        start_index: 0,
        count: 0,
    });
    assert_eq!(actions.total, 1);
    assert_eq!(garden.facts.count_result_of(&actions.rows[0].uuid), 1);

    let bypassed = audit::run(&garden, "alice", Op::Get { target: "core_still_missing".into() }, true);
    assert!(!bypassed.ok);
    let actions_after = garden.facts.list_facts(&FactFilters {
        fact_type: Some("Action".into()),
        include_superseded: false,
        start_index: 0,
        count: 0,
    });
    assert_eq!(actions_after.total, 1, "bypass_semantic_api must not add a new Action fact");
}

/// The startup consistency sweep stays normal across an ordinary session.
#[test]
fn consistency_sweep_stays_normal_after_a_session() {
    let garden = garden();
    audit::run(&garden, "alice", Op::Create { entity_type: "Entity".into(), data: None }, false);
    audit::run(&garden, "alice", Op::Add { fact_type: "Note".into(), data: None, metadata: None, fidelity: None }, false);
    assert_eq!(garden.status().status, memogarden_core::transaction::SystemStatus::Normal);
}
