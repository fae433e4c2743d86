//! Artifact Delta Engine — line-oriented delta operations against an
//! `Artifact` entity's body, with hash-based optimistic locking and a
//! commit history recorded as `ArtifactDelta` facts.
//!
//! Position interpretation (pinning spec.md §9's open question): ops are
//! applied in declaration order, and every `<pos>` is resolved against the
//! buffer *as it stands after the previous op in the same commit* — so two
//! `-` ops in the same `ops` string must already account for the shift the
//! first one caused.
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};

use crate::entity::{Entity, EntityStore, UpdatePrecondition};
use crate::error::{CoreError, CoreResult};
use crate::soil::{Fact, FactStore, Fidelity, SystemRelation};

/// A single parsed delta operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    Insert { pos: usize, frag: String },
    Remove { pos: usize },
    Replace { pos: usize, from: String, to: String },
    Move { pos: usize, new_pos: usize },
}

/// Parse the `ops` string, one operation per non-empty line.
pub fn parse_ops(ops: &str) -> CoreResult<Vec<DeltaOp>> {
    ops.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(parse_op)
        .collect()
}

fn parse_op(line: &str) -> CoreResult<DeltaOp> {
    let invalid = || CoreError::Validation(format!("invalid delta op '{}'", line));
    let mut chars = line.chars();
    let tag = chars.next().ok_or_else(invalid)?;
    let rest = &line[tag.len_utf8()..];
    match tag {
        '+' => {
            let (pos, frag) = rest.split_once(':').ok_or_else(invalid)?;
            Ok(DeltaOp::Insert {
                pos: pos.parse().map_err(|_| invalid())?,
                frag: frag.to_string(),
            })
        }
        '-' => Ok(DeltaOp::Remove {
            pos: rest.parse().map_err(|_| invalid())?,
        }),
        '~' => {
            let (pos, frags) = rest.split_once(':').ok_or_else(invalid)?;
            let (from, to) = frags.split_once('\u{2192}').ok_or_else(invalid)?;
            Ok(DeltaOp::Replace {
                pos: pos.parse().map_err(|_| invalid())?,
                from: from.to_string(),
                to: to.to_string(),
            })
        }
        '>' => {
            let (pos, new_pos) = rest.split_once('@').ok_or_else(invalid)?;
            Ok(DeltaOp::Move {
                pos: pos.parse().map_err(|_| invalid())?,
                new_pos: new_pos.parse().map_err(|_| invalid())?,
            })
        }
        _ => Err(invalid()),
    }
}

/// Apply `ops` to `lines` in declaration order. Positions are 1-based and
/// resolved against the buffer's current state at each step.
fn apply_ops(lines: &mut Vec<String>, ops: &[DeltaOp]) -> CoreResult<()> {
    for op in ops {
        match op {
            DeltaOp::Insert { pos, frag } => {
                let idx = pos.saturating_sub(1).min(lines.len());
                lines.insert(idx, frag.clone());
            }
            DeltaOp::Remove { pos } => {
                let idx = pos
                    .checked_sub(1)
                    .filter(|i| *i < lines.len())
                    .ok_or_else(|| CoreError::Validation(format!("remove position {} out of range", pos)))?;
                lines.remove(idx);
            }
            DeltaOp::Replace { pos, from, to } => {
                let idx = pos
                    .checked_sub(1)
                    .filter(|i| *i < lines.len())
                    .ok_or_else(|| CoreError::Validation(format!("replace position {} out of range", pos)))?;
                if &lines[idx] != from {
                    return Err(CoreError::Validation(format!(
                        "replace at {} expected '{}' but found '{}'",
                        pos, from, lines[idx]
                    )));
                }
                lines[idx] = to.clone();
            }
            DeltaOp::Move { pos, new_pos } => {
                let idx = pos
                    .checked_sub(1)
                    .filter(|i| *i < lines.len())
                    .ok_or_else(|| CoreError::Validation(format!("move position {} out of range", pos)))?;
                let line = lines.remove(idx);
                let new_idx = new_pos.saturating_sub(1).min(lines.len());
                lines.insert(new_idx, line);
            }
        }
    }
    Ok(())
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

fn lines_to_content(lines: &[String]) -> String {
    lines.join("\n")
}

fn content_to_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        Vec::new()
    } else {
        content.split('\n').map(str::to_string).collect()
    }
}

fn current_artifact_hash(entity: &Entity) -> String {
    entity
        .data
        .get("hash")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn current_artifact_content(entity: &Entity) -> String {
    entity
        .data
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Result of a successful [`commit_delta`].
#[derive(Debug, Clone, Serialize)]
pub struct CommitResult {
    pub new_hash: String,
    pub new_content: String,
    pub delta_uuid: String,
    pub line_count: usize,
}

/// Apply `ops` to `artifact_uuid`'s current content, guarded by
/// `based_on_hash` optimistic locking, and record the result as an
/// `ArtifactDelta` fact (with a `triggers` relation to `source_message`,
/// when given).
pub fn commit_delta(
    entities: &EntityStore,
    facts: &FactStore,
    artifact_uuid: &str,
    ops: &str,
    references: serde_json::Value,
    based_on_hash: &str,
    source_message: Option<&str>,
) -> CoreResult<CommitResult> {
    let artifact = entities.get_entity(artifact_uuid)?;
    let current_hash = current_artifact_hash(&artifact);
    if current_hash != based_on_hash {
        return Err(CoreError::LockConflict(format!(
            "artifact '{}' is at hash '{}', not '{}'",
            artifact_uuid, current_hash, based_on_hash
        )));
    }

    let parsed = parse_ops(ops)?;
    let mut lines = content_to_lines(&current_artifact_content(&artifact));
    apply_ops(&mut lines, &parsed)?;
    let new_content = lines_to_content(&lines);
    let new_hash = content_hash(&new_content);
    let line_count = lines.len();

    entities.update_data(
        artifact_uuid,
        serde_json::json!({"content": new_content, "hash": new_hash, "line_count": line_count}),
        Vec::new(),
        &UpdatePrecondition::default(),
    )?;

    let now = Utc::now();
    let delta_data = serde_json::json!({
        "artifact_uuid": artifact_uuid,
        "ops": ops,
        "references": references,
        "based_on_hash": based_on_hash,
        "new_hash": new_hash,
        "new_content": new_content,
        "line_count": line_count,
    });
    let delta_fact = Fact {
        uuid: String::new(),
        fact_type: "ArtifactDelta".to_string(),
        data: delta_data,
        metadata: serde_json::json!({}),
        integrity_hash: String::new(),
        fidelity: Fidelity::Full,
        realized_at: now,
        canonical_at: now,
        superseded_by: None,
        superseded_at: None,
    };
    let delta_uuid = facts.create_fact(delta_fact)?;

    if let Some(message_uuid) = source_message {
        facts.create_system_relation(SystemRelation {
            uuid: String::new(),
            kind: "triggers".to_string(),
            source: delta_uuid.clone(),
            source_type: "ArtifactDelta".to_string(),
            target: message_uuid.to_string(),
            target_type: "Message".to_string(),
            created_at: now,
            evidence: None,
        })?;
    }

    tracing::debug!(artifact_uuid, new_hash = %new_hash, "artifact: delta committed");
    Ok(CommitResult {
        new_hash,
        new_content,
        delta_uuid,
        line_count,
    })
}

/// Return the artifact's state at `commit_hash`: the current state if it
/// matches, otherwise walk `ArtifactDelta` history in reverse until found.
pub fn get_artifact_at_commit(
    entities: &EntityStore,
    facts: &FactStore,
    artifact_uuid: &str,
    commit_hash: &str,
) -> CoreResult<String> {
    let artifact = entities.get_entity(artifact_uuid)?;
    if current_artifact_hash(&artifact) == commit_hash {
        return Ok(current_artifact_content(&artifact));
    }
    let mut deltas: Vec<Fact> = facts
        .list_facts(&crate::soil::FactFilters {
            fact_type: Some("ArtifactDelta".to_string()),
            include_superseded: true,
            start_index: 0,
            count: 0,
        })
        .rows
        .into_iter()
        .filter(|f| {
            f.data.get("artifact_uuid").and_then(|v| v.as_str()) == Some(artifact_uuid)
        })
        .collect();
    deltas.reverse();
    for delta in deltas {
        if delta.data.get("new_hash").and_then(|v| v.as_str()) == Some(commit_hash) {
            return Ok(delta
                .data
                .get("new_content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string());
        }
    }
    Err(CoreError::NotFound(format!(
        "no commit '{}' in artifact '{}' history",
        commit_hash, artifact_uuid
    )))
}

/// A single structured line change suitable for a three-way-merge UI.
#[derive(Debug, Clone, Serialize)]
pub struct DiffLine {
    pub op: String,
    pub line_no: usize,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Structured diff between two commits of the same artifact.
pub fn diff_commits(
    entities: &EntityStore,
    facts: &FactStore,
    artifact_uuid: &str,
    a: &str,
    b: &str,
) -> CoreResult<Vec<DiffLine>> {
    let content_a = get_artifact_at_commit(entities, facts, artifact_uuid, a)?;
    let content_b = get_artifact_at_commit(entities, facts, artifact_uuid, b)?;
    let diff = TextDiff::from_lines(&content_a, &content_b);
    let mut out = Vec::new();
    for (line_no, change) in diff.iter_all_changes().enumerate() {
        let op = match change.tag() {
            ChangeTag::Delete => "remove",
            ChangeTag::Insert => "insert",
            ChangeTag::Equal => continue,
        };
        out.push(DiffLine {
            op: op.to_string(),
            line_no: line_no + 1,
            old: matches!(change.tag(), ChangeTag::Delete).then(|| change.to_string().trim_end().to_string()),
            new: matches!(change.tag(), ChangeTag::Insert).then(|| change.to_string().trim_end().to_string()),
        });
    }
    Ok(out)
}

/// Attach a fold summary to a `ConversationLog` entity and mark it
/// collapsed. Idempotent under equal arguments — re-applying the same
/// fold just re-supersedes with identical content.
pub fn fold(
    entities: &EntityStore,
    log_uuid: &str,
    summary_content: &str,
    author: &str,
    fragment_ids: Option<serde_json::Value>,
) -> CoreResult<Entity> {
    let fold_record = serde_json::json!({
        "content": summary_content,
        "author": author,
        "timestamp": Utc::now().to_rfc3339(),
        "fragment_ids": fragment_ids.unwrap_or(serde_json::Value::Array(vec![])),
    });
    entities.update_data(
        log_uuid,
        serde_json::json!({"summary": fold_record, "collapsed": true}),
        Vec::new(),
        &UpdatePrecondition::default(),
    )
}
