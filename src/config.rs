//! Configuration options (spec.md §6). Loading from TOML/env files is an
//! external collaborator's job (spec.md §1); this struct is just the
//! typed bag of knobs the substrate itself understands, built by the
//! caller or by the CLI binary's own `clap` arguments.
use crate::context::{CONTEXT_MAX, CONTEXT_MIN, DEFAULT_CONTEXT_SIZE};
use crate::entity::SAFETY_COEFFICIENT;

/// Default baseline entity types accepted by `create` (spec.md §3
/// supplement: `Transaction`/`Recurrence` are domain CRUD view types
/// layered over generic entity operations, carried here as plain data
/// shapes with no bespoke store logic).
pub fn default_baseline_entity_types() -> Vec<String> {
    vec![
        "Entity".into(),
        "Artifact".into(),
        "Label".into(),
        "Operator".into(),
        "Agent".into(),
        "Transaction".into(),
        "Recurrence".into(),
        "ConversationLog".into(),
    ]
}

/// Default baseline fact types accepted by `add`.
pub fn default_baseline_item_types() -> Vec<String> {
    vec![
        "Note".into(),
        "Message".into(),
        "Email".into(),
        "ToolCall".into(),
        "EntityDelta".into(),
        "SystemEvent".into(),
        "Action".into(),
        "ActionResult".into(),
        "ArtifactDelta".into(),
    ]
}

#[derive(Debug, Clone)]
pub struct MemoGardenConfig {
    /// LRU-N bound for `ContextFrame.containers`. Must lie in
    /// `[CONTEXT_MIN, CONTEXT_MAX]`.
    pub context_size: usize,
    /// Multiplier for relation horizon growth on access.
    pub safety_coefficient: f64,
    /// Closed set of allowable entity types for `create`.
    pub baseline_entity_types: Vec<String>,
    /// Closed set of allowable fact types for `add`.
    pub baseline_item_types: Vec<String>,
    /// Idle interval between SSE keepalive frames.
    pub context_event_keepalive_s: u64,
    /// Address the HTTP transport binds to.
    pub bind_address: String,
}

impl Default for MemoGardenConfig {
    fn default() -> Self {
        Self {
            context_size: DEFAULT_CONTEXT_SIZE,
            safety_coefficient: SAFETY_COEFFICIENT,
            baseline_entity_types: default_baseline_entity_types(),
            baseline_item_types: default_baseline_item_types(),
            context_event_keepalive_s: 30,
            bind_address: "127.0.0.1:8080".to_string(),
        }
    }
}

impl MemoGardenConfig {
    /// Validate `context_size` lies in the configured LRU-N bound.
    pub fn validate(&self) -> Result<(), String> {
        if !(CONTEXT_MIN..=CONTEXT_MAX).contains(&self.context_size) {
            return Err(format!(
                "context_size {} out of range [{}, {}]",
                self.context_size, CONTEXT_MIN, CONTEXT_MAX
            ));
        }
        Ok(())
    }
}
