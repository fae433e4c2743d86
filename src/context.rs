//! Context Subsystem — per-owner context frames, LRU containers, scopes,
//! and the view-stream.
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::uid::{self, Layer};

/// Lower bound of the configurable LRU-N container window.
pub const CONTEXT_MIN: usize = 1;
/// Upper bound of the configurable LRU-N container window.
pub const CONTEXT_MAX: usize = 50;
/// Default container window size.
pub const DEFAULT_CONTEXT_SIZE: usize = 7;

/// Entity types a [`ContextFrame`] treats as worth tracking in its
/// container window versus types it never surfaces there.
pub const SUBSTANTIVE_TYPES: &[&str] = &["Artifact", "Entity", "Agent", "Operator", "Transaction"];
pub const PRIMITIVE_TYPES: &[&str] = &["Tombstone", "ContextFrame", "Label"];

pub fn is_substantive(entity_type: &str) -> bool {
    SUBSTANTIVE_TYPES.contains(&entity_type)
}

pub fn is_primitive(entity_type: &str) -> bool {
    PRIMITIVE_TYPES.contains(&entity_type)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Operator,
    Agent,
    Scope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFrame {
    pub uuid: String,
    pub owner: String,
    pub owner_type: OwnerType,
    pub containers: Vec<String>,
    pub view_timeline: Vec<String>,
    pub active_scopes: Vec<String>,
    pub primary_scope: Option<String>,
    pub is_subordinate: bool,
    pub parent_frame_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub visited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub uuid: String,
    pub context_frame_uuid: String,
    pub actor: String,
    pub actions: Vec<ViewAction>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub prev: Option<String>,
}

pub struct ContextSubsystem {
    frames: DashMap<String, ContextFrame>,
    /// `(owner, owner_type)` -> primary frame uuid, enforcing I-One-Per-Owner.
    by_owner: DashMap<(String, OwnerType), String>,
    views: DashMap<String, View>,
}

impl ContextSubsystem {
    pub fn new() -> Self {
        Self {
            frames: DashMap::new(),
            by_owner: DashMap::new(),
            views: DashMap::new(),
        }
    }

    /// Upsert the primary `ContextFrame` for `(owner, owner_type)`.
    /// Enforces **I-One-Per-Owner**.
    pub fn get_context_frame(
        &self,
        owner: &str,
        owner_type: OwnerType,
        create_if_missing: bool,
    ) -> CoreResult<ContextFrame> {
        let key = (owner.to_string(), owner_type);
        if let Some(uuid) = self.by_owner.get(&key) {
            return Ok(self.frames.get(uuid.as_str()).unwrap().clone());
        }
        if !create_if_missing {
            return Err(CoreError::NotFound(format!(
                "no context frame for owner '{}'",
                owner
            )));
        }
        let uuid = uid::add_prefix(Layer::Core, &uid::generate_uuid());
        let frame = ContextFrame {
            uuid: uuid.clone(),
            owner: owner.to_string(),
            owner_type,
            containers: Vec::new(),
            view_timeline: Vec::new(),
            active_scopes: Vec::new(),
            primary_scope: None,
            is_subordinate: false,
            parent_frame_uuid: None,
        };
        self.by_owner.insert(key, uuid.clone());
        self.frames.insert(uuid.clone(), frame.clone());
        tracing::debug!(uuid = %uuid, owner, "context: frame created");
        Ok(frame)
    }

    fn with_frame<F>(&self, frame_uuid: &str, f: F) -> CoreResult<ContextFrame>
    where
        F: FnOnce(&mut ContextFrame) -> CoreResult<()>,
    {
        let key = uid::strip_prefix(frame_uuid).to_string();
        let mut entry = self
            .frames
            .iter_mut()
            .find(|e| uid::strip_prefix(e.key()) == key)
            .ok_or_else(|| CoreError::NotFound(format!("context frame '{}' not found", frame_uuid)))?;
        f(&mut entry)?;
        Ok(entry.clone())
    }

    /// Move-to-front LRU update: `visited_uuid` moves to index 0; if it
    /// was absent, the tail beyond `context_size` is evicted.
    pub fn update_containers(
        &self,
        frame_uuid: &str,
        visited_uuid: &str,
        context_size: usize,
    ) -> CoreResult<ContextFrame> {
        if !(CONTEXT_MIN..=CONTEXT_MAX).contains(&context_size) {
            return Err(CoreError::Validation(format!(
                "context_size {} out of range [{}, {}]",
                context_size, CONTEXT_MIN, CONTEXT_MAX
            )));
        }
        self.with_frame(frame_uuid, |frame| {
            frame.containers.retain(|c| c != visited_uuid);
            frame.containers.insert(0, visited_uuid.to_string());
            frame.containers.truncate(context_size);
            Ok(())
        })
    }

    /// Fork a subordinate frame from `parent_uuid`, inheriting its
    /// `containers` snapshot at fork time (**I-Fork-Inherit**).
    pub fn fork_frame(
        &self,
        parent_uuid: &str,
        owner: &str,
        owner_type: OwnerType,
    ) -> CoreResult<ContextFrame> {
        let parent = self.get_frame_by_uuid(parent_uuid)?;
        let uuid = uid::add_prefix(Layer::Core, &uid::generate_uuid());
        let frame = ContextFrame {
            uuid: uuid.clone(),
            owner: owner.to_string(),
            owner_type,
            containers: parent.containers.clone(),
            view_timeline: Vec::new(),
            active_scopes: Vec::new(),
            primary_scope: None,
            is_subordinate: true,
            parent_frame_uuid: Some(parent.uuid.clone()),
        };
        self.frames.insert(uuid.clone(), frame.clone());
        Ok(frame)
    }

    pub fn get_frame_by_uuid(&self, frame_uuid: &str) -> CoreResult<ContextFrame> {
        let key = uid::strip_prefix(frame_uuid);
        self.frames
            .iter()
            .find(|e| uid::strip_prefix(e.key()) == key)
            .map(|e| e.clone())
            .ok_or_else(|| CoreError::NotFound(format!("context frame '{}' not found", frame_uuid)))
    }

    /// Enters `scope` on an operator frame. Fails if `owner_type != operator`
    /// or `scope` is already active. Sets `primary_scope` on the first
    /// entry (**I-First-Scope-Primary**).
    pub fn enter_scope(&self, frame_uuid: &str, scope: &str) -> CoreResult<ContextFrame> {
        self.with_frame(frame_uuid, |frame| {
            if frame.owner_type != OwnerType::Operator {
                return Err(CoreError::Validation(
                    "scopes are only valid for operator frames".into(),
                ));
            }
            if frame.active_scopes.iter().any(|s| s == scope) {
                return Err(CoreError::Validation(format!(
                    "scope '{}' is already active",
                    scope
                )));
            }
            frame.active_scopes.push(scope.to_string());
            if frame.primary_scope.is_none() {
                frame.primary_scope = Some(scope.to_string());
            }
            Ok(())
        })
    }

    /// Leaves `scope`. Clears `primary_scope` if it was the one leaving.
    pub fn leave_scope(&self, frame_uuid: &str, scope: &str) -> CoreResult<ContextFrame> {
        self.with_frame(frame_uuid, |frame| {
            if !frame.active_scopes.iter().any(|s| s == scope) {
                return Err(CoreError::Validation(format!(
                    "scope '{}' is not active",
                    scope
                )));
            }
            frame.active_scopes.retain(|s| s != scope);
            if frame.primary_scope.as_deref() == Some(scope) {
                frame.primary_scope = None;
            }
            Ok(())
        })
    }

    /// Sets `primary_scope := scope`. Fails if `scope` is not active
    /// (precondition preserves **I-Focus-Membership**).
    pub fn focus_scope(&self, frame_uuid: &str, scope: &str) -> CoreResult<ContextFrame> {
        self.with_frame(frame_uuid, |frame| {
            if !frame.active_scopes.iter().any(|s| s == scope) {
                return Err(CoreError::Validation(format!(
                    "scope '{}' is not active",
                    scope
                )));
            }
            frame.primary_scope = Some(scope.to_string());
            Ok(())
        })
    }

    /// `started_at := actions[0].timestamp`; requires `actions` non-empty.
    pub fn create_view(
        &self,
        frame_uuid: &str,
        actor: &str,
        actions: Vec<ViewAction>,
        prev: Option<String>,
    ) -> CoreResult<View> {
        if actions.is_empty() {
            return Err(CoreError::Validation("a view requires at least one action".into()));
        }
        let started_at = actions[0].timestamp;
        let uuid = uid::add_prefix(Layer::Core, &uid::generate_uuid());
        let view = View {
            uuid: uuid.clone(),
            context_frame_uuid: frame_uuid.to_string(),
            actor: actor.to_string(),
            actions,
            started_at,
            ended_at: None,
            prev,
        };
        self.views.insert(uuid.clone(), view.clone());
        Ok(view)
    }

    /// Push `view.uuid` onto `frame.view_timeline`, preserving chronological order.
    pub fn append_view(&self, frame_uuid: &str, view: &View) -> CoreResult<ContextFrame> {
        self.with_frame(frame_uuid, |frame| {
            frame.view_timeline.push(view.uuid.clone());
            Ok(())
        })
    }

    pub fn get_view(&self, uuid: &str) -> CoreResult<View> {
        let key = uid::strip_prefix(uuid);
        self.views
            .iter()
            .find(|v| uid::strip_prefix(v.key()) == key)
            .map(|v| v.clone())
            .ok_or_else(|| CoreError::NotFound(format!("view '{}' not found", uuid)))
    }

    pub fn end_view(&self, uuid: &str, at: DateTime<Utc>) -> CoreResult<View> {
        let key = uid::strip_prefix(uuid).to_string();
        let mut entry = self
            .views
            .iter_mut()
            .find(|v| uid::strip_prefix(v.key()) == key)
            .ok_or_else(|| CoreError::NotFound(format!("view '{}' not found", uuid)))?;
        entry.ended_at = Some(at);
        Ok(entry.clone())
    }
}

impl Default for ContextSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_move_to_front_and_eviction() {
        let ctx = ContextSubsystem::new();
        let frame = ctx.get_context_frame("op1", OwnerType::Operator, true).unwrap();
        for i in 0..8 {
            ctx.update_containers(&frame.uuid, &format!("e{}", i), 7).unwrap();
        }
        let frame = ctx.get_frame_by_uuid(&frame.uuid).unwrap();
        assert_eq!(frame.containers.len(), 7);
        assert_eq!(frame.containers[0], "e7");
        assert!(!frame.containers.contains(&"e0".to_string()));
    }

    #[test]
    fn revisit_moves_existing_entry_to_front() {
        let ctx = ContextSubsystem::new();
        let frame = ctx.get_context_frame("op1", OwnerType::Operator, true).unwrap();
        ctx.update_containers(&frame.uuid, "a", 7).unwrap();
        ctx.update_containers(&frame.uuid, "b", 7).unwrap();
        ctx.update_containers(&frame.uuid, "a", 7).unwrap();
        let frame = ctx.get_frame_by_uuid(&frame.uuid).unwrap();
        assert_eq!(frame.containers, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn scope_state_machine_s4() {
        let ctx = ContextSubsystem::new();
        let frame = ctx.get_context_frame("operator1", OwnerType::Operator, true).unwrap();
        let frame = ctx.enter_scope(&frame.uuid, "s1").unwrap();
        assert_eq!(frame.active_scopes, vec!["s1"]);
        assert_eq!(frame.primary_scope.as_deref(), Some("s1"));

        let frame = ctx.enter_scope(&frame.uuid, "s2").unwrap();
        assert_eq!(frame.active_scopes, vec!["s1", "s2"]);
        assert_eq!(frame.primary_scope.as_deref(), Some("s1"));

        let frame = ctx.focus_scope(&frame.uuid, "s2").unwrap();
        assert_eq!(frame.primary_scope.as_deref(), Some("s2"));

        let frame = ctx.leave_scope(&frame.uuid, "s2").unwrap();
        assert_eq!(frame.active_scopes, vec!["s1"]);
        assert!(frame.primary_scope.is_none());

        assert!(ctx.focus_scope(&frame.uuid, "s3").is_err());
    }

    #[test]
    fn fork_inherits_parent_containers() {
        let ctx = ContextSubsystem::new();
        let parent = ctx.get_context_frame("op1", OwnerType::Operator, true).unwrap();
        ctx.update_containers(&parent.uuid, "a", 7).unwrap();
        let parent = ctx.get_frame_by_uuid(&parent.uuid).unwrap();
        let child = ctx.fork_frame(&parent.uuid, "agent1", OwnerType::Agent).unwrap();
        assert_eq!(child.containers, parent.containers);
        assert!(child.is_subordinate);
    }

    #[test]
    fn non_operator_cannot_enter_scope() {
        let ctx = ContextSubsystem::new();
        let frame = ctx.get_context_frame("agent1", OwnerType::Agent, true).unwrap();
        assert!(ctx.enter_scope(&frame.uuid, "s1").is_err());
    }
}
