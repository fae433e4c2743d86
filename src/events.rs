//! Audit & Event Bus — event half. A process-local registry fans out
//! scope-filtered events to subscribers over bounded queues. Delivery is
//! best-effort: a full queue drops the event and logs a warning rather
//! than blocking the publishing handler.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::error::{CoreError, CoreResult};

/// The closed set of event types the bus will publish. Publishing any
/// other string is a programming error and fails `validation_error`.
pub const EVENT_TYPES: &[&str] = &[
    "artifact_delta",
    "message_sent",
    "context_updated",
    "frame_updated",
    "scope_created",
    "scope_modified",
    "relation_created",
    "relation_modified",
];

const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

struct Subscription {
    client_id: String,
    actor: String,
    subscribed_scopes: Vec<String>,
    sender: mpsc::Sender<Event>,
}

/// A single connection's stats, as surfaced by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub client_id: String,
    pub username: String,
    pub scope_count: usize,
}

/// The process-local event registry. The only truly process-global object
/// in the crate: initialised at startup, torn down at shutdown.
pub struct EventBus {
    subscriptions: Mutex<Vec<(SubscriptionId, Subscription)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a new subscription, filtered to `subscribed_scopes`
    /// (empty means "only global events"). Returns the id and the
    /// receiving half of its bounded queue.
    pub fn subscribe(
        &self,
        client_id: &str,
        actor: &str,
        subscribed_scopes: Vec<String>,
    ) -> (SubscriptionId, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = Subscription {
            client_id: client_id.to_string(),
            actor: actor.to_string(),
            subscribed_scopes,
            sender,
        };
        self.subscriptions.lock().unwrap().push((id, subscription));
        tracing::debug!(client_id, "events: subscription registered");
        (id, receiver)
    }

    /// Unregister a subscription, e.g. on client disconnect.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().retain(|(sid, _)| *sid != id);
    }

    /// Enqueue `event_type`/`data` onto every subscription for which
    /// `scope_uuid` is `None` or is in that subscription's
    /// `subscribed_scopes`. Fails `validation_error` if `event_type` is
    /// not a member of [`EVENT_TYPES`].
    pub fn publish(&self, event_type: &str, data: JsonValue, scope_uuid: Option<&str>) -> CoreResult<()> {
        if !EVENT_TYPES.contains(&event_type) {
            return Err(CoreError::Validation(format!(
                "unknown event type '{}'",
                event_type
            )));
        }
        let event = Event {
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
        };
        let subscriptions = self.subscriptions.lock().unwrap();
        for (_, subscription) in subscriptions.iter() {
            let matches = scope_uuid
                .map(|scope| subscription.subscribed_scopes.iter().any(|s| s == scope))
                .unwrap_or(true);
            if !matches {
                continue;
            }
            if subscription.sender.try_send(event.clone()).is_err() {
                tracing::warn!(
                    client_id = %subscription.client_id,
                    event_type,
                    "events: queue full, dropping event"
                );
            }
        }
        Ok(())
    }

    /// Stats for the `GET /mg/stats` endpoint.
    pub fn stats(&self) -> (usize, Vec<ConnectionStats>) {
        let subscriptions = self.subscriptions.lock().unwrap();
        let connections = subscriptions
            .iter()
            .map(|(_, s)| ConnectionStats {
                client_id: s.client_id.clone(),
                username: s.actor.clone(),
                scope_count: s.subscribed_scopes.len(),
            })
            .collect();
        (subscriptions.len(), connections)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Render an event as an SSE frame: `event: <type>\ndata: <json>\n\n`.
pub fn render_sse(event: &Event) -> String {
    format!(
        "event: {}\ndata: {}\n\n",
        event.event_type,
        serde_json::to_string(&event.data).unwrap_or_default()
    )
}

/// A single-line `:` comment keepalive frame.
pub fn render_keepalive() -> &'static str {
    ": keepalive\n\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_rejects_unknown_event_type() {
        let bus = EventBus::new();
        let result = bus.publish("not_a_real_event", serde_json::json!({}), None);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn scope_filtered_delivery() {
        let bus = EventBus::new();
        let (_id_a, mut rx_a) = bus.subscribe("client-a", "alice", vec!["scope1".into()]);
        let (_id_b, mut rx_b) = bus.subscribe("client-b", "bob", vec!["scope2".into()]);

        bus.publish("message_sent", serde_json::json!({"x": 1}), Some("scope1")).unwrap();

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn global_event_reaches_every_subscriber() {
        let bus = EventBus::new();
        let (_id_a, mut rx_a) = bus.subscribe("client-a", "alice", vec![]);
        bus.publish("context_updated", serde_json::json!({}), None).unwrap();
        assert!(rx_a.try_recv().is_ok());
    }

    #[test]
    fn unsubscribe_removes_from_stats() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe("client-a", "alice", vec![]);
        assert_eq!(bus.stats().0, 1);
        bus.unsubscribe(id);
        assert_eq!(bus.stats().0, 0);
    }
}
