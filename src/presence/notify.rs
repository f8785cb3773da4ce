//! Notification collaborator
//!
//! The reconciler only knows the `Publisher` trait. Closures implement it,
//! and `BroadcastPublisher` fans notifications out to in-process subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::database::PresenceEventType;

/// Topic of per-device presence transitions
pub const PRESENCE_UPDATE_TOPIC: &str = "presence_update";

/// Payload published for every recorded transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub id: i64,
    pub name: String,
    pub event: PresenceEventType,
    pub is_home: bool,
}

pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

impl<F> Publisher for F
where
    F: Fn(&str, Value) + Send + Sync,
{
    fn publish(&self, topic: &str, payload: Value) {
        self(topic, payload)
    }
}

/// Publishes nothing
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _topic: &str, _payload: Value) {}
}

/// One published message
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: Value,
}

/// In-process pub/sub over a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error; lagging subscribers lose
/// the oldest messages.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, topic: &str, payload: Value) {
        let _ = self.tx.send(Notification {
            topic: topic.to_string(),
            payload,
        });
    }
}

/// Publish each update on the presence topic.
pub fn publish_updates(publisher: &dyn Publisher, updates: &[PresenceUpdate]) {
    for update in updates {
        match serde_json::to_value(update) {
            Ok(payload) => publisher.publish(PRESENCE_UPDATE_TOPIC, payload),
            Err(e) => {
                crate::log_warn!("Failed to encode presence update: {}", e);
            }
        }
    }
}
