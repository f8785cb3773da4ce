//! Presence state: reconciliation, identity correlation, co-occurrence,
//! snapshots and notifications

mod cooccurrence;
mod correlator;
mod notify;
mod reconciler;
mod snapshot;

pub use cooccurrence::record_co_occurrences;
pub use correlator::{
    CorrelationMatch, Fingerprint, apply_link, best_match, hostname_pattern, is_link_candidate,
    linked_name, similarity,
};
pub use notify::{
    BroadcastPublisher, Notification, NullPublisher, PRESENCE_UPDATE_TOPIC, PresenceUpdate,
    Publisher, publish_updates,
};
pub use reconciler::{PresenceReconciler, ReconcileReport};
pub use snapshot::{HealthStatus, PresenceHealth, health_status, presence_health, write_snapshot};
