//! Presence monitor events
//!
//! Lifecycle and per-pass events published next to the per-device
//! `presence_update` notifications.

use serde::{Deserialize, Serialize};

use crate::presence::ReconcileReport;

/// Topic of monitor lifecycle events
pub const MONITOR_TOPIC: &str = "presence_monitor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MonitorEvent {
    /// Scanner and consumer started
    MonitoringStarted {
        interval_seconds: u64,
        isolation: String,
    },

    /// Scanner and consumer stopped
    MonitoringStopped,

    /// One batch reconciled and committed
    BatchReconciled {
        pass: u64,
        devices_seen: usize,
        arrivals: usize,
        departures: usize,
        registered: usize,
        linked: usize,
    },

    /// A batch was rolled back
    ReconcileFailed { message: String },
}

impl From<&ReconcileReport> for MonitorEvent {
    fn from(report: &ReconcileReport) -> Self {
        MonitorEvent::BatchReconciled {
            pass: report.pass,
            devices_seen: report.seen,
            arrivals: report.arrivals,
            departures: report.departures,
            registered: report.registered,
            linked: report.linked.len(),
        }
    }
}

/// Monitor status information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub is_running: bool,
    pub scanner_alive: bool,
    pub consumer_alive: bool,
    pub interval_seconds: u64,
    pub batches_processed: u64,
    pub batches_failed: u64,
}
