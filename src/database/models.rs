//! Database models
//!
//! Structs for database records with serialization support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One entry of a device's bounded IP history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpHistoryEntry {
    pub ip: String,
    pub ts: DateTime<Utc>,
}

/// Device record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: i64,
    pub mac_address: String,
    pub name: String,
    pub is_randomized_mac: bool,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub last_ip: Option<String>,
    pub ip_history: Vec<IpHistoryEntry>,
    pub mdns_services: BTreeSet<String>,
    pub device_metadata: BTreeMap<String, String>,
    /// Hours of day (0-23) the device has been seen
    pub typical_connection_times: BTreeSet<u8>,
    pub is_home: bool,
    pub track_presence: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub linked_to_device_id: Option<i64>,
    pub link_confidence: Option<f64>,
}

impl DeviceRecord {
    /// Events are only written for devices someone cares about.
    pub fn records_events(&self) -> bool {
        self.track_presence || self.linked_to_device_id.is_some()
    }
}

/// Fields for a device insert
#[derive(Debug, Clone)]
pub struct NewDevice<'a> {
    pub mac_address: &'a str,
    pub name: &'a str,
    pub is_randomized_mac: bool,
    pub hostname: Option<&'a str>,
    pub vendor: Option<&'a str>,
    pub track_presence: bool,
    pub seen_at: DateTime<Utc>,
}

/// Presence transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEventType {
    Arrived,
    Left,
}

impl std::fmt::Display for PresenceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceEventType::Arrived => write!(f, "arrived"),
            PresenceEventType::Left => write!(f, "left"),
        }
    }
}

impl std::str::FromStr for PresenceEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrived" => Ok(PresenceEventType::Arrived),
            "left" => Ok(PresenceEventType::Left),
            _ => Err(format!("Unknown presence event type: {}", s)),
        }
    }
}

/// Presence event record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEventRecord {
    pub id: i64,
    pub device_id: i64,
    pub event_type: PresenceEventType,
    pub timestamp: DateTime<Utc>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

/// Co-occurrence statistics for an unordered device pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAssociationRecord {
    pub id: i64,
    pub device1_id: i64,
    pub device2_id: i64,
    pub association_type: String,
    pub co_occurrence_count: i64,
    pub last_seen_together: DateTime<Utc>,
    pub confidence: f64,
}

/// Device entry inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDevice {
    pub mac: String,
    pub ip: String,
}

/// Network snapshot record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshotRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub device_count: i64,
    pub devices_present: Vec<SnapshotDevice>,
}

/// Device counters for the health query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceStats {
    pub total_devices: i64,
    pub tracked_devices: i64,
    pub home_devices: i64,
    pub randomized_devices: i64,
    pub linked_devices: i64,
}
