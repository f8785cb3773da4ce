//! Presence Core: presence detection and device identity correlation
//!
//! This crate determines which devices are on the local network and keeps a
//! stable identity for each of them:
//! - SNMP walks of the gateway ARP table
//! - ICMP sweep + OS ARP table reads
//! - Passive mDNS enrichment
//! - Process-isolated scanner feeding a bounded result channel
//! - Transactional presence reconciliation in SQLite
//! - Randomized-MAC identity correlation and co-occurrence tracking

pub mod app;
pub mod cli;
pub(crate) mod command_handlers;
pub mod config;
pub mod database;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod network;
pub mod presence;
pub mod scanner;
pub mod worker;

pub use app::{AppContext, OutputHook, execute_command_with_context};
pub use cli::{CliCommand, ScanOptions};
pub use config::*;
pub use database::{
    Database, DeviceAssociationRecord, DeviceRecord, NetworkSnapshotRecord, PresenceEventRecord,
    PresenceEventType,
};
pub use models::*;
pub use monitor::{MonitorEvent, MonitorStatus, PresenceMonitor};
pub use network::{is_randomized_mac, lookup_vendor, normalize_mac};
pub use presence::{
    BroadcastPublisher, HealthStatus, PresenceHealth, PresenceReconciler, PresenceUpdate,
    Publisher, ReconcileReport,
};
pub use scanner::{Collector, NetworkScanner};
pub use worker::{ScannerHandle, StopSignal};

// Re-export logging macros for use across crate
pub use crate::logging::macros;
