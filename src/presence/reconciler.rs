//! Presence reconciliation
//!
//! Turns one discovery batch into device state changes. Every write of a pass
//! happens inside a single savepoint; notifications go out only after it is
//! released.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, Timelike, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::cooccurrence::record_co_occurrences;
use super::correlator::{CorrelationMatch, apply_link, best_match};
use super::notify::{PresenceUpdate, Publisher, publish_updates};
use super::snapshot::write_snapshot;
use crate::config::{IP_HISTORY_LIMIT, ReconcileSettings, stale_window};
use crate::database::{
    Database, DeviceRecord, IpHistoryEntry, NewDevice, PresenceEventType, SnapshotDevice,
    get_all_devices, get_device_by_id, get_device_by_mac, insert_device, insert_presence_event,
    update_device, with_savepoint,
};
use crate::models::DiscoveryRecord;
use crate::network::{is_randomized_mac, lookup_vendor, masked_mac_name, normalize_mac};

const RECONCILE_SAVEPOINT: &str = "reconcile_pass";

/// What one pass changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub pass: u64,
    pub seen: usize,
    pub arrivals: usize,
    pub departures: usize,
    pub registered: usize,
    pub linked: Vec<CorrelationMatch>,
    pub events_written: usize,
    pub associations_updated: usize,
    pub snapshot_id: Option<i64>,
    /// Published after commit
    pub notifications: Vec<PresenceUpdate>,
}

/// Owns all presence writes
#[derive(Clone)]
pub struct PresenceReconciler {
    db: Database,
    settings: ReconcileSettings,
    publisher: Arc<dyn Publisher>,
    passes: Arc<AtomicU64>,
    /// Passes whose savepoint was released; drives snapshot sub-sampling
    committed: Arc<AtomicU64>,
}

impl PresenceReconciler {
    pub fn new(db: Database, settings: ReconcileSettings, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            db,
            settings,
            publisher,
            passes: Arc::new(AtomicU64::new(0)),
            committed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Number of passes attempted so far
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Number of passes that committed
    pub fn committed_passes(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn reconcile(&self, batch: &[DiscoveryRecord]) -> Result<ReconcileReport> {
        self.reconcile_at(batch, Utc::now())
    }

    /// Reconcile `batch` as observed at `now`.
    ///
    /// Commits fully or not at all. A failed pass is logged, writes nothing
    /// and publishes nothing.
    pub fn reconcile_at(&self, batch: &[DiscoveryRecord], now: DateTime<Utc>) -> Result<ReconcileReport> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let every = u64::from(self.settings.snapshot_every.max(1));

        // The connection lock serializes passes, so the committed count read
        // here cannot move until this pass finishes.
        let conn = self.db.lock()?;
        let take_snapshot = self.committed.load(Ordering::SeqCst) % every == 0;
        let outcome = with_savepoint(&conn, RECONCILE_SAVEPOINT, |conn| {
            self.apply(conn, batch, now, take_snapshot)
        });
        if outcome.is_ok() {
            self.committed.fetch_add(1, Ordering::SeqCst);
        }
        drop(conn);

        match outcome {
            Ok(mut report) => {
                report.pass = pass;
                publish_updates(self.publisher.as_ref(), &report.notifications);
                crate::log_debug!(
                    "Pass #{}: {} seen, {} arrived, {} left, {} new, {} linked",
                    pass,
                    report.seen,
                    report.arrivals,
                    report.departures,
                    report.registered,
                    report.linked.len()
                );
                Ok(report)
            }
            Err(e) => {
                crate::log_error!("Reconciliation pass #{} rolled back: {:#}", pass, e);
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        conn: &Connection,
        batch: &[DiscoveryRecord],
        now: DateTime<Utc>,
        take_snapshot: bool,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let hour = now.with_timezone(&Local).hour() as u8;

        let mut devices = get_all_devices(conn)?;
        let mut index: HashMap<String, usize> = devices
            .iter()
            .enumerate()
            .map(|(i, d)| (d.mac_address.clone(), i))
            .collect();

        let mut present: HashSet<usize> = HashSet::new();
        let mut dirty: HashSet<usize> = HashSet::new();
        let mut newly_arrived: Vec<usize> = Vec::new();
        let mut snapshot_devices: Vec<SnapshotDevice> = Vec::new();

        for record in batch {
            let Some(mac) = normalize_mac(&record.mac) else {
                crate::log_warn!("Skipping record with invalid MAC '{}'", record.mac);
                continue;
            };

            let slot = match index.get(&mac) {
                Some(&slot) => slot,
                None => {
                    let device = register_discovered(conn, &mac, record, now)?;
                    report.registered += 1;
                    devices.push(device);
                    index.insert(mac.clone(), devices.len() - 1);
                    devices.len() - 1
                }
            };

            if !present.insert(slot) {
                continue;
            }
            snapshot_devices.push(SnapshotDevice {
                mac: mac.clone(),
                ip: record.ip.clone(),
            });

            let device = &mut devices[slot];
            merge_discovery(device, record, now, hour);
            dirty.insert(slot);

            if !device.is_home {
                device.is_home = true;
                report.arrivals += 1;
                if device.is_randomized_mac && device.linked_to_device_id.is_none() {
                    newly_arrived.push(slot);
                }
                record_transition(conn, device, PresenceEventType::Arrived, now, &mut report)?;
            }
        }
        report.seen = present.len();

        let stale_cutoff = now
            .checked_sub_signed(stale_window(self.settings.interval_secs))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        for (slot, device) in devices.iter_mut().enumerate() {
            if !device.is_home || present.contains(&slot) {
                continue;
            }
            if !self.settings.authoritative && device.last_seen > stale_cutoff {
                continue;
            }

            device.is_home = false;
            report.departures += 1;
            dirty.insert(slot);
            record_transition(conn, device, PresenceEventType::Left, now, &mut report)?;
        }

        if take_snapshot {
            let (id, _) = write_snapshot(
                conn,
                now,
                &snapshot_devices,
                self.settings.snapshot_retention_days,
            )?;
            report.snapshot_id = Some(id);
        }

        for slot in newly_arrived {
            let found = best_match(
                &devices[slot],
                devices.iter(),
                &self.settings.weights,
                self.settings.correlation_threshold,
            );
            if let Some(link) = found {
                crate::log_stderr!(
                    "Linked {} -> {} ({:.2})",
                    devices[slot].mac_address,
                    link.parent_name,
                    link.score
                );
                apply_link(&mut devices[slot], &link);
                report.linked.push(link);
            }
        }

        let mut dirty: Vec<usize> = dirty.into_iter().collect();
        dirty.sort_unstable();
        for slot in dirty {
            update_device(conn, &devices[slot])?;
        }

        let home_ids: Vec<i64> = devices.iter().filter(|d| d.is_home).map(|d| d.id).collect();
        report.associations_updated = record_co_occurrences(conn, &home_ids, now)?;

        Ok(report)
    }

    /// Register a device ahead of discovery. It starts not home.
    pub fn register_device(&self, mac: &str, name: &str, track_presence: bool) -> Result<DeviceRecord> {
        let mac = normalize_mac(mac).ok_or_else(|| anyhow!("Invalid MAC address '{}'", mac))?;
        let is_randomized_mac = is_randomized_mac(&mac);
        let vendor = if is_randomized_mac { None } else { lookup_vendor(&mac) };

        let conn = self.db.lock()?;
        if get_device_by_mac(&conn, &mac)?.is_some() {
            return Err(anyhow!("Device {} is already registered", mac));
        }

        let id = insert_device(
            &conn,
            &NewDevice {
                mac_address: &mac,
                name,
                is_randomized_mac,
                hostname: None,
                vendor: vendor.as_deref(),
                track_presence,
                seen_at: Utc::now(),
            },
        )?;

        crate::log_stderr!("Registered {} as '{}' (tracked: {})", mac, name, track_presence);
        get_device_by_id(&conn, id)?.context("Registered device vanished")
    }

    /// Toggle presence tracking for a known MAC.
    pub fn set_track_presence(&self, mac: &str, track: bool) -> Result<DeviceRecord> {
        let mac = normalize_mac(mac).ok_or_else(|| anyhow!("Invalid MAC address '{}'", mac))?;
        let conn = self.db.lock()?;

        if !crate::database::set_track_presence(&conn, &mac, track)? {
            return Err(anyhow!("Unknown device {}", mac));
        }
        get_device_by_mac(&conn, &mac)?.context("Device vanished")
    }
}

/// Auto-register a device first seen in a batch.
fn register_discovered(
    conn: &Connection,
    mac: &str,
    record: &DiscoveryRecord,
    now: DateTime<Utc>,
) -> Result<DeviceRecord> {
    let is_randomized_mac = is_randomized_mac(mac);
    let hostname = record.hostname.as_deref().filter(|h| !h.trim().is_empty());
    let name = match hostname {
        Some(hostname) => hostname.to_string(),
        None => masked_mac_name(mac),
    };
    let vendor = if is_randomized_mac { None } else { lookup_vendor(mac) };

    let id = insert_device(
        conn,
        &NewDevice {
            mac_address: mac,
            name: &name,
            is_randomized_mac,
            hostname,
            vendor: vendor.as_deref(),
            track_presence: false,
            seen_at: now,
        },
    )?;

    crate::log_debug!("New device {} registered as '{}'", mac, name);
    get_device_by_id(conn, id)?.context("Inserted device vanished")
}

/// Fold one discovery into the stored device.
fn merge_discovery(device: &mut DeviceRecord, record: &DiscoveryRecord, now: DateTime<Utc>, hour: u8) {
    if !record.ip.is_empty() && device.last_ip.as_deref() != Some(record.ip.as_str()) {
        device.ip_history.push(IpHistoryEntry {
            ip: record.ip.clone(),
            ts: now,
        });
        if device.ip_history.len() > IP_HISTORY_LIMIT {
            let excess = device.ip_history.len() - IP_HISTORY_LIMIT;
            device.ip_history.drain(..excess);
        }
        device.last_ip = Some(record.ip.clone());
    }

    if let Some(hostname) = record.hostname.as_deref().filter(|h| !h.trim().is_empty()) {
        device.hostname = Some(hostname.to_string());
    }

    device
        .device_metadata
        .extend(record.device_info.iter().map(|(k, v)| (k.clone(), v.clone())));
    device
        .mdns_services
        .extend(record.mdns_services.iter().cloned());
    device.typical_connection_times.insert(hour);
    device.last_seen = now;
}

/// Log the event and queue a notification when the device is tracked or
/// linked.
fn record_transition(
    conn: &Connection,
    device: &DeviceRecord,
    event: PresenceEventType,
    now: DateTime<Utc>,
    report: &mut ReconcileReport,
) -> Result<()> {
    if !device.records_events() {
        return Ok(());
    }

    insert_presence_event(
        conn,
        device.id,
        event,
        now,
        device.last_ip.as_deref(),
        device.hostname.as_deref(),
    )?;
    report.events_written += 1;
    report.notifications.push(PresenceUpdate {
        id: device.id,
        name: device.name.clone(),
        event,
        is_home: device.is_home,
    });

    crate::log_stderr!("PRESENCE: {} {}", device.name, event);
    Ok(())
}
