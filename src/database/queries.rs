//! Database query functions
//!
//! CRUD operations for devices, presence events, associations and snapshots.
//! Every function takes a borrowed connection so callers can group them
//! inside one savepoint.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;

use super::models::*;

const DEVICE_COLUMNS: &str = "id, mac_address, name, is_randomized_mac, hostname, vendor, \
     last_ip, ip_history, mdns_services, device_metadata, typical_connection_times, is_home, \
     track_presence, first_seen, last_seen, linked_to_device_id, link_confidence";

/// Association type written by the co-occurrence tracker
pub const CO_OCCURRENCE: &str = "co_occurrence";

/// Confidence given to a new association
pub const INITIAL_ASSOCIATION_CONFIDENCE: f64 = 0.5;

/// Format a timestamp the way SQLite's `datetime('now')` does
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: row.get(0)?,
        mac_address: row.get(1)?,
        name: row.get(2)?,
        is_randomized_mac: row.get::<_, i64>(3)? != 0,
        hostname: row.get(4)?,
        vendor: row.get(5)?,
        last_ip: row.get(6)?,
        ip_history: parse_json_column(row.get::<_, String>(7)?, 7)?,
        mdns_services: parse_json_column(row.get::<_, String>(8)?, 8)?,
        device_metadata: parse_json_column(row.get::<_, String>(9)?, 9)?,
        typical_connection_times: parse_json_column(row.get::<_, String>(10)?, 10)?,
        is_home: row.get::<_, i64>(11)? != 0,
        track_presence: row.get::<_, i64>(12)? != 0,
        first_seen: parse_datetime_column(row.get::<_, String>(13)?, 13)?,
        last_seen: parse_datetime_column(row.get::<_, String>(14)?, 14)?,
        linked_to_device_id: row.get(15)?,
        link_confidence: row.get(16)?,
    })
}

/// Get all devices in insertion order
pub fn get_all_devices(conn: &Connection) -> Result<Vec<DeviceRecord>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM devices ORDER BY id", DEVICE_COLUMNS))
        .context("Failed to prepare device query")?;

    let devices = stmt
        .query_map([], row_to_device)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to load devices")?;

    Ok(devices)
}

/// Get device by MAC address
pub fn get_device_by_mac(conn: &Connection, mac: &str) -> Result<Option<DeviceRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM devices WHERE mac_address = ?1", DEVICE_COLUMNS),
        params![mac],
        row_to_device,
    )
    .optional()
    .with_context(|| format!("Failed to load device {}", mac))
}

pub fn get_device_by_id(conn: &Connection, id: i64) -> Result<Option<DeviceRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
        params![id],
        row_to_device,
    )
    .optional()
    .with_context(|| format!("Failed to load device #{}", id))
}

/// Insert a device (not home). Fails if the MAC already exists.
pub fn insert_device(conn: &Connection, device: &NewDevice<'_>) -> Result<i64> {
    let seen_at = format_timestamp(device.seen_at);
    conn.execute(
        r#"
        INSERT INTO devices (
            mac_address, name, is_randomized_mac, hostname, vendor, track_presence,
            first_seen, last_seen
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
        params![
            device.mac_address,
            device.name,
            device.is_randomized_mac as i64,
            device.hostname,
            device.vendor,
            device.track_presence as i64,
            seen_at,
        ],
    )
    .with_context(|| format!("Failed to insert device {}", device.mac_address))?;

    Ok(conn.last_insert_rowid())
}

/// Write back every mutable column of a device
pub fn update_device(conn: &Connection, device: &DeviceRecord) -> Result<()> {
    let ip_history = serde_json::to_string(&device.ip_history)?;
    let mdns_services = serde_json::to_string(&device.mdns_services)?;
    let device_metadata = serde_json::to_string(&device.device_metadata)?;
    let connection_times = serde_json::to_string(&device.typical_connection_times)?;

    let changed = conn
        .execute(
            r#"
            UPDATE devices SET
                name = ?2,
                hostname = ?3,
                vendor = ?4,
                last_ip = ?5,
                ip_history = ?6,
                mdns_services = ?7,
                device_metadata = ?8,
                typical_connection_times = ?9,
                is_home = ?10,
                track_presence = ?11,
                last_seen = ?12,
                linked_to_device_id = ?13,
                link_confidence = ?14
            WHERE id = ?1
            "#,
            params![
                device.id,
                device.name,
                device.hostname,
                device.vendor,
                device.last_ip,
                ip_history,
                mdns_services,
                device_metadata,
                connection_times,
                device.is_home as i64,
                device.track_presence as i64,
                format_timestamp(device.last_seen),
                device.linked_to_device_id,
                device.link_confidence,
            ],
        )
        .with_context(|| format!("Failed to update device {}", device.mac_address))?;

    if changed == 0 {
        return Err(anyhow!("Device #{} does not exist", device.id));
    }
    Ok(())
}

/// Toggle presence tracking. Returns false if the MAC is unknown.
pub fn set_track_presence(conn: &Connection, mac: &str, track: bool) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE devices SET track_presence = ?2 WHERE mac_address = ?1",
            params![mac, track as i64],
        )
        .with_context(|| format!("Failed to update tracking for {}", mac))?;
    Ok(changed > 0)
}

/// Append a presence event
pub fn insert_presence_event(
    conn: &Connection,
    device_id: i64,
    event_type: PresenceEventType,
    timestamp: DateTime<Utc>,
    ip: Option<&str>,
    hostname: Option<&str>,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO presence_events (device_id, event_type, timestamp, ip, hostname)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            device_id,
            event_type.to_string(),
            format_timestamp(timestamp),
            ip,
            hostname
        ],
    )
    .context("Failed to insert presence event")?;

    Ok(conn.last_insert_rowid())
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<PresenceEventRecord> {
    let event_type: String = row.get(2)?;
    Ok(PresenceEventRecord {
        id: row.get(0)?,
        device_id: row.get(1)?,
        event_type: event_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        timestamp: parse_datetime_column(row.get::<_, String>(3)?, 3)?,
        ip: row.get(4)?,
        hostname: row.get(5)?,
    })
}

/// Most recent presence events, newest first
pub fn get_recent_presence_events(conn: &Connection, limit: i64) -> Result<Vec<PresenceEventRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, device_id, event_type, timestamp, ip, hostname
        FROM presence_events
        ORDER BY timestamp DESC, id DESC
        LIMIT ?1
        "#,
    )?;

    let events = stmt
        .query_map(params![limit], row_to_event)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to load presence events")?;

    Ok(events)
}

/// Presence events of one device, oldest first
pub fn get_presence_events_for_device(
    conn: &Connection,
    device_id: i64,
) -> Result<Vec<PresenceEventRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, device_id, event_type, timestamp, ip, hostname
        FROM presence_events
        WHERE device_id = ?1
        ORDER BY timestamp ASC, id ASC
        "#,
    )?;

    let events = stmt
        .query_map(params![device_id], row_to_event)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to load presence events")?;

    Ok(events)
}

pub fn count_presence_events(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM presence_events", [], |row| row.get(0))
        .context("Failed to count presence events")
}

/// Order a device pair the way the associations table stores it
pub fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Record that two devices were home together
pub fn upsert_association(conn: &Connection, a: i64, b: i64, seen_at: DateTime<Utc>) -> Result<()> {
    if a == b {
        return Err(anyhow!("Device #{} cannot be associated with itself", a));
    }
    let (device1_id, device2_id) = canonical_pair(a, b);

    conn.execute(
        r#"
        INSERT INTO device_associations (
            device1_id, device2_id, association_type, co_occurrence_count,
            last_seen_together, confidence
        ) VALUES (?1, ?2, ?3, 1, ?4, ?5)
        ON CONFLICT (device1_id, device2_id) DO UPDATE SET
            co_occurrence_count = co_occurrence_count + 1,
            last_seen_together = excluded.last_seen_together
        "#,
        params![
            device1_id,
            device2_id,
            CO_OCCURRENCE,
            format_timestamp(seen_at),
            INITIAL_ASSOCIATION_CONFIDENCE
        ],
    )
    .with_context(|| format!("Failed to upsert association {}-{}", device1_id, device2_id))?;

    Ok(())
}

fn row_to_association(row: &Row<'_>) -> rusqlite::Result<DeviceAssociationRecord> {
    Ok(DeviceAssociationRecord {
        id: row.get(0)?,
        device1_id: row.get(1)?,
        device2_id: row.get(2)?,
        association_type: row.get(3)?,
        co_occurrence_count: row.get(4)?,
        last_seen_together: parse_datetime_column(row.get::<_, String>(5)?, 5)?,
        confidence: row.get(6)?,
    })
}

/// Association for a pair, in either order
pub fn get_association(
    conn: &Connection,
    a: i64,
    b: i64,
) -> Result<Option<DeviceAssociationRecord>> {
    let (device1_id, device2_id) = canonical_pair(a, b);
    conn.query_row(
        r#"
        SELECT id, device1_id, device2_id, association_type, co_occurrence_count,
               last_seen_together, confidence
        FROM device_associations
        WHERE device1_id = ?1 AND device2_id = ?2
        "#,
        params![device1_id, device2_id],
        row_to_association,
    )
    .optional()
    .context("Failed to load association")
}

pub fn get_all_associations(conn: &Connection) -> Result<Vec<DeviceAssociationRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, device1_id, device2_id, association_type, co_occurrence_count,
               last_seen_together, confidence
        FROM device_associations
        ORDER BY co_occurrence_count DESC, id ASC
        "#,
    )?;

    let associations = stmt
        .query_map([], row_to_association)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to load associations")?;

    Ok(associations)
}

/// Append a network snapshot
pub fn insert_snapshot(
    conn: &Connection,
    timestamp: DateTime<Utc>,
    devices: &[SnapshotDevice],
) -> Result<i64> {
    let devices_present = serde_json::to_string(devices)?;
    conn.execute(
        "INSERT INTO network_snapshots (timestamp, device_count, devices_present) VALUES (?1, ?2, ?3)",
        params![format_timestamp(timestamp), devices.len() as i64, devices_present],
    )
    .context("Failed to insert network snapshot")?;

    Ok(conn.last_insert_rowid())
}

/// Delete snapshots strictly older than `cutoff`. Returns rows removed.
pub fn prune_snapshots(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM network_snapshots WHERE timestamp < ?1",
        params![format_timestamp(cutoff)],
    )
    .context("Failed to prune network snapshots")
}

pub fn get_latest_snapshot(conn: &Connection) -> Result<Option<NetworkSnapshotRecord>> {
    conn.query_row(
        r#"
        SELECT id, timestamp, device_count, devices_present
        FROM network_snapshots
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
        [],
        |row| {
            Ok(NetworkSnapshotRecord {
                id: row.get(0)?,
                timestamp: parse_datetime_column(row.get::<_, String>(1)?, 1)?,
                device_count: row.get(2)?,
                devices_present: parse_json_column(row.get::<_, String>(3)?, 3)?,
            })
        },
    )
    .optional()
    .context("Failed to load latest snapshot")
}

pub fn count_snapshots(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM network_snapshots", [], |row| row.get(0))
        .context("Failed to count network snapshots")
}

/// Device counters for the health query
pub fn get_presence_stats(conn: &Connection) -> Result<PresenceStats> {
    conn.query_row(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(track_presence), 0),
            COALESCE(SUM(is_home), 0),
            COALESCE(SUM(is_randomized_mac), 0),
            COALESCE(SUM(linked_to_device_id IS NOT NULL), 0)
        FROM devices
        "#,
        [],
        |row| {
            Ok(PresenceStats {
                total_devices: row.get(0)?,
                tracked_devices: row.get(1)?,
                home_devices: row.get(2)?,
                randomized_devices: row.get(3)?,
                linked_devices: row.get(4)?,
            })
        },
    )
    .context("Failed to compute presence stats")
}

fn parse_datetime_column(s: String, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_str(&format!("{} +0000", s), "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json_column<T: DeserializeOwned>(s: String, column: usize) -> rusqlite::Result<T> {
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
