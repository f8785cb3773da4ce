//! Database schema definitions
//!
//! Creates the presence tables. JSON-encoded columns hold the bounded IP
//! history, service sets, metadata maps and snapshot device lists.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all database tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Devices: one row per MAC, never auto-deleted
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mac_address TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            is_randomized_mac INTEGER NOT NULL DEFAULT 0,
            hostname TEXT,
            vendor TEXT,
            last_ip TEXT,
            ip_history TEXT NOT NULL DEFAULT '[]',
            mdns_services TEXT NOT NULL DEFAULT '[]',
            device_metadata TEXT NOT NULL DEFAULT '{}',
            typical_connection_times TEXT NOT NULL DEFAULT '[]',
            is_home INTEGER NOT NULL DEFAULT 0,
            track_presence INTEGER NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL DEFAULT (datetime('now')),
            last_seen TEXT NOT NULL DEFAULT (datetime('now')),
            linked_to_device_id INTEGER,
            link_confidence REAL,
            FOREIGN KEY (linked_to_device_id) REFERENCES devices(id) ON DELETE SET NULL
        );

        -- Presence events: immutable arrival/departure log
        CREATE TABLE IF NOT EXISTS presence_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            event_type TEXT NOT NULL CHECK (event_type IN ('arrived', 'left')),
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            ip TEXT,
            hostname TEXT,
            FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
        );

        -- Associations: unordered device pairs stored as device1_id < device2_id
        CREATE TABLE IF NOT EXISTS device_associations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device1_id INTEGER NOT NULL,
            device2_id INTEGER NOT NULL,
            association_type TEXT NOT NULL DEFAULT 'co_occurrence',
            co_occurrence_count INTEGER NOT NULL DEFAULT 1,
            last_seen_together TEXT NOT NULL DEFAULT (datetime('now')),
            confidence REAL NOT NULL DEFAULT 0.5,
            CHECK (device1_id < device2_id),
            UNIQUE (device1_id, device2_id),
            FOREIGN KEY (device1_id) REFERENCES devices(id) ON DELETE CASCADE,
            FOREIGN KEY (device2_id) REFERENCES devices(id) ON DELETE CASCADE
        );

        -- Snapshots: one heartbeat row per reconciliation pass
        CREATE TABLE IF NOT EXISTS network_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL DEFAULT (datetime('now')),
            device_count INTEGER NOT NULL DEFAULT 0,
            devices_present TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_devices_home ON devices(is_home);
        CREATE INDEX IF NOT EXISTS idx_devices_linked ON devices(linked_to_device_id);
        CREATE INDEX IF NOT EXISTS idx_presence_events_device ON presence_events(device_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_presence_events_time ON presence_events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_snapshots_time ON network_snapshots(timestamp);
        "#,
    )
    .context("Failed to create database tables")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('devices', 'presence_events', 'device_associations', 'network_snapshots')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_association_pair_must_be_ordered() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO devices (mac_address, name) VALUES ('AC:DE:48:00:00:01', 'a');
             INSERT INTO devices (mac_address, name) VALUES ('AC:DE:48:00:00:02', 'b');",
        )
        .unwrap();

        let reversed = conn.execute(
            "INSERT INTO device_associations (device1_id, device2_id) VALUES (2, 1)",
            [],
        );
        assert!(reversed.is_err());
    }
}
