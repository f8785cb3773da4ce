use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use presence_core::database::{
    Database, PresenceEventType, count_presence_events, count_snapshots, get_all_associations,
    get_association, get_device_by_mac, get_latest_snapshot, get_presence_events_for_device,
};
use presence_core::presence::{NullPublisher, PRESENCE_UPDATE_TOPIC, PresenceUpdate};
use presence_core::{BroadcastPublisher, DiscoveryRecord, PresenceReconciler, ReconcileSettings};

const LAPTOP: &str = "AC:DE:48:00:11:22";
const PRINTER: &str = "00:1B:63:84:45:E6";
const PRIVATE: &str = "DA:A1:19:AA:BB:CC";

fn unique_temp_db_path(prefix: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{}_{}.db", prefix, timestamp))
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn reconciler_at(path: &PathBuf) -> PresenceReconciler {
    let db = Database::new(path.clone()).expect("database should open");
    PresenceReconciler::new(db, ReconcileSettings::default(), Arc::new(NullPublisher))
}

#[test]
fn unregistered_devices_are_auto_registered_without_events() {
    let path = unique_temp_db_path("presence_unregistered");
    let reconciler = reconciler_at(&path);

    let batch = vec![
        DiscoveryRecord::new(LAPTOP, "192.168.1.20"),
        DiscoveryRecord::new(PRINTER, "192.168.1.30"),
    ];
    let report = reconciler
        .reconcile_at(&batch, t0())
        .expect("pass should commit");

    assert_eq!(report.registered, 2);
    assert_eq!(report.arrivals, 2);
    assert_eq!(report.events_written, 0);
    assert!(report.notifications.is_empty());

    let conn = reconciler.database().lock().expect("lock");
    assert_eq!(count_presence_events(&conn).expect("count"), 0);
    let laptop = get_device_by_mac(&conn, LAPTOP)
        .expect("query")
        .expect("laptop should be registered");
    assert!(laptop.is_home);
    assert!(!laptop.track_presence);
    assert_eq!(laptop.last_ip.as_deref(), Some("192.168.1.20"));

    drop(conn);
    let _ = std::fs::remove_file(path);
}

#[test]
fn tracked_device_round_trip_survives_reopen() {
    let path = unique_temp_db_path("presence_roundtrip");
    let laptop_id = {
        let reconciler = reconciler_at(&path);
        let laptop = reconciler
            .register_device(LAPTOP, "Kaia's Laptop", true)
            .expect("register");
        reconciler
            .reconcile_at(&[DiscoveryRecord::new(LAPTOP, "192.168.1.20")], t0())
            .expect("arrival pass");
        laptop.id
    };

    // A fresh process sees the persisted home state
    let reconciler = reconciler_at(&path);
    let report = reconciler
        .reconcile_at(&[], t0() + Duration::minutes(1))
        .expect("departure pass");
    assert_eq!(report.departures, 1);
    assert_eq!(report.arrivals, 0);

    let conn = reconciler.database().lock().expect("lock");
    let events = get_presence_events_for_device(&conn, laptop_id).expect("events");
    let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![PresenceEventType::Arrived, PresenceEventType::Left]);

    drop(conn);
    let _ = std::fs::remove_file(path);
}

#[test]
fn repeated_batch_produces_no_further_transitions() {
    let path = unique_temp_db_path("presence_idempotent");
    let reconciler = reconciler_at(&path);
    reconciler
        .register_device(LAPTOP, "Kaia's Laptop", true)
        .expect("register");

    let batch = vec![DiscoveryRecord::new(LAPTOP, "192.168.1.20")];
    let first = reconciler.reconcile_at(&batch, t0()).expect("first pass");
    assert_eq!(first.events_written, 1);

    for minute in 1..4 {
        let report = reconciler
            .reconcile_at(&batch, t0() + Duration::minutes(minute))
            .expect("repeat pass");
        assert_eq!(report.arrivals, 0);
        assert_eq!(report.departures, 0);
        assert_eq!(report.events_written, 0);
    }

    let conn = reconciler.database().lock().expect("lock");
    assert_eq!(count_presence_events(&conn).expect("count"), 1);

    drop(conn);
    let _ = std::fs::remove_file(path);
}

#[test]
fn co_occurrence_counts_every_shared_pass() {
    let path = unique_temp_db_path("presence_cooccurrence");
    let reconciler = reconciler_at(&path);

    let batch = vec![
        DiscoveryRecord::new(LAPTOP, "192.168.1.20"),
        DiscoveryRecord::new(PRINTER, "192.168.1.30"),
    ];
    for minute in 0..3 {
        reconciler
            .reconcile_at(&batch, t0() + Duration::minutes(minute))
            .expect("pass");
    }

    let conn = reconciler.database().lock().expect("lock");
    let laptop = get_device_by_mac(&conn, LAPTOP).expect("query").expect("laptop");
    let printer = get_device_by_mac(&conn, PRINTER).expect("query").expect("printer");

    let association = get_association(&conn, printer.id, laptop.id)
        .expect("query")
        .expect("pair should be associated");
    assert_eq!(association.co_occurrence_count, 3);
    assert_eq!(association.association_type, "co_occurrence");
    assert!(association.device1_id < association.device2_id);
    assert_eq!(association.last_seen_together, t0() + Duration::minutes(2));
    assert_eq!(get_all_associations(&conn).expect("all").len(), 1);

    drop(conn);
    let _ = std::fs::remove_file(path);
}

#[test]
fn snapshots_older_than_retention_are_pruned() {
    let path = unique_temp_db_path("presence_retention");
    let reconciler = reconciler_at(&path);
    let batch = vec![DiscoveryRecord::new(LAPTOP, "192.168.1.20")];

    reconciler
        .reconcile_at(&batch, t0() - Duration::days(10))
        .expect("old pass");
    reconciler.reconcile_at(&batch, t0()).expect("current pass");

    let conn = reconciler.database().lock().expect("lock");
    assert_eq!(count_snapshots(&conn).expect("count"), 1);
    let latest = get_latest_snapshot(&conn).expect("query").expect("snapshot");
    assert_eq!(latest.timestamp, t0());
    assert_eq!(latest.device_count, 1);
    assert_eq!(latest.devices_present[0].mac, LAPTOP);

    drop(conn);
    let _ = std::fs::remove_file(path);
}

#[test]
fn randomized_mac_links_to_tracked_parent() {
    let path = unique_temp_db_path("presence_linking");
    let reconciler = reconciler_at(&path);
    let parent = reconciler
        .register_device(LAPTOP, "Kaia's iPhone", true)
        .expect("register");

    reconciler
        .reconcile_at(
            &[DiscoveryRecord::new(LAPTOP, "192.168.1.20")
                .with_hostname("Kaias-iPhone")
                .with_services(["_companion-link._tcp.local."])],
            t0(),
        )
        .expect("parent pass");

    let report = reconciler
        .reconcile_at(
            &[
                DiscoveryRecord::new(LAPTOP, "192.168.1.20")
                    .with_hostname("Kaias-iPhone")
                    .with_services(["_companion-link._tcp.local."]),
                DiscoveryRecord::new(PRIVATE, "192.168.1.44")
                    .with_hostname("iPhone")
                    .with_services(["_companion-link._tcp.local."]),
            ],
            t0() + Duration::minutes(1),
        )
        .expect("linking pass");

    assert_eq!(report.linked.len(), 1);
    assert_eq!(report.linked[0].parent_id, parent.id);
    assert!(report.linked[0].score >= ReconcileSettings::default().correlation_threshold);

    let conn = reconciler.database().lock().expect("lock");
    let private = get_device_by_mac(&conn, PRIVATE).expect("query").expect("device");
    assert!(private.is_randomized_mac);
    assert_eq!(private.linked_to_device_id, Some(parent.id));
    assert!(private.track_presence);
    assert_eq!(private.name, "Kaia's iPhone (Random MAC)");
    drop(conn);

    // Once linked, the private address records its own departure
    let report = reconciler
        .reconcile_at(
            &[DiscoveryRecord::new(LAPTOP, "192.168.1.20")],
            t0() + Duration::minutes(2),
        )
        .expect("departure pass");
    assert_eq!(report.departures, 1);
    assert_eq!(report.notifications.len(), 1);
    assert_eq!(report.notifications[0].event, PresenceEventType::Left);

    let _ = std::fs::remove_file(path);
}

#[test]
fn failed_pass_publishes_nothing_and_next_pass_recovers() {
    let path = unique_temp_db_path("presence_rollback");
    let broadcast = BroadcastPublisher::new(16);
    let mut updates = broadcast.subscribe();
    let reconciler = PresenceReconciler::new(
        Database::new(path.clone()).expect("database should open"),
        ReconcileSettings::default(),
        Arc::new(broadcast),
    );
    reconciler
        .register_device(LAPTOP, "Kaia's Laptop", true)
        .expect("register");

    {
        let conn = reconciler.database().lock().expect("lock");
        conn.execute_batch(
            r#"
            CREATE TRIGGER fail_association_insert
            BEFORE INSERT ON device_associations
            BEGIN
                SELECT RAISE(FAIL, 'forced association failure');
            END;
            "#,
        )
        .expect("trigger should be created");
    }

    let batch = vec![
        DiscoveryRecord::new(LAPTOP, "192.168.1.20"),
        DiscoveryRecord::new(PRINTER, "192.168.1.30"),
    ];
    assert!(reconciler.reconcile_at(&batch, t0()).is_err());
    assert!(updates.try_recv().is_err());

    {
        let conn = reconciler.database().lock().expect("lock");
        assert!(get_device_by_mac(&conn, PRINTER).expect("query").is_none());
        assert_eq!(count_presence_events(&conn).expect("count"), 0);
        assert_eq!(count_snapshots(&conn).expect("count"), 0);
        conn.execute_batch("DROP TRIGGER fail_association_insert;")
            .expect("trigger should be dropped");
    }

    let report = reconciler
        .reconcile_at(&batch, t0() + Duration::minutes(1))
        .expect("retry should commit");
    assert_eq!(report.arrivals, 2);

    let notification = updates.try_recv().expect("arrival should be published");
    assert_eq!(notification.topic, PRESENCE_UPDATE_TOPIC);
    let update: PresenceUpdate =
        serde_json::from_value(notification.payload).expect("payload should decode");
    assert_eq!(update.name, "Kaia's Laptop");
    assert_eq!(update.event, PresenceEventType::Arrived);
    assert!(update.is_home);
    assert!(updates.try_recv().is_err());

    let _ = std::fs::remove_file(path);
}
