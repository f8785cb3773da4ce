//! Network snapshots and presence health

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::stale_window;
use crate::database::{
    NetworkSnapshotRecord, PresenceEventRecord, PresenceStats, SnapshotDevice, get_latest_snapshot,
    get_presence_stats, get_recent_presence_events, insert_snapshot, prune_snapshots,
};

/// Presence events included in a health report
const HEALTH_RECENT_EVENTS: i64 = 10;

/// Append a snapshot and drop everything past the retention window.
/// Returns the new snapshot id and the number of rows pruned.
pub fn write_snapshot(
    conn: &Connection,
    now: DateTime<Utc>,
    devices: &[SnapshotDevice],
    retention_days: i64,
) -> Result<(i64, usize)> {
    let id = insert_snapshot(conn, now, devices)?;
    let pruned = prune_snapshots(conn, now - Duration::days(retention_days))?;
    if pruned > 0 {
        crate::log_debug!("Pruned {} snapshots older than {} days", pruned, retention_days);
    }
    Ok((id, pruned))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Stalled,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceHealth {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub last_snapshot: Option<NetworkSnapshotRecord>,
    /// Seconds since the last snapshot
    pub snapshot_age_secs: Option<i64>,
    pub stats: PresenceStats,
    pub recent_events: Vec<PresenceEventRecord>,
}

/// Classify the latest snapshot age against `interval_secs`.
///
/// Online when strictly newer than interval × 3.
pub fn health_status(
    latest: Option<DateTime<Utc>>,
    interval_secs: u64,
    now: DateTime<Utc>,
) -> HealthStatus {
    let Some(latest) = latest else {
        return HealthStatus::Unknown;
    };

    if now - latest < stale_window(interval_secs) {
        HealthStatus::Online
    } else {
        HealthStatus::Stalled
    }
}

/// Health report: staleness of the heartbeat plus device counters.
pub fn presence_health(
    conn: &Connection,
    interval_secs: u64,
    now: DateTime<Utc>,
) -> Result<PresenceHealth> {
    let last_snapshot = get_latest_snapshot(conn)?;
    let latest_ts = last_snapshot.as_ref().map(|s| s.timestamp);

    Ok(PresenceHealth {
        status: health_status(latest_ts, interval_secs, now),
        checked_at: now,
        snapshot_age_secs: latest_ts.map(|ts| (now - ts).num_seconds()),
        last_snapshot,
        stats: get_presence_stats(conn)?,
        recent_events: get_recent_presence_events(conn, HEALTH_RECENT_EVENTS)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, count_snapshots};
    use chrono::TimeZone;

    #[test]
    fn test_health_status_thresholds() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(health_status(None, 60, now), HealthStatus::Unknown);
        assert_eq!(
            health_status(Some(now - Duration::seconds(179)), 60, now),
            HealthStatus::Online
        );
        assert_eq!(
            health_status(Some(now - Duration::seconds(180)), 60, now),
            HealthStatus::Stalled
        );
    }

    #[test]
    fn test_health_status_huge_interval_stays_online() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            health_status(Some(now - Duration::days(365)), u64::MAX, now),
            HealthStatus::Online
        );
    }

    #[test]
    fn test_write_snapshot_prunes_old_rows() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();

        write_snapshot(&conn, now - Duration::days(9), &[], 7).unwrap();
        write_snapshot(&conn, now - Duration::days(3), &[], 7).unwrap();
        let (_, pruned) = write_snapshot(&conn, now, &[], 7).unwrap();

        assert_eq!(pruned, 1);
        assert_eq!(count_snapshots(&conn).unwrap(), 2);
    }

    #[test]
    fn test_presence_health_report() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();

        let empty = presence_health(&conn, 60, now).unwrap();
        assert_eq!(empty.status, HealthStatus::Unknown);
        assert!(empty.snapshot_age_secs.is_none());

        write_snapshot(&conn, now - Duration::seconds(30), &[], 7).unwrap();
        let report = presence_health(&conn, 60, now).unwrap();
        assert_eq!(report.status, HealthStatus::Online);
        assert_eq!(report.snapshot_age_secs, Some(30));
        assert_eq!(report.stats.total_devices, 0);
    }
}
