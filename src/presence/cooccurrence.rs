//! Co-occurrence tracking: which devices are home at the same time

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::database::upsert_association;

/// Upsert one association for every unordered pair of home devices.
///
/// Returns the number of pairs touched. Quadratic in the number of devices.
pub fn record_co_occurrences(
    conn: &Connection,
    home_device_ids: &[i64],
    seen_at: DateTime<Utc>,
) -> Result<usize> {
    let mut ids = home_device_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut pairs = 0;
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            upsert_association(conn, a, b, seen_at)?;
            pairs += 1;
        }
    }

    Ok(pairs)
}
