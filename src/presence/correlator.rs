//! Identity correlation for randomized MACs
//!
//! A device that shows up with a privacy MAC is compared to every tracked
//! device with a stable MAC. The best fingerprint match at or above the
//! threshold becomes its parent identity.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::CorrelationWeights;
use crate::database::DeviceRecord;

/// Device-family words recognised inside host names
const DEVICE_FAMILIES: &[&str] = &[
    "iphone", "ipad", "watch", "macbook", "android", "galaxy", "pixel",
];

/// Comparable features of one device
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Fingerprint {
    pub hostname_pattern: Option<String>,
    pub mdns_services: BTreeSet<String>,
    pub connection_hours: BTreeSet<u8>,
}

impl Fingerprint {
    pub fn from_device(device: &DeviceRecord) -> Self {
        Self {
            hostname_pattern: device.hostname.as_deref().and_then(hostname_pattern),
            mdns_services: device.mdns_services.clone(),
            connection_hours: device.typical_connection_times.clone(),
        }
    }
}

/// Reduce a host name to a comparable pattern.
///
/// A known device family wins; otherwise the lower-cased name with digits and
/// hyphens removed. Empty results are `None`.
pub fn hostname_pattern(hostname: &str) -> Option<String> {
    let lower = hostname.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    if let Some(family) = DEVICE_FAMILIES.iter().find(|f| lower.contains(*f)) {
        return Some((*family).to_string());
    }

    let stripped: String = lower
        .chars()
        .filter(|c| !c.is_ascii_digit() && *c != '-')
        .collect();
    let stripped = stripped.trim();

    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Weighted similarity in [0, 1].
///
/// Only features present on both sides contribute, and the score is
/// normalised by the weights of those features alone. No comparable feature
/// means 0.
pub fn similarity(a: &Fingerprint, b: &Fingerprint, weights: &CorrelationWeights) -> f64 {
    let mut score = 0.0;
    let mut evaluated = 0.0;

    if let (Some(pa), Some(pb)) = (&a.hostname_pattern, &b.hostname_pattern) {
        evaluated += weights.hostname;
        if pa == pb {
            score += weights.hostname;
        }
    }

    if !a.mdns_services.is_empty() && !b.mdns_services.is_empty() {
        evaluated += weights.mdns;
        if !a.mdns_services.is_disjoint(&b.mdns_services) {
            score += weights.mdns;
        }
    }

    if !a.connection_hours.is_empty() && !b.connection_hours.is_empty() {
        let overlap = a.connection_hours.intersection(&b.connection_hours).count();
        let total = a.connection_hours.union(&b.connection_hours).count();
        evaluated += weights.hours;
        score += weights.hours * overlap as f64 / total as f64;
    }

    if evaluated > 0.0 {
        score / evaluated
    } else {
        0.0
    }
}

/// Accepted link between a randomized device and a stable one
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatch {
    pub device_id: i64,
    pub parent_id: i64,
    pub parent_name: String,
    pub score: f64,
}

/// Eligible parent: tracked and not itself randomized
pub fn is_link_candidate(device: &DeviceRecord) -> bool {
    device.track_presence && !device.is_randomized_mac
}

/// Best candidate for `device`, or `None` below `threshold`.
///
/// Candidates are scanned in order; on equal scores the first one wins.
pub fn best_match<'a, I>(
    device: &DeviceRecord,
    candidates: I,
    weights: &CorrelationWeights,
    threshold: f64,
) -> Option<CorrelationMatch>
where
    I: IntoIterator<Item = &'a DeviceRecord>,
{
    let fingerprint = Fingerprint::from_device(device);
    let mut best: Option<(&DeviceRecord, f64)> = None;

    for candidate in candidates {
        if candidate.id == device.id || !is_link_candidate(candidate) {
            continue;
        }

        let score = similarity(&fingerprint, &Fingerprint::from_device(candidate), weights);
        if score < threshold {
            continue;
        }
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    best.map(|(parent, score)| CorrelationMatch {
        device_id: device.id,
        parent_id: parent.id,
        parent_name: parent.name.clone(),
        score,
    })
}

/// Name given to a linked randomized device
pub fn linked_name(parent_name: &str) -> String {
    format!("{} (Random MAC)", parent_name)
}

/// Apply an accepted match to the randomized device.
pub fn apply_link(device: &mut DeviceRecord, link: &CorrelationMatch) {
    device.linked_to_device_id = Some(link.parent_id);
    device.link_confidence = Some(link.score);
    device.track_presence = true;
    device.name = linked_name(&link.parent_name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn device(id: i64, hostname: Option<&str>, randomized: bool, tracked: bool) -> DeviceRecord {
        DeviceRecord {
            id,
            mac_address: format!("AC:DE:48:00:00:{:02X}", id),
            name: format!("device-{}", id),
            is_randomized_mac: randomized,
            hostname: hostname.map(str::to_string),
            vendor: None,
            last_ip: None,
            ip_history: Vec::new(),
            mdns_services: BTreeSet::new(),
            device_metadata: BTreeMap::new(),
            typical_connection_times: BTreeSet::new(),
            is_home: false,
            track_presence: tracked,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            linked_to_device_id: None,
            link_confidence: None,
        }
    }

    fn fp(pattern: Option<&str>, services: &[&str], hours: &[u8]) -> Fingerprint {
        Fingerprint {
            hostname_pattern: pattern.map(str::to_string),
            mdns_services: services.iter().map(|s| s.to_string()).collect(),
            connection_hours: hours.iter().copied().collect(),
        }
    }

    #[test]
    fn test_hostname_pattern() {
        assert_eq!(hostname_pattern("Kaias-iPhone").as_deref(), Some("iphone"));
        assert_eq!(hostname_pattern("Galaxy-S21").as_deref(), Some("galaxy"));
        assert_eq!(hostname_pattern("desk-pc-01").as_deref(), Some("deskpc"));
        assert_eq!(hostname_pattern("1234-56"), None);
        assert_eq!(hostname_pattern("  "), None);
    }

    #[test]
    fn test_similarity_bounds() {
        let weights = CorrelationWeights::default();

        let a = fp(Some("iphone"), &[], &[]);
        let b = fp(Some("iphone"), &[], &[]);
        assert_eq!(similarity(&a, &b, &weights), 1.0);

        let empty = Fingerprint::default();
        assert_eq!(similarity(&empty, &b, &weights), 0.0);
    }

    #[test]
    fn test_similarity_partial_features() {
        let weights = CorrelationWeights::default();

        // hostname match (0.5) + service overlap (0.3) + hours 1/3 (0.2 / 3)
        let a = fp(Some("iphone"), &["_airplay._tcp.local."], &[8, 9, 20]);
        let b = fp(Some("iphone"), &["_airplay._tcp.local.", "_http._tcp.local."], &[9]);
        let expected = (0.5 + 0.3 + 0.2 / 3.0) / 1.0;
        assert!((similarity(&a, &b, &weights) - expected).abs() < 1e-9);

        // mismatching hostname still counts as evaluated
        let c = fp(Some("pixel"), &["_airplay._tcp.local."], &[]);
        assert!((similarity(&a, &c, &weights) - 0.3 / 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let weights = CorrelationWeights::default();
        let mut new_dev = device(10, Some("iPhone"), true, false);
        new_dev.mdns_services.insert("_airplay._tcp.local.".to_string());
        let mut parent = device(1, Some("Kaias-iPhone"), false, true);
        parent.mdns_services.insert("_http._tcp.local.".to_string());

        // hostname matches, services disjoint: 0.5 / 0.8
        let score = 0.5 / 0.8;
        assert!(best_match(&new_dev, [&parent], &weights, score).is_some());
        assert!(best_match(&new_dev, [&parent], &weights, score + 1e-9).is_none());
    }

    #[test]
    fn test_best_match_skips_ineligible_and_prefers_first_on_tie() {
        let weights = CorrelationWeights::default();
        let new_dev = device(10, Some("iPhone"), true, false);
        let untracked = device(1, Some("iPhone"), false, false);
        let randomized = device(2, Some("iPhone"), true, true);
        let first = device(3, Some("iPhone-old"), false, true);
        let second = device(4, Some("iPhone-new"), false, true);

        let found = best_match(
            &new_dev,
            [&untracked, &randomized, &first, &second],
            &weights,
            0.65,
        )
        .unwrap();
        assert_eq!(found.parent_id, 3);
        assert_eq!(found.score, 1.0);

        let mut linked = new_dev.clone();
        apply_link(&mut linked, &found);
        assert_eq!(linked.name, "device-3 (Random MAC)");
        assert!(linked.track_presence);
        assert_eq!(linked.linked_to_device_id, Some(3));
    }
}
