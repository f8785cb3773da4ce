//! MAC address helpers and vendor lookup using the OUI database

use mac_oui::Oui;
use std::sync::OnceLock;

/// OUI database, loaded on first lookup
static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

fn get_oui_db() -> Option<&'static Oui> {
    OUI_DB.get_or_init(|| Oui::default().ok()).as_ref()
}

/// Normalize a MAC address to upper-case colon hex (`AA:BB:CC:DD:EE:FF`).
///
/// Accepts `:` or `-` separators and single-digit octets (`a:b:c:d:e:f` as
/// printed by BSD `arp`). Returns `None` for anything that is not six octets,
/// and for the all-zero and broadcast addresses.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<u8> = raw
        .trim()
        .split([':', '-'])
        .map(|part| {
            if part.is_empty() || part.len() > 2 {
                None
            } else {
                u8::from_str_radix(part, 16).ok()
            }
        })
        .collect::<Option<Vec<u8>>>()?;

    if octets.len() != 6 {
        return None;
    }
    if octets.iter().all(|b| *b == 0) || octets.iter().all(|b| *b == 0xff) {
        return None;
    }

    Some(format_mac(&octets))
}

/// Format raw bytes as upper-case colon hex.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Check whether a MAC address is privacy-randomized.
///
/// True iff the second hex digit of the first octet is one of 2, 6, A, E
/// (locally administered, unicast).
pub fn is_randomized_mac(mac: &str) -> bool {
    let mut digits = mac.trim().chars().filter(|c| *c != ':' && *c != '-');
    match (digits.next(), digits.next()) {
        (Some(_), Some(second)) => matches!(second.to_ascii_uppercase(), '2' | '6' | 'A' | 'E'),
        _ => false,
    }
}

/// Placeholder name for an unnamed device: `Unknown (…EE:FF)`.
pub fn masked_mac_name(mac: &str) -> String {
    let tail: String = mac
        .chars()
        .rev()
        .take(5)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("Unknown (…{})", tail)
}

/// Look up the manufacturer for a MAC address.
///
/// Randomized MACs have no registered vendor, so they short-circuit to `None`.
pub fn lookup_vendor(mac: &str) -> Option<String> {
    if is_randomized_mac(mac) {
        return None;
    }

    let db = get_oui_db()?;
    match db.lookup_by_mac(mac) {
        Ok(Some(entry)) => Some(entry.company_name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_mac_second_digit() {
        assert!(is_randomized_mac("02:11:22:33:44:55"));
        assert!(is_randomized_mac("AA:BB:CC:DD:EE:FF"));
        assert!(is_randomized_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_randomized_mac("de:b2:52:65:8c:55"));
        assert!(is_randomized_mac("56:00:00:00:00:01"));

        assert!(!is_randomized_mac("08:BB:CC:DD:EE:FF"));
        assert!(!is_randomized_mac("34:4a:c3:22:6f:90"));
        // Multicast bit set alongside the local bit does not count
        assert!(!is_randomized_mac("03:00:00:00:00:01"));
        assert!(!is_randomized_mac(""));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("aa-bb-cc-dd-ee-0f").as_deref(),
            Some("AA:BB:CC:DD:EE:0F")
        );
        assert_eq!(
            normalize_mac("a:b:c:d:e:f").as_deref(),
            Some("0A:0B:0C:0D:0E:0F")
        );
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(normalize_mac("ff:ff:ff:ff:ff:ff"), None);
        assert_eq!(normalize_mac("(incomplete)"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
    }

    #[test]
    fn test_masked_mac_name() {
        assert_eq!(masked_mac_name("08:00:27:AA:EE:FF"), "Unknown (…EE:FF)");
    }

    #[test]
    fn test_randomized_mac_has_no_vendor() {
        assert_eq!(lookup_vendor("02:11:22:33:44:55"), None);
    }
}
