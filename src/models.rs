//! Data models shared by the scanner and the reconciler

use pnet::datalink::NetworkInterface;
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// One device seen during a scan cycle.
///
/// This is the only type that crosses the scanner process boundary. It is
/// never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Upper-case colon-hex MAC address
    pub mac: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub mdns_services: Vec<String>,
    /// mDNS TXT properties
    #[serde(default)]
    pub device_info: BTreeMap<String, String>,
    /// True if the MAC is locally administered (privacy-randomized)
    #[serde(rename = "is_random", default)]
    pub is_random_mac: bool,
}

impl DiscoveryRecord {
    /// Record with no mDNS enrichment. The MAC is expected to be normalized.
    pub fn new(mac: impl Into<String>, ip: impl Into<String>) -> Self {
        let mac = mac.into();
        let is_random_mac = crate::network::is_randomized_mac(&mac);
        Self {
            mac,
            ip: ip.into(),
            hostname: None,
            mdns_services: Vec::new(),
            device_info: BTreeMap::new(),
            is_random_mac,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mdns_services = services.into_iter().map(Into::into).collect();
        self
    }
}

/// A complete scan cycle's output
pub type DiscoveryBatch = Vec<DiscoveryRecord>;

/// Network interface information with MAC address
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub prefix_len: u8,
    pub pnet_interface: NetworkInterface,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_uses_is_random() {
        let record = DiscoveryRecord::new("02:11:22:33:44:55", "192.168.1.20")
            .with_hostname("Pixel-7")
            .with_services(["_googlecast._tcp.local."]);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"is_random\":true"));
        assert!(json.contains("\"hostname\":\"Pixel-7\""));
        assert!(!json.contains("is_random_mac"));
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{"mac":"08:00:27:AA:BB:CC","ip":"10.0.0.5"}"#;
        let record: DiscoveryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.hostname, None);
        assert!(record.mdns_services.is_empty());
        assert!(!record.is_random_mac);
    }
}
