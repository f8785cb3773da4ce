//! Collectors: one discovery technique each, all yielding IP → MAC
//! (plus router-supplied host names where the technique has them)

use ipnetwork::Ipv4Network;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use super::arp_table::read_arp_table;
use super::icmp::ping_sweep;
use super::snmp::SnmpCollector;
use crate::config::{CollectorKind, ScannerSettings, max_concurrent_pings, max_scan_hosts, ping_timeout};
use crate::network::{find_valid_interface, interface_subnet, sweep_targets};

/// What one collector found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostTable {
    pub macs: HashMap<Ipv4Addr, String>,
    /// Host names reported alongside the MACs, keyed by IP
    pub hostnames: HashMap<Ipv4Addr, String>,
}

impl HostTable {
    pub fn from_macs(macs: HashMap<Ipv4Addr, String>) -> Self {
        Self {
            macs,
            hostnames: HashMap::new(),
        }
    }
}

/// Ping sweep + OS ARP table read
#[derive(Debug, Clone)]
pub struct ArpCollector {
    /// Subnet to sweep; `None` skips the active phase
    sweep_subnet: Option<Ipv4Network>,
}

impl ArpCollector {
    pub fn new(settings: &ScannerSettings) -> Self {
        let sweep_subnet = if settings.ping_sweep {
            settings.subnet.or_else(|| {
                match find_valid_interface().and_then(|iface| interface_subnet(&iface)) {
                    Ok(subnet) => Some(subnet),
                    Err(e) => {
                        crate::log_warn!("Ping sweep disabled: {}", e);
                        None
                    }
                }
            })
        } else {
            None
        };

        Self { sweep_subnet }
    }

    pub async fn collect(&self) -> HostTable {
        if let Some(subnet) = &self.sweep_subnet {
            let targets = sweep_targets(subnet, max_scan_hosts());
            ping_sweep(&targets, max_concurrent_pings(), ping_timeout()).await;
        }

        match read_arp_table().await {
            Ok(macs) => HostTable::from_macs(macs),
            Err(e) => {
                crate::log_warn!("ARP table read failed: {:#}", e);
                HostTable::default()
            }
        }
    }
}

/// Closed set of discovery techniques
#[derive(Debug, Clone)]
pub enum Collector {
    Snmp(SnmpCollector),
    Arp(ArpCollector),
}

impl Collector {
    /// Build the collector for `kind`
    pub fn from_kind(kind: CollectorKind, settings: &ScannerSettings) -> Self {
        match kind {
            CollectorKind::Snmp => Collector::Snmp(SnmpCollector::new(settings)),
            CollectorKind::Arp => Collector::Arp(ArpCollector::new(settings)),
        }
    }

    /// Build every configured collector, in configuration order
    pub fn from_settings(settings: &ScannerSettings) -> Vec<Self> {
        settings
            .collectors
            .iter()
            .map(|kind| Self::from_kind(*kind, settings))
            .collect()
    }

    pub fn kind(&self) -> CollectorKind {
        match self {
            Collector::Snmp(_) => CollectorKind::Snmp,
            Collector::Arp(_) => CollectorKind::Arp,
        }
    }

    /// Run one collection. Failures are logged inside and yield partial or
    /// empty tables.
    pub async fn collect(&self) -> HostTable {
        match self {
            Collector::Snmp(c) => c.collect().await,
            Collector::Arp(c) => c.collect().await,
        }
    }
}
