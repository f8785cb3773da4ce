//! Scanner module - collectors, mDNS enrichment and the scan loop
//!
//! The scanner never touches the database. Each cycle produces one
//! `DiscoveryBatch` which is handed to the result channel.

mod arp_table;
mod collector;
mod icmp;
mod mdns;
mod snmp;

pub use arp_table::{parse_arp_command_output, parse_proc_net_arp, read_arp_table};
pub use collector::{ArpCollector, Collector, HostTable};
pub use icmp::ping_sweep;
pub use mdns::{MDNS_SERVICE_TYPES, MdnsCache, MdnsListener};
pub use snmp::{
    SnmpCollector, SubtreeWalk, VarValue, WalkRow, WalkStep, decode_arp_row, join_rows, walk_step,
};

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::config::ScannerSettings;
use crate::models::{DiscoveryBatch, DiscoveryRecord};
use crate::worker::{BatchSender, SendOutcome, StopSignal};

/// Composes the configured collectors and the mDNS cache
pub struct NetworkScanner {
    settings: ScannerSettings,
    collectors: Vec<Collector>,
    mdns: Option<MdnsListener>,
}

impl NetworkScanner {
    /// Build the scanner. Must be called inside a tokio runtime when mDNS is
    /// enabled; a daemon that fails to start only disables enrichment.
    pub fn new(settings: ScannerSettings) -> Self {
        let collectors = Collector::from_settings(&settings);

        let mdns = if settings.mdns_enabled {
            match MdnsListener::start() {
                Ok(listener) => Some(listener),
                Err(e) => {
                    crate::log_warn!("mDNS unavailable, continuing without enrichment: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            settings,
            collectors,
            mdns,
        }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Run one scan cycle.
    pub async fn scan_once(&self) -> DiscoveryBatch {
        let started = Instant::now();
        let mut tables = Vec::with_capacity(self.collectors.len());

        for collector in &self.collectors {
            let table = collector.collect().await;
            crate::log_debug!(
                "Collector {} reported {} hosts ({} named)",
                collector.kind(),
                table.macs.len(),
                table.hostnames.len()
            );
            tables.push(table);
        }

        let cache = self
            .mdns
            .as_ref()
            .map(MdnsListener::snapshot)
            .unwrap_or_default();

        let batch = build_batch(&tables, &cache);
        crate::log_debug!(
            "Scan cycle: {} devices in {:?}",
            batch.len(),
            started.elapsed()
        );
        batch
    }

    /// Scan until `stop` trips or the receiving side goes away.
    ///
    /// Empty cycles emit nothing. The inter-cycle sleep is sliced so the stop
    /// signal is observed at least once per second.
    pub async fn run(self, sender: BatchSender, stop: StopSignal) {
        crate::log_stderr!(
            "Scanner started (target {}, interval {}s, collectors {:?})",
            self.settings.target_ip,
            self.settings.interval_secs,
            self.collectors.iter().map(Collector::kind).collect::<Vec<_>>()
        );

        let mut cycle: u64 = 0;

        while !stop.is_stopped() {
            cycle += 1;
            let batch = self.scan_once().await;

            if stop.is_stopped() {
                break;
            }

            if !batch.is_empty() {
                match sender.send(batch, &stop).await {
                    SendOutcome::Sent => {}
                    SendOutcome::Stopped => break,
                    SendOutcome::Closed => {
                        crate::log_warn!("Result channel closed, scanner exiting");
                        break;
                    }
                }
            } else {
                crate::log_debug!("Scan cycle #{} found nothing", cycle);
            }

            stop.sleep(self.settings.interval()).await;
        }

        if let Some(mdns) = &self.mdns {
            mdns.shutdown();
        }
        crate::log_stderr!("Scanner stopped after {} cycles", cycle);
    }
}

/// Merge collector tables into one batch.
///
/// Tables are consulted in order: the first collector to report an IP wins, and
/// a MAC seen under several IPs keeps the lowest IP of the first table that has
/// it. An mDNS hostname beats one reported by the router.
pub fn build_batch(tables: &[HostTable], mdns: &MdnsCache) -> DiscoveryBatch {
    let mut seen_ips: HashSet<Ipv4Addr> = HashSet::new();
    let mut seen_macs: HashSet<String> = HashSet::new();
    let mut batch = Vec::new();

    for table in tables {
        let mut entries: Vec<(&Ipv4Addr, &String)> = table.macs.iter().collect();
        entries.sort_by_key(|(ip, _)| **ip);

        for (ip, mac) in entries {
            let Some(mac) = crate::network::normalize_mac(mac) else {
                continue;
            };
            if !seen_ips.insert(*ip) || !seen_macs.insert(mac.clone()) {
                continue;
            }

            let mut record =
                DiscoveryRecord::new(mac, ip.to_string()).with_services(mdns.services(ip));
            let hostname = mdns
                .hostname(ip)
                .or_else(|| table.hostnames.get(ip).cloned());
            if let Some(hostname) = hostname {
                record = record.with_hostname(hostname);
            }
            record.device_info = mdns.properties(ip);
            batch.push(record);
        }
    }

    batch
}
