//! mDNS/DNS-SD passive listener
//!
//! Browses a fixed set of service types and keeps per-IP caches of hostname,
//! service types and TXT properties. The scanner reads a cloned view of the
//! cache; stale entries are acceptable.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

/// Service types browsed by the listener
pub const MDNS_SERVICE_TYPES: &[&str] = &[
    "_device-info._tcp.local.",
    "_workstation._tcp.local.",
    "_airplay._tcp.local.",
    "_googlecast._tcp.local.",
    "_http._tcp.local.",
];

/// Per-IP mDNS knowledge
#[derive(Debug, Clone, Default)]
pub struct MdnsCache {
    pub hostnames: HashMap<Ipv4Addr, String>,
    pub services: HashMap<Ipv4Addr, BTreeSet<String>>,
    pub properties: HashMap<Ipv4Addr, BTreeMap<String, String>>,
}

impl MdnsCache {
    /// Record one resolved announcement.
    pub fn record(
        &mut self,
        ip: Ipv4Addr,
        hostname: &str,
        service_type: &str,
        properties: BTreeMap<String, String>,
    ) {
        let hostname = clean_hostname(hostname);
        if !hostname.is_empty() {
            self.hostnames.insert(ip, hostname);
        }

        self.services
            .entry(ip)
            .or_default()
            .insert(service_type.to_string());

        if !properties.is_empty() {
            self.properties.insert(ip, properties);
        }
    }

    pub fn hostname(&self, ip: &Ipv4Addr) -> Option<String> {
        self.hostnames.get(ip).cloned()
    }

    pub fn services(&self, ip: &Ipv4Addr) -> Vec<String> {
        self.services
            .get(ip)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn properties(&self, ip: &Ipv4Addr) -> BTreeMap<String, String> {
        self.properties.get(ip).cloned().unwrap_or_default()
    }
}

/// Strip the trailing `.local.` / `.` from an mDNS host name
fn clean_hostname(hostname: &str) -> String {
    let trimmed = hostname.trim().trim_end_matches('.');
    trimmed
        .strip_suffix(".local")
        .unwrap_or(trimmed)
        .to_string()
}

/// Shared handle to the cache
pub type SharedMdnsCache = Arc<Mutex<MdnsCache>>;

/// Background mDNS subscriber
pub struct MdnsListener {
    daemon: ServiceDaemon,
    cache: SharedMdnsCache,
}

impl MdnsListener {
    /// Start browsing all service types. One task per browse receiver updates
    /// the cache; the tasks end when the daemon shuts down.
    pub fn start() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let daemon = ServiceDaemon::new()?;
        let cache: SharedMdnsCache = Arc::new(Mutex::new(MdnsCache::default()));

        for service_type in MDNS_SERVICE_TYPES {
            let receiver = daemon.browse(service_type)?;
            let cache = Arc::clone(&cache);

            tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            apply_resolved(&cache, &info);
                        }
                        ServiceEvent::SearchStopped(ty) => {
                            crate::log_debug!("mDNS browse stopped: {}", ty);
                            break;
                        }
                        _ => {}
                    }
                }
            });
        }

        crate::log_stderr!(
            "mDNS listener started ({} service types)",
            MDNS_SERVICE_TYPES.len()
        );

        Ok(Self { daemon, cache })
    }

    /// Clone of the current cache contents
    pub fn snapshot(&self) -> MdnsCache {
        match self.cache.lock() {
            Ok(cache) => cache.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            crate::log_debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

impl Drop for MdnsListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_resolved(cache: &SharedMdnsCache, info: &ServiceInfo) {
    let Some(ip) = info.get_addresses().iter().find_map(|addr| match addr {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    }) else {
        return;
    };

    let properties: BTreeMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    crate::log_debug!(
        "mDNS: {} at {} ({})",
        info.get_hostname(),
        ip,
        info.get_type()
    );

    let mut guard = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.record(ip, info.get_hostname(), info.get_type(), properties);
}
