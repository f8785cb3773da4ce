//! Local interface detection, used when no sweep subnet is configured

use anyhow::{Result, anyhow};
use pnet::datalink;
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv4Addr};

use crate::models::InterfaceInfo;

fn is_virtual_adapter_name(name_lower: &str) -> bool {
    name_lower.contains("hyper-v")
        || name_lower.contains("vmware")
        || name_lower.contains("virtualbox")
        || name_lower.contains("docker")
        || name_lower.contains("vethernet")
        || name_lower.contains("wsl")
}

fn collect_candidate_interfaces(pnet_interfaces: &[datalink::NetworkInterface]) -> Vec<InterfaceInfo> {
    let mut candidates: Vec<InterfaceInfo> = Vec::new();

    for pnet_if in pnet_interfaces {
        if pnet_if.is_loopback() || !pnet_if.is_up() {
            continue;
        }

        let mac = match pnet_if.mac {
            Some(m) if m != MacAddr::zero() => m,
            _ => continue,
        };

        if is_virtual_adapter_name(&pnet_if.name.to_lowercase()) {
            crate::log_debug!("Skipping virtual adapter: {}", pnet_if.name);
            continue;
        }

        for ip_network in &pnet_if.ips {
            if let IpAddr::V4(ipv4) = ip_network.ip() {
                if ipv4.is_unspecified() || ip_network.prefix() == 0 || ipv4.is_link_local() {
                    continue;
                }

                candidates.push(InterfaceInfo {
                    name: pnet_if.name.clone(),
                    ip: ipv4,
                    mac,
                    prefix_len: ip_network.prefix(),
                    pnet_interface: pnet_if.clone(),
                });
            }
        }
    }

    candidates
}

/// Finds the best IPv4 interface with a MAC address.
/// Prefers typical home/office LAN ranges over everything else.
pub fn find_valid_interface() -> Result<InterfaceInfo> {
    let pnet_interfaces = datalink::interfaces();
    let mut candidates = collect_candidate_interfaces(&pnet_interfaces);

    candidates.sort_by(|a, b| interface_score(&b.ip).cmp(&interface_score(&a.ip)));

    match candidates.into_iter().next() {
        Some(best) => {
            crate::log_debug!(
                "Selected interface: {} (IP: {}/{}, MAC: {})",
                best.name,
                best.ip,
                best.prefix_len,
                best.mac
            );
            Ok(best)
        }
        None => Err(anyhow!(
            "No valid IPv4 network interface found. Configure PRESENCE_SUBNET explicitly."
        )),
    }
}

/// Scores an IP address for interface selection priority
pub fn interface_score(ip: &Ipv4Addr) -> u32 {
    let octets = ip.octets();
    match octets[0] {
        192 if octets[1] == 168 => 100,
        10 => 90,
        172 if (16..=31).contains(&octets[1]) => 50,
        _ => 70,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_score_prefers_home_lan() {
        let home: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let office: Ipv4Addr = "10.0.0.10".parse().unwrap();
        let docker: Ipv4Addr = "172.17.0.1".parse().unwrap();

        assert!(interface_score(&home) > interface_score(&office));
        assert!(interface_score(&office) > interface_score(&docker));
    }

    #[test]
    fn test_virtual_adapter_names() {
        assert!(is_virtual_adapter_name("docker0"));
        assert!(is_virtual_adapter_name("vethernet (wsl)"));
        assert!(!is_virtual_adapter_name("eth0"));
    }
}
