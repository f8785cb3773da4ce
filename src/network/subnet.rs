//! Subnet calculation for the ping sweep

use anyhow::{Context, Result};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

use crate::models::InterfaceInfo;

/// Checks if an IP address is a network or broadcast address
pub fn is_special_address(ip: Ipv4Addr, subnet: &Ipv4Network) -> bool {
    ip == subnet.network() || ip == subnet.broadcast()
}

/// Subnet of a local interface, normalized to its network address
pub fn interface_subnet(interface: &InterfaceInfo) -> Result<Ipv4Network> {
    let network = Ipv4Network::new(interface.ip, interface.prefix_len)
        .context("Failed to create network from interface IP and prefix")?;

    Ipv4Network::new(network.network(), interface.prefix_len)
        .context("Failed to create subnet network")
}

/// Host addresses to ping in `subnet`, excluding network and broadcast
/// addresses and capped at `max_hosts` (lowest addresses first).
///
/// /31 and /32 networks have no special addresses and are returned whole.
pub fn sweep_targets(subnet: &Ipv4Network, max_hosts: usize) -> Vec<Ipv4Addr> {
    let skip_special = subnet.prefix() < 31;
    let targets: Vec<Ipv4Addr> = subnet
        .iter()
        .filter(|ip| !skip_special || !is_special_address(*ip, subnet))
        .take(max_hosts)
        .collect();

    if subnet.size() as usize > max_hosts + 2 {
        crate::log_warn!(
            "Subnet {} is larger than the sweep cap; probing the first {} hosts",
            subnet,
            max_hosts
        );
    }

    targets
}

#[cfg(test)]
#[path = "subnet_tests.rs"]
mod subnet_tests;
