//! OS ARP table reader
//!
//! Fast path: the structured `/proc/net/arp` table on Linux.
//! Fallback: regex over `arp -an` (or `arp -a` on Windows) output.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::network::normalize_mac;

const PROC_NET_ARP: &str = "/proc/net/arp";

/// ATF_COM: entry is complete
const ATF_COM: u32 = 0x2;

/// Matches `? (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0` (Linux/BSD/macOS)
/// and `  192.168.1.1     aa-bb-cc-dd-ee-ff     dynamic` (Windows).
const ARP_LINE_PATTERN: &str = r"\(?(\d{1,3}(?:\.\d{1,3}){3})\)?\s+(?:at\s+)?([0-9A-Fa-f]{1,2}(?:[:-][0-9A-Fa-f]{1,2}){5})\b";

fn arp_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ARP_LINE_PATTERN).expect("ARP line pattern is a valid regex"))
}

/// Read the OS ARP table into IP → MAC.
pub async fn read_arp_table() -> Result<HashMap<Ipv4Addr, String>> {
    match tokio::fs::read_to_string(PROC_NET_ARP).await {
        Ok(contents) => Ok(parse_proc_net_arp(&contents)),
        Err(_) => {
            crate::log_debug!("{} unavailable, falling back to `arp` command", PROC_NET_ARP);
            let output = run_arp_command().await?;
            Ok(parse_arp_command_output(&output))
        }
    }
}

async fn run_arp_command() -> Result<String> {
    let args: &[&str] = if cfg!(target_os = "windows") {
        &["-a"]
    } else {
        &["-an"]
    };

    let output = tokio::process::Command::new("arp")
        .args(args)
        .output()
        .await
        .context("Failed to run `arp`")?;

    if !output.status.success() {
        return Err(anyhow!("`arp` exited with {}", output.status));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `/proc/net/arp`. Incomplete entries (flags without ATF_COM) are
/// skipped.
pub fn parse_proc_net_arp(contents: &str) -> HashMap<Ipv4Addr, String> {
    let mut table = HashMap::new();

    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }

        let Ok(ip) = fields[0].parse::<Ipv4Addr>() else {
            continue;
        };
        let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).unwrap_or(0);
        if flags & ATF_COM == 0 {
            continue;
        }
        if let Some(mac) = normalize_mac(fields[3]) {
            table.insert(ip, mac);
        }
    }

    table
}

/// Parse free-form `arp` command output.
pub fn parse_arp_command_output(output: &str) -> HashMap<Ipv4Addr, String> {
    let re = arp_line_regex();
    let mut table = HashMap::new();

    for caps in re.captures_iter(output) {
        let Ok(ip) = caps[1].parse::<Ipv4Addr>() else {
            continue;
        };
        if let Some(mac) = normalize_mac(&caps[2]) {
            table.insert(ip, mac);
        }
    }

    table
}
