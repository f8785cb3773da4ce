//! SNMP collector: walks the gateway's ARP table
//!
//! Default subtree is ipNetToMediaPhysAddress (1.3.6.1.2.1.4.22.1.2). Each row
//! is indexed as `<base>.<ifIndex>.<a>.<b>.<c>.<d>`: the value holds the raw MAC
//! bytes and the trailing four OID components are the IPv4 address.
//!
//! Routers that publish a client-name table indexed the same way can be
//! walked as well; its rows are joined to the ARP rows on the index suffix.

use snmp2::{AsyncSession, Oid, Value};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::timeout;

use super::collector::HostTable;
use crate::config::{SNMP_MAX_WALK_STEPS, ScannerSettings};
use crate::network::{format_mac, normalize_mac};

/// Owned copy of a GETNEXT varbind value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    Octets(Vec<u8>),
    /// endOfMibView, noSuchObject or noSuchInstance
    EndOfView,
    Other,
}

impl VarValue {
    fn from_snmp(value: &Value<'_>) -> Self {
        match value {
            Value::OctetString(bytes) => VarValue::Octets(bytes.to_vec()),
            Value::EndOfMibView | Value::NoSuchObject | Value::NoSuchInstance => {
                VarValue::EndOfView
            }
            _ => VarValue::Other,
        }
    }
}

/// One row of a walked subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkRow {
    /// OID components after the base
    pub suffix: Vec<u64>,
    pub value: Vec<u8>,
}

/// What to do with one GETNEXT response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkStep {
    Row(WalkRow),
    /// Inside the subtree but not an octet string
    Skip,
    Stop,
}

/// Classify the response `name`/`value` to a GETNEXT issued for `current`.
///
/// The walk stops when the name is missing, leaves `base`, fails to advance
/// past `current`, or the agent reports the end of the view.
pub fn walk_step(
    base: &[u64],
    current: &[u64],
    name: Option<&[u64]>,
    value: &VarValue,
) -> WalkStep {
    let Some(name) = name else {
        return WalkStep::Stop;
    };
    if *value == VarValue::EndOfView || !name.starts_with(base) || name <= current {
        return WalkStep::Stop;
    }

    match value {
        VarValue::Octets(bytes) => WalkStep::Row(WalkRow {
            suffix: name[base.len()..].to_vec(),
            value: bytes.clone(),
        }),
        _ => WalkStep::Skip,
    }
}

/// GETNEXT walk of one subtree, bounded by a step cap
#[derive(Debug)]
pub struct SubtreeWalk {
    base: Vec<u64>,
    current: Vec<u64>,
    steps: usize,
    max_steps: usize,
    done: bool,
    rows: Vec<WalkRow>,
}

impl SubtreeWalk {
    pub fn new(base: &[u64], max_steps: usize) -> Self {
        Self {
            base: base.to_vec(),
            current: base.to_vec(),
            steps: 0,
            max_steps,
            done: false,
            rows: Vec::new(),
        }
    }

    /// OID for the next GETNEXT, or `None` once the walk is over.
    pub fn next_request(&mut self) -> Option<Vec<u64>> {
        if self.done || self.steps >= self.max_steps {
            return None;
        }
        self.steps += 1;
        Some(self.current.clone())
    }

    /// Feed the response to the last request.
    pub fn accept(&mut self, name: Option<Vec<u64>>, value: &VarValue) -> WalkStep {
        let step = walk_step(&self.base, &self.current, name.as_deref(), value);
        match &step {
            WalkStep::Row(row) => {
                self.rows.push(row.clone());
                self.current = name.unwrap_or_default();
            }
            WalkStep::Skip => self.current = name.unwrap_or_default(),
            WalkStep::Stop => self.done = true,
        }
        step
    }

    /// Rows collected so far, including those of an aborted walk
    pub fn into_rows(self) -> Vec<WalkRow> {
        self.rows
    }
}

/// SNMPv2c ARP-table collector
#[derive(Debug, Clone)]
pub struct SnmpCollector {
    target: Ipv4Addr,
    port: u16,
    community: String,
    timeout: Duration,
    base_oid: Vec<u64>,
    hostname_oid: Option<Vec<u64>>,
}

impl SnmpCollector {
    pub fn new(settings: &ScannerSettings) -> Self {
        Self {
            target: settings.target_ip,
            port: settings.snmp_port,
            community: settings.snmp_community.clone(),
            timeout: settings.snmp_timeout,
            base_oid: settings.snmp_arp_oid.clone(),
            hostname_oid: settings.snmp_hostname_oid.clone(),
        }
    }

    /// Walk the ARP table (and the hostname table, if configured).
    ///
    /// Any SNMP error ends a walk early; whatever was collected up to that
    /// point is kept.
    pub async fn collect(&self) -> HostTable {
        let addr = format!("{}:{}", self.target, self.port);

        let mut session = match timeout(
            self.timeout,
            AsyncSession::new_v2c(&addr, self.community.as_bytes(), 0),
        )
        .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                crate::log_warn!("SNMP session to {} failed: {}", addr, e);
                return HostTable::default();
            }
            Err(_) => {
                crate::log_warn!("SNMP session to {} timed out", addr);
                return HostTable::default();
            }
        };

        let arp_rows = self.walk(&mut session, &addr, &self.base_oid).await;
        let hostname_rows = match &self.hostname_oid {
            Some(oid) if !arp_rows.is_empty() => self.walk(&mut session, &addr, oid).await,
            _ => Vec::new(),
        };

        let table = join_rows(&arp_rows, &hostname_rows);
        crate::log_debug!(
            "SNMP walk of {} returned {} entries ({} named)",
            addr,
            table.macs.len(),
            table.hostnames.len()
        );
        table
    }

    async fn walk(&self, session: &mut AsyncSession, addr: &str, base: &[u64]) -> Vec<WalkRow> {
        let mut walk = SubtreeWalk::new(base, SNMP_MAX_WALK_STEPS);

        while let Some(current) = walk.next_request() {
            let oid = match Oid::from(current.as_slice()) {
                Ok(oid) => oid,
                Err(e) => {
                    crate::log_warn!("SNMP walk aborted, bad OID {:?}: {:?}", current, e);
                    break;
                }
            };

            match timeout(self.timeout, session.getnext(&oid)).await {
                Ok(Ok(mut response)) => {
                    let Some((name, value)) = response.varbinds.next() else {
                        break;
                    };
                    let name: Option<Vec<u64>> = name.iter().map(|arcs| arcs.collect());
                    walk.accept(name, &VarValue::from_snmp(&value));
                }
                Ok(Err(e)) => {
                    crate::log_warn!("SNMP walk of {} aborted: {:?}", addr, e);
                    break;
                }
                Err(_) => {
                    crate::log_warn!("SNMP walk of {} timed out at {:?}", addr, current);
                    break;
                }
            }
        }

        walk.into_rows()
    }
}

/// Join ARP rows with hostname rows on their `<ifIndex>.<ip>` suffix.
///
/// ARP rows that do not decode are dropped; hostnames that are empty after
/// trimming are ignored.
pub fn join_rows(arp_rows: &[WalkRow], hostname_rows: &[WalkRow]) -> HostTable {
    let names: HashMap<&[u64], String> = hostname_rows
        .iter()
        .filter_map(|row| {
            let name = String::from_utf8_lossy(&row.value).trim().to_string();
            (!name.is_empty()).then_some((row.suffix.as_slice(), name))
        })
        .collect();

    let mut table = HostTable::default();
    for row in arp_rows {
        let Some((ip, mac)) = decode_arp_row(&row.suffix, &row.value) else {
            continue;
        };
        if let Some(name) = names.get(row.suffix.as_slice()) {
            table.hostnames.insert(ip, name.clone());
        }
        table.macs.insert(ip, mac);
    }
    table
}

/// Decode one ARP-table row into (IP, normalized MAC).
///
/// The IP is taken from the last four OID components; the MAC must be exactly
/// six raw bytes.
pub fn decode_arp_row(oid: &[u64], value: &[u8]) -> Option<(Ipv4Addr, String)> {
    if oid.len() < 4 || value.len() != 6 {
        return None;
    }

    let tail = &oid[oid.len() - 4..];
    let octets: Vec<u8> = tail
        .iter()
        .map(|n| u8::try_from(*n).ok())
        .collect::<Option<Vec<u8>>>()?;
    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);

    let mac = normalize_mac(&format_mac(value))?;
    Some((ip, mac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SNMP_ARP_TABLE_OID;

    const MAC: [u8; 6] = [0x08, 0x00, 0x27, 0xaa, 0xbb, 0x0c];

    fn oid(suffix: &[u64]) -> Vec<u64> {
        let mut full = SNMP_ARP_TABLE_OID.to_vec();
        full.extend_from_slice(suffix);
        full
    }

    fn row(suffix: &[u64], value: &[u8]) -> WalkRow {
        WalkRow {
            suffix: suffix.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_decode_arp_row() {
        let oid = [1, 3, 6, 1, 2, 1, 4, 22, 1, 2, 3, 192, 168, 1, 42];

        let (ip, mac) = decode_arp_row(&oid, &MAC).unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(mac, "08:00:27:AA:BB:0C");
    }

    #[test]
    fn test_decode_arp_row_rejects_bad_rows() {
        let oid = [1, 3, 6, 1, 2, 1, 4, 22, 1, 2, 3, 192, 168, 1, 42];
        assert!(decode_arp_row(&oid, &[0x08, 0x00, 0x27]).is_none());
        assert!(decode_arp_row(&oid, &[0, 0, 0, 0, 0, 0]).is_none());

        let out_of_range = [1, 3, 6, 1, 2, 1, 4, 22, 1, 2, 3, 192, 300, 1, 42];
        assert!(decode_arp_row(&out_of_range, &[0x08, 0, 0x27, 1, 2, 3]).is_none());
    }

    #[test]
    fn test_walk_step_row_and_skip() {
        let base = SNMP_ARP_TABLE_OID;
        let name = oid(&[3, 192, 168, 1, 42]);

        assert_eq!(
            walk_step(base, base, Some(name.as_slice()), &VarValue::Octets(MAC.to_vec())),
            WalkStep::Row(row(&[3, 192, 168, 1, 42], &MAC))
        );
        assert_eq!(
            walk_step(base, base, Some(name.as_slice()), &VarValue::Other),
            WalkStep::Skip
        );
    }

    #[test]
    fn test_walk_step_stop_conditions() {
        let base = SNMP_ARP_TABLE_OID;
        let current = oid(&[3, 192, 168, 1, 42]);
        let octets = VarValue::Octets(MAC.to_vec());

        // left the subtree
        let outside = [1, 3, 6, 1, 2, 1, 4, 22, 1, 3, 3, 192, 168, 1, 1];
        assert_eq!(walk_step(base, &current, Some(outside.as_slice()), &octets), WalkStep::Stop);
        // end of MIB view
        let next = oid(&[3, 192, 168, 1, 43]);
        assert_eq!(
            walk_step(base, &current, Some(next.as_slice()), &VarValue::EndOfView),
            WalkStep::Stop
        );
        // not advancing
        assert_eq!(walk_step(base, &current, Some(current.as_slice()), &octets), WalkStep::Stop);
        let behind = oid(&[3, 192, 168, 1, 7]);
        assert_eq!(walk_step(base, &current, Some(behind.as_slice()), &octets), WalkStep::Stop);
        // unreadable name
        assert_eq!(walk_step(base, &current, None, &octets), WalkStep::Stop);
    }

    #[test]
    fn test_subtree_walk_skips_non_octet_values() {
        let mut walk = SubtreeWalk::new(SNMP_ARP_TABLE_OID, 10);

        assert!(walk.next_request().is_some());
        walk.accept(Some(oid(&[3, 192, 168, 1, 1])), &VarValue::Other);
        assert_eq!(walk.next_request(), Some(oid(&[3, 192, 168, 1, 1])));
        walk.accept(Some(oid(&[3, 192, 168, 1, 2])), &VarValue::Octets(MAC.to_vec()));
        assert!(walk.next_request().is_some());
        walk.accept(Some(oid(&[4, 1, 1, 1, 1])), &VarValue::EndOfView);

        assert!(walk.next_request().is_none());
        assert_eq!(walk.into_rows(), vec![row(&[3, 192, 168, 1, 2], &MAC)]);
    }

    #[test]
    fn test_subtree_walk_step_cap() {
        let mut walk = SubtreeWalk::new(SNMP_ARP_TABLE_OID, 3);
        let mut issued = 0;

        while walk.next_request().is_some() {
            issued += 1;
            walk.accept(
                Some(oid(&[3, 10, 0, 0, issued])),
                &VarValue::Octets(MAC.to_vec()),
            );
        }

        assert_eq!(issued, 3);
        assert_eq!(walk.into_rows().len(), 3);
    }

    #[test]
    fn test_aborted_walk_keeps_collected_rows() {
        let mut walk = SubtreeWalk::new(SNMP_ARP_TABLE_OID, 100);
        walk.next_request();
        walk.accept(Some(oid(&[3, 10, 0, 0, 5])), &VarValue::Octets(MAC.to_vec()));
        // request issued, agent never answers
        assert!(walk.next_request().is_some());

        assert_eq!(walk.into_rows(), vec![row(&[3, 10, 0, 0, 5], &MAC)]);
    }

    #[test]
    fn test_join_rows_matches_hostnames_on_suffix() {
        let arp = vec![
            row(&[3, 192, 168, 1, 20], &MAC),
            row(&[3, 192, 168, 1, 21], &[0xda, 0xa1, 0x19, 0, 0, 1]),
            row(&[3, 192, 168, 1, 22], &[0, 0, 0, 0, 0, 0]),
        ];
        let names = vec![
            row(&[3, 192, 168, 1, 20], b"living-room-tv"),
            // same IP on another interface index: not joined
            row(&[4, 192, 168, 1, 21], b"kaias-iphone"),
            row(&[3, 192, 168, 1, 21], b"   "),
        ];

        let table = join_rows(&arp, &names);

        assert_eq!(table.macs.len(), 2);
        assert_eq!(
            table.hostnames.get(&Ipv4Addr::new(192, 168, 1, 20)).map(String::as_str),
            Some("living-room-tv")
        );
        assert!(!table.hostnames.contains_key(&Ipv4Addr::new(192, 168, 1, 21)));
        assert!(join_rows(&arp, &[]).hostnames.is_empty());
    }
}
