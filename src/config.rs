//! Configuration for the presence engine
//!
//! Compile-time defaults live in constants. Every value can be tuned at runtime
//! through a `PRESENCE_*` environment variable; the accessor functions clamp
//! values to sane ranges. `PresenceConfig::from_env()` collects everything into
//! one struct that is passed down explicitly.

use anyhow::{Context, Result, anyhow};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

// ====== Scanner Configuration ======

/// Default gateway / SNMP agent address
pub const DEFAULT_TARGET_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

/// Default seconds between scan cycles
pub const DEFAULT_SCAN_INTERVAL: u64 = 60;

/// Minimum scan interval in seconds
pub const MIN_SCAN_INTERVAL: u64 = 5;

/// Maximum scan interval in seconds
pub const MAX_SCAN_INTERVAL: u64 = 3600;

/// Maximum in-flight ICMP echo requests during the ping sweep
pub const MAX_CONCURRENT_PINGS: usize = 50;

/// Timeout for each single-packet ICMP echo
pub const PING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Maximum hosts pinged by the ping sweep (prevents sweeping huge subnets)
pub const MAX_SCAN_HOSTS: usize = 1024;

/// Prefix length assumed when `PRESENCE_SUBNET` is a bare address
pub const DEFAULT_PREFIX_LEN: u8 = 24;

// ====== SNMP Configuration ======

/// SNMP community string for v2c
pub const SNMP_COMMUNITY: &str = "public";

/// SNMP per-request timeout
pub const SNMP_TIMEOUT: Duration = Duration::from_secs(2);

/// SNMP port
pub const SNMP_PORT: u16 = 161;

/// ipNetToMediaPhysAddress (ARP table MAC column)
pub const SNMP_ARP_TABLE_OID: &[u64] = &[1, 3, 6, 1, 2, 1, 4, 22, 1, 2];

/// Upper bound on GETNEXT steps for a single walk
pub const SNMP_MAX_WALK_STEPS: usize = 4096;

// ====== Reconciliation Configuration ======

/// Minimum similarity score for identity linking
pub const CORRELATION_THRESHOLD: f64 = 0.65;

/// Weight of an exact hostname-pattern match
pub const HOSTNAME_WEIGHT: f64 = 0.5;

/// Weight of any mDNS service-type overlap
pub const MDNS_WEIGHT: f64 = 0.3;

/// Weight of the connection-hour Jaccard overlap
pub const HOURS_WEIGHT: f64 = 0.2;

/// Days of network snapshots kept
pub const SNAPSHOT_RETENTION_DAYS: i64 = 7;

/// Write a snapshot every N passes (1 = every pass)
pub const SNAPSHOT_EVERY: u32 = 1;

/// Entries kept in a device's IP history
pub const IP_HISTORY_LIMIT: usize = 50;

/// Missed intervals before the monitor is considered stalled, and before a
/// non-authoritative absence counts as departure
pub const STALE_MULTIPLIER: u64 = 3;

// ====== Process Boundary Configuration ======

/// Capacity of the bounded batch channel
pub const CHANNEL_CAPACITY: usize = 16;

/// Receive timeout of the consumer loop in blocking mode
pub const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Sleep between polls of the consumer loop in short-poll mode
pub const SHORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period before the scanner process is killed
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match env_var(name).and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    match env_var(name).and_then(|v| v.parse::<usize>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u16(name: &str, default: u16, min: u16, max: u16) -> u16 {
    match env_var(name).and_then(|v| v.parse::<u16>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_i64(name: &str, default: i64, min: i64, max: i64) -> i64 {
    match env_var(name).and_then(|v| v.parse::<i64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_f64(name: &str, default: f64, min: f64, max: f64) -> f64 {
    match env_var(name).and_then(|v| v.parse::<f64>().ok()) {
        Some(v) if v.is_finite() => v.clamp(min, max),
        _ => default,
    }
}

fn env_parse_bool(name: &str, default: bool) -> bool {
    match env_var(name) {
        Some(value) => {
            let normalized = value.to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        }
        None => default,
    }
}

/// Parse a dotted OID string such as `1.3.6.1.2.1.4.22.1.2`.
pub fn parse_oid(raw: &str) -> Result<Vec<u64>> {
    let parts = raw
        .trim()
        .trim_start_matches('.')
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .with_context(|| format!("Invalid OID component '{}' in '{}'", part, raw))
        })
        .collect::<Result<Vec<u64>>>()?;

    if parts.len() < 2 {
        return Err(anyhow!("OID '{}' is too short", raw));
    }
    Ok(parts)
}

/// Parse a sweep subnet. A bare address takes `DEFAULT_PREFIX_LEN`; the
/// result is always normalized to its network address.
pub fn parse_subnet(raw: &str) -> Result<Ipv4Network> {
    let raw = raw.trim();
    let network = if raw.contains('/') {
        raw.parse::<Ipv4Network>()?
    } else {
        let ip = raw.parse::<Ipv4Addr>()?;
        Ipv4Network::new(ip, DEFAULT_PREFIX_LEN)?
    };
    Ok(Ipv4Network::new(network.network(), network.prefix())?)
}

/// Discovery technique used by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    /// SNMP walk of the gateway's ARP table
    Snmp,
    /// Optional ping sweep followed by a read of the OS ARP table
    Arp,
}

impl std::str::FromStr for CollectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snmp" => Ok(CollectorKind::Snmp),
            "arp" | "ping" => Ok(CollectorKind::Arp),
            other => Err(format!("Unknown collector: {}", other)),
        }
    }
}

impl std::fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorKind::Snmp => write!(f, "snmp"),
            CollectorKind::Arp => write!(f, "arp"),
        }
    }
}

/// How the consumer loop waits for batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Receive with a timeout
    Blocking,
    /// Non-blocking try-receive followed by a short sleep
    ShortPoll,
}

impl std::str::FromStr for PollMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" => Ok(PollMode::Blocking),
            "short-poll" | "short_poll" | "poll" => Ok(PollMode::ShortPoll),
            other => Err(format!("Unknown poll mode: {}", other)),
        }
    }
}

/// Where the scanner runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerIsolation {
    /// Separate OS process (this binary run as `scan-worker`)
    Process,
    /// Tokio task inside the current process
    Task,
}

impl std::str::FromStr for ScannerIsolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(ScannerIsolation::Process),
            "task" => Ok(ScannerIsolation::Task),
            other => Err(format!("Unknown isolation mode: {}", other)),
        }
    }
}

/// Weights of the fingerprint similarity features
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationWeights {
    pub hostname: f64,
    pub mdns: f64,
    pub hours: f64,
}

impl Default for CorrelationWeights {
    fn default() -> Self {
        Self {
            hostname: HOSTNAME_WEIGHT,
            mdns: MDNS_WEIGHT,
            hours: HOURS_WEIGHT,
        }
    }
}

/// Settings consumed by the scanner (both isolation modes)
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub target_ip: Ipv4Addr,
    pub subnet: Option<Ipv4Network>,
    pub snmp_community: String,
    pub snmp_port: u16,
    pub snmp_timeout: Duration,
    pub snmp_arp_oid: Vec<u64>,
    /// Router hostname column indexed like the ARP table (`<ifIndex>.<ip>`).
    /// Vendor-specific, so nothing is walked unless configured.
    pub snmp_hostname_oid: Option<Vec<u64>>,
    pub collectors: Vec<CollectorKind>,
    pub ping_sweep: bool,
    pub mdns_enabled: bool,
    pub interval_secs: u64,
}

impl ScannerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Settings consumed by the reconciler
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub correlation_threshold: f64,
    pub weights: CorrelationWeights,
    pub snapshot_retention_days: i64,
    pub snapshot_every: u32,
    pub authoritative: bool,
    pub interval_secs: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            correlation_threshold: CORRELATION_THRESHOLD,
            weights: CorrelationWeights::default(),
            snapshot_retention_days: SNAPSHOT_RETENTION_DAYS,
            snapshot_every: SNAPSHOT_EVERY,
            authoritative: true,
            interval_secs: DEFAULT_SCAN_INTERVAL,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub scanner: ScannerSettings,
    pub reconcile: ReconcileSettings,
    pub channel_capacity: usize,
    pub poll_mode: PollMode,
    pub isolation: ScannerIsolation,
    pub shutdown_grace: Duration,
    pub db_path: PathBuf,
}

impl PresenceConfig {
    /// Build configuration from `PRESENCE_*` environment variables.
    ///
    /// Malformed addresses, subnets and OIDs are errors; numeric values are
    /// clamped; unknown enum values fall back to defaults with a warning.
    pub fn from_env() -> Result<Self> {
        let target_ip = match env_var("PRESENCE_TARGET_IP") {
            Some(raw) => raw
                .parse::<Ipv4Addr>()
                .with_context(|| format!("Invalid PRESENCE_TARGET_IP '{}'", raw))?,
            None => DEFAULT_TARGET_IP,
        };

        let subnet = match env_var("PRESENCE_SUBNET") {
            Some(raw) => Some(
                parse_subnet(&raw).with_context(|| format!("Invalid PRESENCE_SUBNET '{}'", raw))?,
            ),
            None => None,
        };

        let snmp_arp_oid = match env_var("PRESENCE_SNMP_ARP_OID") {
            Some(raw) => parse_oid(&raw).context("Invalid PRESENCE_SNMP_ARP_OID")?,
            None => SNMP_ARP_TABLE_OID.to_vec(),
        };

        let snmp_hostname_oid = match env_var("PRESENCE_SNMP_HOSTNAME_OID") {
            Some(raw) => Some(parse_oid(&raw).context("Invalid PRESENCE_SNMP_HOSTNAME_OID")?),
            None => None,
        };

        let interval_secs = scan_interval_secs();

        let scanner = ScannerSettings {
            target_ip,
            subnet,
            snmp_community: snmp_community(),
            snmp_port: snmp_port(),
            snmp_timeout: snmp_timeout(),
            snmp_arp_oid,
            snmp_hostname_oid,
            collectors: collectors(),
            ping_sweep: env_parse_bool("PRESENCE_PING_SWEEP", true),
            mdns_enabled: env_parse_bool("PRESENCE_MDNS_ENABLED", true),
            interval_secs,
        };

        let reconcile = ReconcileSettings {
            correlation_threshold: env_parse_f64(
                "PRESENCE_CORRELATION_THRESHOLD",
                CORRELATION_THRESHOLD,
                0.0,
                1.0,
            ),
            weights: CorrelationWeights {
                hostname: env_parse_f64("PRESENCE_WEIGHT_HOSTNAME", HOSTNAME_WEIGHT, 0.0, 1.0),
                mdns: env_parse_f64("PRESENCE_WEIGHT_MDNS", MDNS_WEIGHT, 0.0, 1.0),
                hours: env_parse_f64("PRESENCE_WEIGHT_HOURS", HOURS_WEIGHT, 0.0, 1.0),
            },
            snapshot_retention_days: env_parse_i64(
                "PRESENCE_SNAPSHOT_RETENTION_DAYS",
                SNAPSHOT_RETENTION_DAYS,
                1,
                3650,
            ),
            snapshot_every: env_parse_u64("PRESENCE_SNAPSHOT_EVERY", SNAPSHOT_EVERY as u64, 1, 1000)
                as u32,
            authoritative: env_parse_bool("PRESENCE_AUTHORITATIVE", true),
            interval_secs,
        };

        let poll_mode = env_var("PRESENCE_POLL_MODE")
            .and_then(|raw| match raw.parse::<PollMode>() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    tracing::warn!("{}; using blocking poll mode", e);
                    None
                }
            })
            .unwrap_or(PollMode::Blocking);

        let isolation = env_var("PRESENCE_ISOLATION")
            .and_then(|raw| match raw.parse::<ScannerIsolation>() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    tracing::warn!("{}; using process isolation", e);
                    None
                }
            })
            .unwrap_or(ScannerIsolation::Process);

        Ok(Self {
            scanner,
            reconcile,
            channel_capacity: env_parse_usize("PRESENCE_CHANNEL_CAPACITY", CHANNEL_CAPACITY, 1, 1024),
            poll_mode,
            isolation,
            shutdown_grace: Duration::from_millis(env_parse_u64(
                "PRESENCE_SHUTDOWN_GRACE_MS",
                SHUTDOWN_GRACE.as_millis() as u64,
                100,
                30_000,
            )),
            db_path: env_var("PRESENCE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(crate::database::Database::default_path),
        })
    }
}

/// How long a scan or snapshot may be missing before it counts as stale.
///
/// Saturates instead of overflowing for very large intervals.
pub fn stale_window(interval_secs: u64) -> chrono::Duration {
    let secs = interval_secs.saturating_mul(STALE_MULTIPLIER);
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

/// Runtime-tunable scan interval.
/// Env: `PRESENCE_SCAN_INTERVAL`
pub fn scan_interval_secs() -> u64 {
    env_parse_u64(
        "PRESENCE_SCAN_INTERVAL",
        DEFAULT_SCAN_INTERVAL,
        MIN_SCAN_INTERVAL,
        MAX_SCAN_INTERVAL,
    )
}

/// Runtime-tunable max concurrent ping sweep requests.
/// Env: `PRESENCE_MAX_CONCURRENT_PINGS`
pub fn max_concurrent_pings() -> usize {
    env_parse_usize("PRESENCE_MAX_CONCURRENT_PINGS", MAX_CONCURRENT_PINGS, 1, 512)
}

/// Runtime-tunable ICMP timeout.
/// Env: `PRESENCE_PING_TIMEOUT_MS`
pub fn ping_timeout() -> Duration {
    Duration::from_millis(env_parse_u64(
        "PRESENCE_PING_TIMEOUT_MS",
        PING_TIMEOUT.as_millis() as u64,
        50,
        10_000,
    ))
}

/// Runtime-tunable host cap for the ping sweep.
/// Env: `PRESENCE_MAX_SCAN_HOSTS`
pub fn max_scan_hosts() -> usize {
    env_parse_usize("PRESENCE_MAX_SCAN_HOSTS", MAX_SCAN_HOSTS, 8, 65_536)
}

/// Runtime-tunable SNMP community.
/// Env: `PRESENCE_SNMP_COMMUNITY`
pub fn snmp_community() -> String {
    env_var("PRESENCE_SNMP_COMMUNITY").unwrap_or_else(|| SNMP_COMMUNITY.to_string())
}

/// Runtime-tunable SNMP timeout.
/// Env: `PRESENCE_SNMP_TIMEOUT_MS`
pub fn snmp_timeout() -> Duration {
    Duration::from_millis(env_parse_u64(
        "PRESENCE_SNMP_TIMEOUT_MS",
        SNMP_TIMEOUT.as_millis() as u64,
        100,
        10_000,
    ))
}

/// Runtime-tunable SNMP port.
/// Env: `PRESENCE_SNMP_PORT`
pub fn snmp_port() -> u16 {
    env_parse_u16("PRESENCE_SNMP_PORT", SNMP_PORT, 1, u16::MAX)
}

/// Runtime-tunable collector list.
/// Env: `PRESENCE_COLLECTORS` (comma-separated, e.g. `snmp,arp`)
pub fn collectors() -> Vec<CollectorKind> {
    if let Some(raw) = env_var("PRESENCE_COLLECTORS") {
        let mut kinds: Vec<CollectorKind> = Vec::new();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            match part.parse::<CollectorKind>() {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }
        if !kinds.is_empty() {
            return kinds;
        }
    }
    vec![CollectorKind::Snmp]
}
