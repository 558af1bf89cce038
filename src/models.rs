//! Core data structures shared across the crate

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Reachability status of a host as of its most recent probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostStatus {
    Up,
    Down,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

impl std::str::FromStr for HostStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "up" => Self::Up,
            _ => Self::Down,
        })
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of probing a single target.
///
/// Produced exactly once per target per scan, even on timeout or failure:
/// a failed probe degrades to `status = Down` with all optional fields empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Target address
    pub ip: IpAddr,
    /// Reachability status
    pub status: HostStatus,
    /// Round-trip time in milliseconds, when parseable from the ping output
    pub rtt_ms: Option<u32>,
    /// Link-layer (MAC) address from the neighbor table snapshot
    pub mac: Option<String>,
    /// Reverse-DNS name (reachable targets only)
    pub hostname: Option<String>,
}

impl ProbeResult {
    /// A forced-down result for a target whose probe failed or timed out
    pub fn down(ip: IpAddr) -> Self {
        Self {
            ip,
            status: HostStatus::Down,
            rtt_ms: None,
            mac: None,
            hostname: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status.is_up()
    }
}

/// Summary of one completed scan tick. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: i64,
    pub started_ts: i64,
    pub finished_ts: i64,
    pub targets_count: usize,
    pub up_count: usize,
    pub down_count: usize,
}

/// Persistent per-host state, merged from successive probes.
///
/// Merge rule: `mac`/`hostname`/`vendor` coalesce on null (a present new
/// value overwrites, an absent one preserves the old value);
/// `last_seen_ts`/`last_status`/`last_rtt_ms` always track the newest probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
    pub last_status: HostStatus,
    pub last_rtt_ms: Option<u32>,
}

/// Operator-assigned metadata for a device, keyed by MAC (preferred) or IP
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub label: Option<String>,
    pub is_safe: bool,
    /// Comma-separated tag list as stored
    pub tags: Option<String>,
}

/// Dashboard-level aggregate derived from the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub up_count: usize,
    pub down_count: usize,
    pub total_hosts: usize,
    pub last_scan_ts: Option<i64>,
    /// Hosts last seen up but not observed within the missing threshold
    pub missing_count: usize,
}

/// One DNS query-log entry pulled from the external resolver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsEvent {
    pub ts: i64,
    pub client_ip: String,
    pub domain: String,
    pub qtype: Option<String>,
    pub status: Option<String>,
    pub upstream: Option<String>,
}

/// Cursor state for DNS-log ingestion; which field advances depends on the
/// configured ingestion mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsCursor {
    /// Timestamp of the newest ingested event (API pull mode)
    pub last_seen_ts: i64,
    /// Byte offset into the query-log file (file-tail mode)
    pub last_offset: u64,
}

/// Extra key/value context attached to a notification payload
pub type EventExtras = HashMap<String, serde_json::Value>;
