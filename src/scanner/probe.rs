//! Concurrent host probing
//!
//! Probes a target set with bounded parallelism. Each probe runs the system
//! `ping` with its own timeout, wrapped in a supervisory timeout so that a
//! stuck probe is forcibly reported as down instead of stalling the batch.
//! The batch always yields exactly one result per input target.

use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::Regex;
use tokio::process::Command;

use crate::config::{Settings, MAX_WORKERS_CAP};
use crate::models::{HostStatus, ProbeResult};

use super::neighbor::NeighborTable;

/// Grace added on top of the per-probe timeout before a unit of work is
/// forcibly reported as unreachable
const SUPERVISORY_MARGIN: Duration = Duration::from_secs(2);

/// Bound on a single reverse-DNS lookup
const RDNS_TIMEOUT: Duration = Duration::from_millis(500);

fn rtt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // iputils prints "time=1.23 ms"; sub-millisecond probes print "time<1 ms"
    RE.get_or_init(|| Regex::new(r"time[=<](\d+\.?\d*)\s*ms").unwrap())
}

/// Probes a set of addresses concurrently with bounded parallelism
pub struct HostProber {
    ping_timeout: Duration,
    ping_count: u32,
    max_workers: usize,
    reverse_dns: bool,
}

impl HostProber {
    pub fn new(ping_timeout: Duration, ping_count: u32, max_workers: usize, reverse_dns: bool) -> Self {
        Self {
            ping_timeout,
            ping_count: ping_count.max(1),
            max_workers: max_workers.clamp(1, MAX_WORKERS_CAP),
            reverse_dns,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.ping_timeout(),
            settings.ping_count,
            settings.effective_workers(),
            settings.reverse_dns,
        )
    }

    /// Probe every target, returning one result per input address.
    ///
    /// The neighbor table is sampled once before the batch starts; targets
    /// absent from the snapshot simply carry no link address. Result order
    /// follows completion, not input order.
    pub async fn scan(
        &self,
        targets: &[IpAddr],
        neighbors: &dyn NeighborTable,
    ) -> Vec<ProbeResult> {
        if targets.is_empty() {
            return Vec::new();
        }

        let mac_mapping = neighbors.snapshot().await;
        let supervisory = self.ping_timeout + SUPERVISORY_MARGIN;

        stream::iter(targets.iter().copied())
            .map(|ip| {
                let mac = mac_mapping.get(&ip).cloned();
                async move {
                    match tokio::time::timeout(supervisory, self.probe_one(ip, mac)).await {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(%ip, "probe exceeded supervisory timeout, forcing down");
                            ProbeResult::down(ip)
                        }
                    }
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }

    /// Probe a single target; never fails, degrading to a down result
    async fn probe_one(&self, ip: IpAddr, mac: Option<String>) -> ProbeResult {
        let (is_up, rtt_ms) = self.ping(ip).await;

        let hostname = if is_up && self.reverse_dns {
            reverse_lookup(ip).await
        } else {
            None
        };

        ProbeResult {
            ip,
            status: if is_up { HostStatus::Up } else { HostStatus::Down },
            rtt_ms,
            mac,
            hostname,
        }
    }

    /// Run the system ping once, reporting reachability and parsed RTT
    async fn ping(&self, ip: IpAddr) -> (bool, Option<u32>) {
        let timeout_secs = self.ping_timeout.as_secs().max(1);

        let output = Command::new("ping")
            .arg("-c")
            .arg(self.ping_count.to_string())
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg(ip.to_string())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) => {
                let is_up = out.status.success();
                let rtt_ms = if is_up {
                    parse_rtt(&String::from_utf8_lossy(&out.stdout))
                } else {
                    None
                };
                (is_up, rtt_ms)
            }
            Err(e) => {
                tracing::debug!(%ip, error = %e, "ping invocation failed");
                (false, None)
            }
        }
    }
}

/// Extract the first RTT value from ping output, best effort
fn parse_rtt(stdout: &str) -> Option<u32> {
    rtt_regex()
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|ms| ms as u32)
}

/// Reverse-DNS lookup for a reachable target, bounded and best effort.
///
/// The blocking resolver call runs on the blocking pool; a timeout or a
/// result identical to the textual address both count as "no name".
async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip).ok());

    match tokio::time::timeout(RDNS_TIMEOUT, lookup).await {
        Ok(Ok(Some(name))) if name != ip.to_string() => Some(name),
        Ok(_) => None,
        Err(_) => {
            tracing::debug!(%ip, "reverse DNS lookup timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::neighbor::StaticNeighborTable;
    use std::collections::HashMap;

    #[test]
    fn test_parse_rtt_variants() {
        assert_eq!(
            parse_rtt("64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=1.23 ms"),
            Some(1)
        );
        assert_eq!(parse_rtt("... time=12.9ms"), Some(12));
        assert_eq!(parse_rtt("... time<1 ms"), Some(1));
        assert_eq!(parse_rtt("no rtt here"), None);
    }

    #[test]
    fn test_worker_cap_enforced() {
        let prober = HostProber::new(Duration::from_secs(1), 1, 9999, false);
        assert_eq!(prober.max_workers, MAX_WORKERS_CAP);

        let prober = HostProber::new(Duration::from_secs(1), 1, 0, false);
        assert_eq!(prober.max_workers, 1);
    }

    #[tokio::test]
    async fn test_empty_target_list() {
        let prober = HostProber::new(Duration::from_secs(1), 1, 4, false);
        let results = prober.scan(&[], &StaticNeighborTable::default()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_bijection_on_unreachable_targets() {
        // TEST-NET-1 addresses are guaranteed unroutable; every probe must
        // still produce a result.
        let targets: Vec<IpAddr> = (1..=5).map(|n| format!("192.0.2.{n}").parse().unwrap()).collect();
        let prober = HostProber::new(Duration::from_secs(1), 1, 3, false);

        let mut mapping = HashMap::new();
        mapping.insert(targets[0], "aa:bb:cc:dd:ee:01".to_string());
        let results = prober.scan(&targets, &StaticNeighborTable::new(mapping)).await;

        assert_eq!(results.len(), targets.len());
        let mut seen: Vec<IpAddr> = results.iter().map(|r| r.ip).collect();
        seen.sort();
        let mut expected = targets.clone();
        expected.sort();
        assert_eq!(seen, expected);

        // MAC enrichment comes from the snapshot even when the host is down
        let first = results.iter().find(|r| r.ip == targets[0]).unwrap();
        assert_eq!(first.mac.as_deref(), Some("aa:bb:cc:dd:ee:01"));
    }
}
