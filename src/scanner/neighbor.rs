//! Neighbor-table snapshot provider
//!
//! Supplies the address → link-address mapping sampled once per scan batch.
//! The system implementation shells out to `ip neigh show`; any failure
//! degrades to an empty map so probing proceeds without MAC enrichment.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// One-shot provider of the local neighbor-resolution table
#[async_trait]
pub trait NeighborTable: Send + Sync {
    /// Best-effort snapshot; empty on failure
    async fn snapshot(&self) -> HashMap<IpAddr, String>;
}

/// Reads the kernel neighbor table via `ip neigh show`
pub struct SystemNeighborTable {
    timeout: Duration,
}

impl SystemNeighborTable {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for SystemNeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NeighborTable for SystemNeighborTable {
    async fn snapshot(&self) -> HashMap<IpAddr, String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("ip").args(["neigh", "show"]).output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => {
                parse_neigh_output(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(Ok(out)) => {
                tracing::warn!(status = %out.status, "ip neigh show failed, probing without MACs");
                HashMap::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "could not run ip neigh, probing without MACs");
                HashMap::new()
            }
            Err(_) => {
                tracing::warn!("ip neigh timed out, probing without MACs");
                HashMap::new()
            }
        }
    }
}

/// Parse lines like `192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`
fn parse_neigh_output(stdout: &str) -> HashMap<IpAddr, String> {
    let mut mapping = HashMap::new();

    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(Ok(ip)) = parts.first().map(|p| p.parse::<IpAddr>()) else {
            continue;
        };
        for pair in parts.windows(2) {
            if pair[0] == "lladdr" {
                mapping.insert(ip, pair[1].to_string());
                break;
            }
        }
    }

    mapping
}

/// Fixed mapping, for tests and environments without a neighbor table
#[derive(Default)]
pub struct StaticNeighborTable {
    mapping: HashMap<IpAddr, String>,
}

impl StaticNeighborTable {
    pub fn new(mapping: HashMap<IpAddr, String>) -> Self {
        Self { mapping }
    }
}

#[async_trait]
impl NeighborTable for StaticNeighborTable {
    async fn snapshot(&self) -> HashMap<IpAddr, String> {
        self.mapping.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_neigh_output() {
        let stdout = "\
192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE
192.168.1.50 dev eth0  FAILED
fe80::1 dev eth0 lladdr 11:22:33:44:55:66 router STALE
garbage line
";
        let mapping = parse_neigh_output(stdout);
        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping.get(&"192.168.1.1".parse::<IpAddr>().unwrap()).map(String::as_str),
            Some("aa:bb:cc:dd:ee:ff")
        );
        assert_eq!(
            mapping.get(&"fe80::1".parse::<IpAddr>().unwrap()).map(String::as_str),
            Some("11:22:33:44:55:66")
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_neigh_output("").is_empty());
    }

    #[tokio::test]
    async fn test_static_table_snapshot() {
        let mut m = HashMap::new();
        m.insert("10.0.0.1".parse().unwrap(), "aa:bb:cc:00:00:01".to_string());
        let table = StaticNeighborTable::new(m);
        let snap = table.snapshot().await;
        assert_eq!(snap.len(), 1);
    }
}
