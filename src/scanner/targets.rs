//! Target-set resolution
//!
//! Expands a comma-separated target specification into a bounded,
//! deduplicated, sorted address list. Parsing is best-effort: a malformed
//! element is skipped without affecting the rest of the specification.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// Largest span an explicit `start-end` range may cover
const MAX_RANGE_SPAN: u128 = 256;

/// Resolve a target specification into a deterministic address list.
///
/// Each comma-separated element is one of:
/// - a CIDR block (`192.168.1.0/24`), expanded to its host addresses
///   excluding the network and broadcast addresses;
/// - an explicit range (`192.168.1.10-192.168.1.40`): both endpoints must
///   parse as addresses of the same family and span at most 256 addresses;
/// - a single address.
///
/// The merged set is sorted ascending and truncated to `target_cap`,
/// keeping the smallest addresses.
pub fn resolve_targets(spec: &str, target_cap: usize) -> Vec<IpAddr> {
    let mut addrs: BTreeSet<IpAddr> = BTreeSet::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.contains('/') {
            expand_cidr(part, &mut addrs);
        } else if part.contains('-') {
            expand_range(part, &mut addrs);
        } else if let Ok(ip) = part.parse::<IpAddr>() {
            addrs.insert(ip);
        } else {
            tracing::debug!(element = part, "skipping malformed target element");
        }
    }

    addrs.into_iter().take(target_cap).collect()
}

fn expand_cidr(part: &str, addrs: &mut BTreeSet<IpAddr>) {
    let network: IpNetwork = match part.parse() {
        Ok(n) => n,
        Err(_) => {
            tracing::debug!(element = part, "skipping malformed CIDR element");
            return;
        }
    };

    match network {
        IpNetwork::V4(net) => {
            let network_addr = net.network();
            let broadcast = net.broadcast();
            for ip in net.iter() {
                // /31 and /32 have no distinct network/broadcast addresses
                if net.prefix() < 31 && (ip == network_addr || ip == broadcast) {
                    continue;
                }
                addrs.insert(IpAddr::V4(ip));
            }
        }
        IpNetwork::V6(net) => {
            // Bound expansion the same way ranges are bounded; larger v6
            // networks are not scannable by exhaustive probing anyway.
            for ip in net.iter().take(MAX_RANGE_SPAN as usize) {
                addrs.insert(IpAddr::V6(ip));
            }
        }
    }
}

fn expand_range(part: &str, addrs: &mut BTreeSet<IpAddr>) {
    let Some((start_str, end_str)) = part.split_once('-') else {
        return;
    };
    let (Ok(start), Ok(end)) = (
        start_str.trim().parse::<IpAddr>(),
        end_str.trim().parse::<IpAddr>(),
    ) else {
        tracing::debug!(element = part, "skipping malformed range element");
        return;
    };

    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            let (s, e) = (u32::from(s), u32::from(e));
            if e >= s && u128::from(e - s) < MAX_RANGE_SPAN {
                for n in s..=e {
                    addrs.insert(IpAddr::V4(n.into()));
                }
            }
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => {
            let (s, e) = (u128::from(s), u128::from(e));
            if e >= s && e - s < MAX_RANGE_SPAN {
                for n in s..=e {
                    addrs.insert(IpAddr::V6(n.into()));
                }
            }
        }
        // Mixed-family ranges are invalid
        _ => {
            tracing::debug!(element = part, "skipping mixed-family range element");
        }
    }
}
