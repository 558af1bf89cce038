//! Transition classification and host-record merging
//!
//! Compares a fresh probe result against the previously stored record for
//! the same address and classifies the transition, if any. At most one
//! classification fires per address per scan; the priority order below is
//! load-bearing (a brand-new host with a MAC is `NewHost`, never
//! `LinkChanged`).

use crate::models::{HostRecord, ProbeResult};
use crate::notify::{EventKind, TransitionEvent};

/// Classify the transition between the stored record and a fresh result.
///
/// Priority order, first match wins:
/// 1. `NewHost`: never seen before and now reachable.
/// 2. `HostGone`: previously up, now unreachable.
/// 3. `LinkChanged`: link address present on both sides and different.
///
/// Everything else is silent: a host staying down, a reappearance (coming
/// back up with an existing record), and a link address appearing where
/// none was known before all produce no event.
pub fn classify(result: &ProbeResult, previous: Option<&HostRecord>) -> Option<TransitionEvent> {
    let base = |kind| {
        TransitionEvent::new(kind, result.ip)
            .with_mac(result.mac.clone())
            .with_hostname(result.hostname.clone())
    };

    let Some(previous) = previous else {
        return result.is_up().then(|| base(EventKind::NewHost));
    };

    if previous.last_status.is_up() && !result.is_up() {
        return Some(base(EventKind::HostGone));
    }

    if let (Some(old_mac), Some(new_mac)) = (previous.mac.as_deref(), result.mac.as_deref()) {
        if old_mac != new_mac {
            return Some(
                base(EventKind::LinkChanged)
                    .with_extra("old_mac", serde_json::json!(old_mac))
                    .with_extra("new_mac", serde_json::json!(new_mac)),
            );
        }
    }

    None
}

/// Merge a probe result into the host record for its address.
///
/// Coalesce-on-null for `mac`/`hostname`/`vendor`: a present new value
/// overwrites, an absent one preserves what was known. The presence fields
/// (`last_seen_ts`/`last_status`/`last_rtt_ms`) always take the new values;
/// `first_seen_ts` is preserved from the earliest observation.
pub fn merge(
    previous: Option<&HostRecord>,
    result: &ProbeResult,
    vendor: Option<String>,
    now_ts: i64,
) -> HostRecord {
    match previous {
        Some(prev) => HostRecord {
            ip: result.ip,
            mac: result.mac.clone().or_else(|| prev.mac.clone()),
            hostname: result.hostname.clone().or_else(|| prev.hostname.clone()),
            vendor: vendor.or_else(|| prev.vendor.clone()),
            first_seen_ts: prev.first_seen_ts,
            last_seen_ts: now_ts,
            last_status: result.status,
            last_rtt_ms: result.rtt_ms,
        },
        None => HostRecord {
            ip: result.ip,
            mac: result.mac.clone(),
            hostname: result.hostname.clone(),
            vendor,
            first_seen_ts: now_ts,
            last_seen_ts: now_ts,
            last_status: result.status,
            last_rtt_ms: result.rtt_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HostStatus;
    use std::net::IpAddr;

    fn up(ip: &str) -> ProbeResult {
        ProbeResult {
            ip: ip.parse().unwrap(),
            status: HostStatus::Up,
            rtt_ms: Some(2),
            mac: None,
            hostname: None,
        }
    }

    fn record(ip: &str, status: HostStatus, mac: Option<&str>) -> HostRecord {
        HostRecord {
            ip: ip.parse::<IpAddr>().unwrap(),
            mac: mac.map(String::from),
            hostname: None,
            vendor: None,
            first_seen_ts: 100,
            last_seen_ts: 100,
            last_status: status,
            last_rtt_ms: None,
        }
    }

    #[test]
    fn test_new_host_when_unknown_and_up() {
        let event = classify(&up("10.0.0.5"), None).unwrap();
        assert_eq!(event.kind, EventKind::NewHost);
    }

    #[test]
    fn test_unknown_and_down_is_silent() {
        let result = ProbeResult::down("10.0.0.5".parse().unwrap());
        assert!(classify(&result, None).is_none());
    }

    #[test]
    fn test_host_gone_when_up_becomes_down() {
        let prev = record("10.0.0.5", HostStatus::Up, None);
        let result = ProbeResult::down("10.0.0.5".parse().unwrap());
        let event = classify(&result, Some(&prev)).unwrap();
        assert_eq!(event.kind, EventKind::HostGone);
    }

    #[test]
    fn test_down_to_down_is_silent() {
        let prev = record("10.0.0.5", HostStatus::Down, None);
        let result = ProbeResult::down("10.0.0.5".parse().unwrap());
        assert!(classify(&result, Some(&prev)).is_none());
    }

    #[test]
    fn test_reappearance_is_silent() {
        let prev = record("10.0.0.5", HostStatus::Down, None);
        assert!(classify(&up("10.0.0.5"), Some(&prev)).is_none());
    }

    #[test]
    fn test_new_host_wins_over_link_change() {
        // No prior record: even with a MAC present this is NewHost
        let mut result = up("10.0.0.5");
        result.mac = Some("aa:bb:cc:dd:ee:ff".into());
        let event = classify(&result, None).unwrap();
        assert_eq!(event.kind, EventKind::NewHost);
    }

    #[test]
    fn test_host_gone_wins_over_link_change() {
        let prev = record("10.0.0.5", HostStatus::Up, Some("aa:aa:aa:aa:aa:aa"));
        let mut result = ProbeResult::down("10.0.0.5".parse().unwrap());
        result.mac = Some("bb:bb:bb:bb:bb:bb".into());
        let event = classify(&result, Some(&prev)).unwrap();
        assert_eq!(event.kind, EventKind::HostGone);
    }

    #[test]
    fn test_link_change_carries_old_and_new() {
        let prev = record("10.0.0.5", HostStatus::Up, Some("aa:aa:aa:aa:aa:aa"));
        let mut result = up("10.0.0.5");
        result.mac = Some("bb:bb:bb:bb:bb:bb".into());

        let event = classify(&result, Some(&prev)).unwrap();
        assert_eq!(event.kind, EventKind::LinkChanged);
        assert_eq!(event.extras["old_mac"], "aa:aa:aa:aa:aa:aa");
        assert_eq!(event.extras["new_mac"], "bb:bb:bb:bb:bb:bb");
    }

    #[test]
    fn test_link_appearing_after_absence_is_silent() {
        // Previous record never had a MAC; gaining one is not a change event
        let prev = record("10.0.0.5", HostStatus::Up, None);
        let mut result = up("10.0.0.5");
        result.mac = Some("bb:bb:bb:bb:bb:bb".into());
        assert!(classify(&result, Some(&prev)).is_none());
    }

    #[test]
    fn test_merge_coalesces() {
        let mut prev = record("10.0.0.5", HostStatus::Up, Some("aa:aa:aa:aa:aa:aa"));
        prev.hostname = Some("printer.lan".into());
        prev.vendor = Some("Acme".into());
        prev.last_rtt_ms = Some(3);

        let result = ProbeResult::down("10.0.0.5".parse().unwrap());
        let merged = merge(Some(&prev), &result, None, 500);

        assert_eq!(merged.mac.as_deref(), Some("aa:aa:aa:aa:aa:aa"));
        assert_eq!(merged.hostname.as_deref(), Some("printer.lan"));
        assert_eq!(merged.vendor.as_deref(), Some("Acme"));
        assert_eq!(merged.first_seen_ts, 100);
        assert_eq!(merged.last_seen_ts, 500);
        assert_eq!(merged.last_status, HostStatus::Down);
        assert_eq!(merged.last_rtt_ms, None);
    }

    #[test]
    fn test_merge_overwrites_with_present_values() {
        let prev = record("10.0.0.5", HostStatus::Down, Some("aa:aa:aa:aa:aa:aa"));
        let mut result = up("10.0.0.5");
        result.mac = Some("bb:bb:bb:bb:bb:bb".into());

        let merged = merge(Some(&prev), &result, Some("NewVendor".into()), 600);
        assert_eq!(merged.mac.as_deref(), Some("bb:bb:bb:bb:bb:bb"));
        assert_eq!(merged.vendor.as_deref(), Some("NewVendor"));
        assert_eq!(merged.last_rtt_ms, Some(2));
    }

    #[test]
    fn test_merge_initializes_first_seen() {
        let result = up("10.0.0.9");
        let merged = merge(None, &result, None, 700);
        assert_eq!(merged.first_seen_ts, 700);
        assert_eq!(merged.last_seen_ts, 700);
    }
}
