//! DNS query-log ingestion from AdGuard Home
//!
//! Two mutually exclusive sources feed the `dns_events` table: polling the
//! AdGuard Home query-log API, or tailing its on-disk JSON-lines log.
//! Either way, entries missing a client address or domain are dropped and
//! a cursor records how far ingestion has progressed.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::models::DnsEvent;
use crate::notify::{EventKind, TransitionEvent};
use crate::store::Store;

const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Sliding window for the burst heuristic
pub const DNS_BURST_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Queries within the window above which a client counts as bursting
pub const DNS_BURST_THRESHOLD: usize = 100;

/// Polls the AdGuard Home query-log API
pub struct AdguardClient {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    max_fetch: usize,
    client: Client,
}

impl AdguardClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.adguard_base_url.is_empty() {
            return Err(Error::config("adguard_base_url is not set"));
        }

        let client = Client::builder().timeout(API_TIMEOUT).build()?;

        Ok(Self {
            base_url: settings.adguard_base_url.trim_end_matches('/').to_string(),
            username: settings.adguard_username.clone(),
            password: settings.adguard_password.clone(),
            max_fetch: settings.adguard_max_fetch,
            client,
        })
    }

    /// Fetch a page of query-log entries newer than the cursor
    pub async fn fetch(&self, last_seen_ts: Option<i64>) -> Result<Vec<DnsEvent>> {
        let url = format!("{}/control/querylog", self.base_url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("limit", self.max_fetch.to_string())]);
        if let Some(ts) = last_seen_ts {
            request = request.query(&[("older_than", ts.to_string())]);
        }
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::other(format!(
                "adguard querylog request failed: HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let now_ts = Utc::now().timestamp();

        let events = body
            .get("data")
            .and_then(|d| d.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| parse_querylog_entry(e, now_ts))
                    .collect()
            })
            .unwrap_or_default();

        Ok(events)
    }
}

/// Parse one query-log entry, shared by the API and file paths.
///
/// Returns `None` when the entry has no client address or no question
/// name; such rows carry nothing the burst heuristic can use.
fn parse_querylog_entry(entry: &serde_json::Value, now_ts: i64) -> Option<DnsEvent> {
    let client_ip = entry.get("client")?.as_str()?.to_string();
    if client_ip.is_empty() {
        return None;
    }

    let question = entry.get("question");
    let domain = question
        .and_then(|q| q.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    if domain.is_empty() {
        return None;
    }

    let ts = entry
        .get("time")
        .map(|t| parse_event_time(t, now_ts))
        .unwrap_or(now_ts);

    let qtype = question
        .and_then(|q| q.get("type"))
        .and_then(|t| t.as_str())
        .map(String::from);
    let status = entry
        .get("status")
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase());
    let upstream = entry
        .get("upstream")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .map(String::from);

    Some(DnsEvent {
        ts,
        client_ip,
        domain,
        qtype,
        status,
        upstream,
    })
}

/// Event timestamps come as epoch numbers from the file log and RFC 3339
/// strings from the API; anything else falls back to ingestion time
fn parse_event_time(value: &serde_json::Value, now_ts: i64) -> i64 {
    if let Some(n) = value.as_i64() {
        return n;
    }
    if let Some(s) = value.as_str() {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return dt.timestamp();
        }
    }
    now_ts
}

/// Read complete new lines from a JSON-lines query log starting at
/// `offset`, returning the parsed events and the advanced offset.
///
/// A missing file and a trailing partial line are both normal: the former
/// yields nothing, the latter stays unconsumed until the writer finishes
/// it.
pub async fn read_querylog_file(path: &Path, offset: u64) -> Result<(Vec<DnsEvent>, u64)> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Vec::new(), offset));
        }
        Err(e) => return Err(Error::Io(e)),
    };

    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).await?;

    let complete = match buf.rfind('\n') {
        Some(pos) => &buf[..=pos],
        None => return Ok((Vec::new(), offset)),
    };

    let now_ts = Utc::now().timestamp();
    let events = complete
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| parse_querylog_entry(&v, now_ts))
        })
        .collect();

    Ok((events, offset + complete.len() as u64))
}

/// Find clients whose query volume inside the window exceeds the burst
/// threshold, skipping devices the operator marked safe. One event per
/// bursting client.
pub fn detect_dns_bursts(store: &dyn Store) -> Result<Vec<TransitionEvent>> {
    let cutoff = Utc::now().timestamp() - DNS_BURST_WINDOW.as_secs() as i64;
    let mut events = Vec::new();

    for client in store.dns_clients_since(cutoff)? {
        let count = store.count_dns_events_since(&client, cutoff)?;
        if count <= DNS_BURST_THRESHOLD {
            continue;
        }

        let Ok(ip) = client.parse::<IpAddr>() else {
            tracing::debug!(client = %client, "unparseable client address, skipping burst check");
            continue;
        };

        let profile = store.get_device_profile(None, ip)?;
        if profile.as_ref().is_some_and(|p| p.is_safe) {
            continue;
        }

        events.push(
            TransitionEvent::new(EventKind::DnsBurst, ip)
                .with_profile(profile.as_ref())
                .with_extra("query_count", serde_json::json!(count))
                .with_extra(
                    "window_minutes",
                    serde_json::json!(DNS_BURST_WINDOW.as_secs() / 60),
                ),
        );
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn entry(client: &str, domain: &str) -> serde_json::Value {
        serde_json::json!({
            "time": 1700000000,
            "client": client,
            "question": {"name": domain, "type": "A"},
            "status": "NOERROR",
            "upstream": "9.9.9.9:53",
        })
    }

    #[test]
    fn test_parse_entry_complete() {
        let event = parse_querylog_entry(&entry("10.0.0.7", "example.com"), 0).unwrap();
        assert_eq!(event.ts, 1700000000);
        assert_eq!(event.client_ip, "10.0.0.7");
        assert_eq!(event.domain, "example.com");
        assert_eq!(event.qtype.as_deref(), Some("A"));
        assert_eq!(event.status.as_deref(), Some("noerror"));
        assert_eq!(event.upstream.as_deref(), Some("9.9.9.9:53"));
    }

    #[test]
    fn test_parse_entry_drops_incomplete() {
        assert!(parse_querylog_entry(&entry("", "example.com"), 0).is_none());
        assert!(parse_querylog_entry(&entry("10.0.0.7", ""), 0).is_none());
        assert!(parse_querylog_entry(&serde_json::json!({"time": 1}), 0).is_none());
    }

    #[test]
    fn test_parse_rfc3339_time() {
        let mut e = entry("10.0.0.7", "example.com");
        e["time"] = serde_json::json!("2024-01-01T12:00:00Z");
        let event = parse_querylog_entry(&e, 0).unwrap();
        assert_eq!(event.ts, 1704110400);
    }

    #[test]
    fn test_parse_bad_time_falls_back() {
        let mut e = entry("10.0.0.7", "example.com");
        e["time"] = serde_json::json!("yesterday-ish");
        let event = parse_querylog_entry(&e, 42).unwrap();
        assert_eq!(event.ts, 42);
    }

    #[tokio::test]
    async fn test_read_querylog_missing_file() {
        let (events, offset) =
            read_querylog_file(Path::new("/nonexistent/querylog.json"), 17).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(offset, 17);
    }

    #[tokio::test]
    async fn test_read_querylog_advances_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("querylog.json");

        let line1 = serde_json::to_string(&entry("10.0.0.7", "a.example")).unwrap();
        let line2 = serde_json::to_string(&entry("10.0.0.8", "b.example")).unwrap();
        tokio::fs::write(&path, format!("{line1}\n{line2}\n")).await.unwrap();

        let (events, offset) = read_querylog_file(&path, 0).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(offset, (line1.len() + line2.len() + 2) as u64);

        // Nothing new: offset stays put
        let (events, offset2) = read_querylog_file(&path, offset).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(offset2, offset);
    }

    #[tokio::test]
    async fn test_read_querylog_holds_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("querylog.json");

        let line1 = serde_json::to_string(&entry("10.0.0.7", "a.example")).unwrap();
        tokio::fs::write(&path, format!("{line1}\n{{\"client\": \"10.0")).await.unwrap();

        let (events, offset) = read_querylog_file(&path, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(offset, (line1.len() + 1) as u64);
    }

    #[tokio::test]
    async fn test_read_querylog_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("querylog.json");

        let good = serde_json::to_string(&entry("10.0.0.7", "a.example")).unwrap();
        tokio::fs::write(&path, format!("not json at all\n{good}\n")).await.unwrap();

        let (events, _) = read_querylog_file(&path, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].client_ip, "10.0.0.7");
    }

    #[test]
    fn test_detect_dns_bursts() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now().timestamp();

        // Busy client over the threshold, quiet client under it
        for i in 0..(DNS_BURST_THRESHOLD + 5) {
            store
                .insert_dns_event(&DnsEvent {
                    ts: now - 10,
                    client_ip: "10.0.0.9".into(),
                    domain: format!("d{i}.example"),
                    qtype: None,
                    status: None,
                    upstream: None,
                })
                .unwrap();
        }
        store
            .insert_dns_event(&DnsEvent {
                ts: now - 10,
                client_ip: "10.0.0.2".into(),
                domain: "quiet.example".into(),
                qtype: None,
                status: None,
                upstream: None,
            })
            .unwrap();

        let events = detect_dns_bursts(&store).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::DnsBurst);
        assert_eq!(events[0].ip, "10.0.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(events[0].extras["query_count"], DNS_BURST_THRESHOLD + 5);
    }

    #[test]
    fn test_detect_dns_bursts_skips_safe_devices() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now().timestamp();

        for i in 0..(DNS_BURST_THRESHOLD + 1) {
            store
                .insert_dns_event(&DnsEvent {
                    ts: now - 10,
                    client_ip: "10.0.0.9".into(),
                    domain: format!("d{i}.example"),
                    qtype: None,
                    status: None,
                    upstream: None,
                })
                .unwrap();
        }
        store
            .upsert_device_profile(
                None,
                Some("10.0.0.9".parse().unwrap()),
                &crate::models::DeviceProfile {
                    label: Some("backup server".into()),
                    is_safe: true,
                    tags: None,
                },
            )
            .unwrap();

        assert!(detect_dns_bursts(&store).unwrap().is_empty());
    }
}
