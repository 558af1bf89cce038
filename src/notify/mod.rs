//! Notification system for host transition events
//!
//! Classified transitions flow from the detector into the
//! [`NotificationDispatcher`], which deduplicates them, applies per-channel
//! rate limits, and delivers them to every enabled channel independently.
//! Delivery is fire-and-forget: a channel failure is reported as a boolean
//! and never retried.

pub mod channels;
pub mod dispatcher;

use std::net::IpAddr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::EventExtras;

pub use channels::{Channel, ChannelError, ChannelResult};
pub use dispatcher::{DispatchPolicy, NotificationDispatcher};

/// Kind of host transition being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A never-before-seen address probed reachable
    NewHost,
    /// A previously-up host probed unreachable
    HostGone,
    /// The link-layer identity behind an address changed
    LinkChanged,
    /// A client issued an unusually high number of DNS queries
    DnsBurst,
}

impl EventKind {
    /// Wire/storage name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewHost => "new_host",
            Self::HostGone => "host_gone",
            Self::LinkChanged => "ip_mac_change",
            Self::DnsBurst => "dns_burst",
        }
    }

    /// Human title used for ntfy message subjects
    pub fn title(&self) -> &'static str {
        match self {
            Self::NewHost => "New Host",
            Self::HostGone => "Host Gone",
            Self::LinkChanged => "Ip Mac Change",
            Self::DnsBurst => "Dns Burst",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified change in a host's presence or identity.
///
/// Ephemeral: consumed by the dispatcher immediately, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub kind: EventKind,
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    /// Operator-assigned label from the device profile
    pub label: Option<String>,
    pub is_trusted: bool,
    pub tags: Vec<String>,
    /// Kind-specific context (e.g. old_mac/new_mac for link changes)
    #[serde(default)]
    pub extras: EventExtras,
    pub occurred_ts: i64,
}

impl TransitionEvent {
    pub fn new(kind: EventKind, ip: IpAddr) -> Self {
        Self {
            kind,
            ip,
            mac: None,
            hostname: None,
            vendor: None,
            label: None,
            is_trusted: false,
            tags: Vec::new(),
            extras: EventExtras::new(),
            occurred_ts: Utc::now().timestamp(),
        }
    }

    pub fn with_mac(mut self, mac: Option<String>) -> Self {
        self.mac = mac;
        self
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    pub fn with_vendor(mut self, vendor: Option<String>) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Attach operator metadata from a device profile
    pub fn with_profile(mut self, profile: Option<&crate::models::DeviceProfile>) -> Self {
        if let Some(p) = profile {
            self.label = p.label.clone();
            self.is_trusted = p.is_safe;
            self.tags = p
                .tags
                .as_deref()
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        self
    }

    /// Build the JSON payload delivered over webhook channels
    pub fn payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "event_type": self.kind.as_str(),
            "ts": self.occurred_ts,
            "ip": self.ip.to_string(),
            "mac": self.mac,
            "hostname": self.hostname,
            "vendor": self.vendor,
            "label": self.label,
            "is_safe": self.is_trusted,
            "tags": self.tags,
        });
        if let Some(obj) = payload.as_object_mut() {
            for (k, v) in &self.extras {
                obj.insert(k.clone(), v.clone());
            }
        }
        payload
    }

    /// Short plain-text form used by the ntfy channel
    pub fn summary(&self) -> String {
        let mut message = format!("IP: {}", self.ip);
        if let Some(hostname) = &self.hostname {
            message.push_str(&format!(" ({hostname})"));
        }
        if let Some(label) = &self.label {
            message.push_str(&format!(" - {label}"));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceProfile;

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::NewHost.as_str(), "new_host");
        assert_eq!(EventKind::LinkChanged.as_str(), "ip_mac_change");
        assert_eq!(EventKind::DnsBurst.to_string(), "dns_burst");
    }

    #[test]
    fn test_payload_includes_extras() {
        let event = TransitionEvent::new(EventKind::LinkChanged, "10.0.0.5".parse().unwrap())
            .with_mac(Some("aa:bb:cc:dd:ee:02".into()))
            .with_extra("old_mac", serde_json::json!("aa:bb:cc:dd:ee:01"))
            .with_extra("new_mac", serde_json::json!("aa:bb:cc:dd:ee:02"));

        let payload = event.payload();
        assert_eq!(payload["event_type"], "ip_mac_change");
        assert_eq!(payload["ip"], "10.0.0.5");
        assert_eq!(payload["old_mac"], "aa:bb:cc:dd:ee:01");
        assert_eq!(payload["new_mac"], "aa:bb:cc:dd:ee:02");
    }

    #[test]
    fn test_profile_attachment() {
        let profile = DeviceProfile {
            label: Some("thermostat".into()),
            is_safe: true,
            tags: Some("iot, hvac".into()),
        };
        let event = TransitionEvent::new(EventKind::NewHost, "10.0.0.8".parse().unwrap())
            .with_profile(Some(&profile));

        assert_eq!(event.label.as_deref(), Some("thermostat"));
        assert!(event.is_trusted);
        assert_eq!(event.tags, vec!["iot", "hvac"]);
    }

    #[test]
    fn test_summary_format() {
        let event = TransitionEvent::new(EventKind::HostGone, "10.0.0.3".parse().unwrap())
            .with_hostname(Some("nas.lan".into()));
        assert_eq!(event.summary(), "IP: 10.0.0.3 (nas.lan)");
    }
}
