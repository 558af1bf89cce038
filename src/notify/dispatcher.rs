//! Notification dispatch with dedup and per-channel rate limiting
//!
//! The dispatcher sits between the detector and the channels. It drops
//! events the operator has not opted into, suppresses repeats of the same
//! (kind, address) pair inside a sliding window, and enforces a minimum
//! quiet period per channel. State is process-local and resets on restart.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::notify::channels::{
    ha_webhook::HaWebhookChannel, ntfy::NtfyChannel, webhook::WebhookChannel,
};
use crate::notify::{Channel, EventKind, TransitionEvent};

/// Timing knobs for suppression
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    /// Sliding window inside which a repeated (kind, ip) event is dropped
    pub dedup_window: Duration,
    /// Minimum gap between two deliveries on the same channel
    pub min_channel_interval: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(600),
            min_channel_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of one delivery attempt on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: &'static str,
    pub delivered: bool,
}

struct DedupEntry {
    key: (EventKind, IpAddr),
    seen_at: Instant,
}

#[derive(Default)]
struct DispatchState {
    recent: VecDeque<DedupEntry>,
    last_sent: HashMap<&'static str, Instant>,
}

pub struct NotificationDispatcher {
    policy: DispatchPolicy,
    state: Mutex<DispatchState>,
}

impl NotificationDispatcher {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Gate an event on the current settings and fan it out to every
    /// enabled channel. Channel failures are reported, never propagated.
    pub async fn dispatch(&self, event: &TransitionEvent, settings: &Settings) -> Vec<Delivery> {
        if !settings.notify_enabled || !kind_enabled(event.kind, settings) {
            tracing::debug!(kind = %event.kind, ip = %event.ip, "notification disabled, dropping");
            return Vec::new();
        }

        let channels = build_channels(settings);
        if channels.is_empty() {
            tracing::debug!(kind = %event.kind, ip = %event.ip, "no channels enabled");
            return Vec::new();
        }

        self.deliver(event, &channels).await
    }

    /// Apply dedup and per-channel spacing, then send to each channel in
    /// turn. Exposed separately so callers can supply their own channels.
    pub async fn deliver(
        &self,
        event: &TransitionEvent,
        channels: &[Box<dyn Channel>],
    ) -> Vec<Delivery> {
        let now = Instant::now();
        let key = (event.kind, event.ip);

        let ready: Vec<bool> = {
            let mut state = self.state.lock().unwrap();

            if !self.admit(&mut state, key, now) {
                tracing::debug!(kind = %event.kind, ip = %event.ip, "duplicate within window, suppressed");
                return Vec::new();
            }

            channels
                .iter()
                .map(|ch| self.channel_ready(&mut state, ch.name(), now))
                .collect()
        };

        let mut report = Vec::with_capacity(channels.len());
        for (channel, is_ready) in channels.iter().zip(ready) {
            if !is_ready {
                tracing::debug!(channel = channel.name(), "channel in quiet period, skipping");
                report.push(Delivery {
                    channel: channel.name(),
                    delivered: false,
                });
                continue;
            }

            let delivered = match channel.send(event).await {
                Ok(()) => {
                    tracing::info!(
                        channel = channel.name(),
                        kind = %event.kind,
                        ip = %event.ip,
                        "notification delivered"
                    );
                    true
                }
                Err(e) => {
                    tracing::warn!(channel = channel.name(), error = %e, "notification failed");
                    false
                }
            };
            report.push(Delivery {
                channel: channel.name(),
                delivered,
            });
        }
        report
    }

    /// Record the event in the dedup window; false means a duplicate was
    /// already seen within it. Expired entries are evicted from the front.
    fn admit(&self, state: &mut DispatchState, key: (EventKind, IpAddr), now: Instant) -> bool {
        while let Some(front) = state.recent.front() {
            if now.duration_since(front.seen_at) > self.policy.dedup_window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        if state.recent.iter().any(|e| e.key == key) {
            return false;
        }

        state.recent.push_back(DedupEntry { key, seen_at: now });
        true
    }

    /// Check the per-channel quiet period, marking the channel as used when
    /// it is clear to send
    fn channel_ready(&self, state: &mut DispatchState, name: &'static str, now: Instant) -> bool {
        if let Some(last) = state.last_sent.get(name) {
            if now.duration_since(*last) < self.policy.min_channel_interval {
                return false;
            }
        }
        state.last_sent.insert(name, now);
        true
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DispatchPolicy::default())
    }
}

fn kind_enabled(kind: EventKind, settings: &Settings) -> bool {
    match kind {
        EventKind::NewHost => settings.notify_on_new_host,
        EventKind::HostGone => settings.notify_on_host_gone,
        EventKind::LinkChanged => settings.notify_on_link_change,
        EventKind::DnsBurst => settings.notify_on_dns_burst,
    }
}

/// Build the enabled channel set from current settings. A misconfigured
/// channel is logged and left out rather than blocking the others.
fn build_channels(settings: &Settings) -> Vec<Box<dyn Channel>> {
    let mut channels: Vec<Box<dyn Channel>> = Vec::new();

    if settings.webhook_enabled {
        match WebhookChannel::new(
            &settings.webhook_url,
            settings.webhook_secret.clone(),
            settings.webhook_timeout_seconds,
        ) {
            Ok(ch) => channels.push(Box::new(ch)),
            Err(e) => tracing::warn!(error = %e, "webhook channel misconfigured, skipping"),
        }
    }

    if settings.ha_webhook_enabled {
        match HaWebhookChannel::new(&settings.ha_webhook_url, settings.ha_webhook_timeout_seconds) {
            Ok(ch) => channels.push(Box::new(ch)),
            Err(e) => tracing::warn!(error = %e, "ha_webhook channel misconfigured, skipping"),
        }
    }

    if settings.ntfy_enabled {
        match NtfyChannel::from_settings(settings) {
            Ok(ch) => channels.push(Box::new(ch)),
            Err(e) => tracing::warn!(error = %e, "ntfy channel misconfigured, skipping"),
        }
    }

    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingChannel {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, _event: &TransitionEvent) -> crate::notify::ChannelResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(crate::notify::ChannelError::InvalidConfig("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn event(kind: EventKind, ip: &str) -> TransitionEvent {
        TransitionEvent::new(kind, ip.parse().unwrap())
    }

    fn recording(fail: bool) -> (Vec<Box<dyn Channel>>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let channels: Vec<Box<dyn Channel>> = vec![Box::new(RecordingChannel {
            calls: calls.clone(),
            fail,
        })];
        (channels, calls)
    }

    #[tokio::test]
    async fn test_duplicate_suppressed_within_window() {
        let dispatcher = NotificationDispatcher::default();
        let (channels, calls) = recording(false);
        let e = event(EventKind::NewHost, "10.0.0.5");

        let first = dispatcher.deliver(&e, &channels).await;
        assert_eq!(first.len(), 1);
        assert!(first[0].delivered);

        let second = dispatcher.deliver(&e, &channels).await;
        assert!(second.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_kind_same_ip_not_deduped() {
        let dispatcher = NotificationDispatcher::new(DispatchPolicy {
            dedup_window: Duration::from_secs(600),
            min_channel_interval: Duration::ZERO,
        });
        let (channels, calls) = recording(false);

        dispatcher
            .deliver(&event(EventKind::NewHost, "10.0.0.5"), &channels)
            .await;
        dispatcher
            .deliver(&event(EventKind::HostGone, "10.0.0.5"), &channels)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_channel_quiet_period() {
        let dispatcher = NotificationDispatcher::default();
        let (channels, calls) = recording(false);

        let first = dispatcher
            .deliver(&event(EventKind::NewHost, "10.0.0.5"), &channels)
            .await;
        assert!(first[0].delivered);

        // Different event key, same channel: inside the 60s quiet period
        let second = dispatcher
            .deliver(&event(EventKind::NewHost, "10.0.0.6"), &channels)
            .await;
        assert_eq!(second.len(), 1);
        assert!(!second[0].delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reported_not_propagated() {
        let dispatcher = NotificationDispatcher::default();
        let (channels, calls) = recording(true);

        let report = dispatcher
            .deliver(&event(EventKind::HostGone, "10.0.0.5"), &channels)
            .await;
        assert_eq!(report.len(), 1);
        assert!(!report[0].delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_respects_kind_flags() {
        let dispatcher = NotificationDispatcher::default();
        let mut settings = Settings::default();
        settings.notify_on_new_host = false;
        settings.webhook_enabled = true;
        settings.webhook_url = "https://hooks.example.com/x".into();

        let report = dispatcher
            .dispatch(&event(EventKind::NewHost, "10.0.0.5"), &settings)
            .await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_master_switch() {
        let dispatcher = NotificationDispatcher::default();
        let mut settings = Settings::default();
        settings.notify_enabled = false;
        settings.webhook_enabled = true;
        settings.webhook_url = "https://hooks.example.com/x".into();

        let report = dispatcher
            .dispatch(&event(EventKind::HostGone, "10.0.0.5"), &settings)
            .await;
        assert!(report.is_empty());
    }

    #[test]
    fn test_build_channels_skips_misconfigured() {
        let mut settings = Settings::default();
        settings.webhook_enabled = true;
        settings.webhook_url = String::new();
        settings.ntfy_enabled = true;
        settings.ntfy_topic = "lan-alerts".into();

        let channels = build_channels(&settings);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name(), "ntfy");
    }
}
