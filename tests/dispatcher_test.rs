//! End-to-end dispatch tests: settings gating, dedup, and channel fan-out
//! against a mock webhook receiver.

use pingwarden::config::Settings;
use pingwarden::notify::{EventKind, NotificationDispatcher, TransitionEvent};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn webhook_settings(url: &str) -> Settings {
    let mut settings = Settings::default();
    settings.webhook_enabled = true;
    settings.webhook_url = url.to_string();
    settings
}

#[tokio::test]
async fn test_dispatch_delivers_to_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::default();
    let event = TransitionEvent::new(EventKind::NewHost, "10.1.1.5".parse().unwrap());

    let report = dispatcher.dispatch(&event, &webhook_settings(&server.uri())).await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].channel, "webhook");
    assert!(report[0].delivered);
}

#[tokio::test]
async fn test_duplicate_event_hits_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::default();
    let settings = webhook_settings(&server.uri());
    let event = TransitionEvent::new(EventKind::HostGone, "10.1.1.5".parse().unwrap());

    let first = dispatcher.dispatch(&event, &settings).await;
    assert!(first[0].delivered);

    // Same (kind, ip) inside the dedup window: suppressed before any send
    let second = dispatcher.dispatch(&event, &settings).await;
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_failed_delivery_reported_as_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::default();
    let event = TransitionEvent::new(EventKind::NewHost, "10.1.1.6".parse().unwrap());

    let report = dispatcher.dispatch(&event, &webhook_settings(&server.uri())).await;
    assert_eq!(report.len(), 1);
    assert!(!report[0].delivered);
}

#[tokio::test]
async fn test_disabled_kind_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut settings = webhook_settings(&server.uri());
    settings.notify_on_link_change = false;

    let dispatcher = NotificationDispatcher::default();
    let event = TransitionEvent::new(EventKind::LinkChanged, "10.1.1.7".parse().unwrap());

    let report = dispatcher.dispatch(&event, &settings).await;
    assert!(report.is_empty());
}
