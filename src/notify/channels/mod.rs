//! Delivery channels for transition notifications
//!
//! Each channel is an independent HTTP sink. A failed delivery is an
//! error for that channel only; the dispatcher logs it and moves on.

pub mod ha_webhook;
pub mod ntfy;
pub mod webhook;

use async_trait::async_trait;

use crate::notify::TransitionEvent;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel delivery
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint responded with a non-success status
    #[error("unexpected response status: {0}")]
    Status(reqwest::StatusCode),

    /// Invalid channel configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A notification delivery sink.
///
/// Implementations must be cheap to construct; the dispatcher rebuilds the
/// channel set from current settings on every delivery.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable channel name used in logs and rate-limit bookkeeping
    fn name(&self) -> &'static str;

    /// Deliver one event. One attempt, no retries.
    async fn send(&self, event: &TransitionEvent) -> ChannelResult<()>;
}

/// Validate an endpoint URL at channel construction time
pub(crate) fn parse_endpoint(raw: &str) -> ChannelResult<url::Url> {
    if raw.is_empty() {
        return Err(ChannelError::InvalidConfig("URL cannot be empty".into()));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|e| ChannelError::InvalidConfig(format!("invalid URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ChannelError::InvalidConfig(format!(
            "unsupported URL scheme {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_accepts_http_and_https() {
        assert!(parse_endpoint("https://hooks.example.com/notify").is_ok());
        assert!(parse_endpoint("http://192.168.1.2:8123/api/webhook/x").is_ok());
    }

    #[test]
    fn test_parse_endpoint_rejects_bad_input() {
        assert!(parse_endpoint("").is_err());
        assert!(parse_endpoint("not a url").is_err());
        assert!(parse_endpoint("ftp://example.com/notify").is_err());
    }
}
