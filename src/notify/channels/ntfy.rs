//! ntfy push channel
//!
//! Publishes a short plain-text message to `{base_url}/{topic}` with the
//! event title, priority, and tags carried in ntfy's request headers.
//! Supports anonymous, basic, and bearer-token authentication against
//! self-hosted servers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{parse_endpoint, Channel, ChannelError, ChannelResult};
use crate::config::{NtfyAuthMode, Settings};
use crate::notify::TransitionEvent;

const NTFY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct NtfyChannel {
    topic_url: url::Url,
    auth_mode: NtfyAuthMode,
    username: Option<String>,
    password: Option<String>,
    bearer_token: Option<String>,
    priority: u8,
    tags: Vec<String>,
    client: Client,
}

impl NtfyChannel {
    pub fn new(
        base_url: &str,
        topic: &str,
        auth_mode: NtfyAuthMode,
        username: Option<String>,
        password: Option<String>,
        bearer_token: Option<String>,
        priority: u8,
        tags: Vec<String>,
    ) -> ChannelResult<Self> {
        if topic.is_empty() {
            return Err(ChannelError::InvalidConfig("ntfy topic cannot be empty".into()));
        }
        // join() would drop a sub-path on proxied servers, so build textually
        let topic_url = parse_endpoint(&format!("{}/{topic}", base_url.trim_end_matches('/')))?;

        match auth_mode {
            NtfyAuthMode::Basic if username.is_none() => {
                return Err(ChannelError::InvalidConfig(
                    "basic auth requires ntfy_username".into(),
                ));
            }
            NtfyAuthMode::Bearer if bearer_token.is_none() => {
                return Err(ChannelError::InvalidConfig(
                    "bearer auth requires ntfy_bearer_token".into(),
                ));
            }
            _ => {}
        }

        let client = Client::builder()
            .timeout(NTFY_TIMEOUT)
            .build()
            .map_err(ChannelError::Http)?;

        Ok(Self {
            topic_url,
            auth_mode,
            username,
            password,
            bearer_token,
            priority: priority.clamp(1, 5),
            tags,
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> ChannelResult<Self> {
        Self::new(
            &settings.ntfy_base_url,
            &settings.ntfy_topic,
            settings.ntfy_auth_mode,
            settings.ntfy_username.clone(),
            settings.ntfy_password.clone(),
            settings.ntfy_bearer_token.clone(),
            settings.ntfy_priority,
            settings.ntfy_tags.clone(),
        )
    }
}

#[async_trait]
impl Channel for NtfyChannel {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    async fn send(&self, event: &TransitionEvent) -> ChannelResult<()> {
        let mut request = self
            .client
            .post(self.topic_url.clone())
            .header("Title", event.kind.title())
            .header("Priority", self.priority.to_string())
            .body(event.summary());

        if !self.tags.is_empty() {
            request = request.header("Tags", self.tags.join(","));
        }

        request = match self.auth_mode {
            NtfyAuthMode::None => request,
            NtfyAuthMode::Basic => request.basic_auth(
                self.username.as_deref().unwrap_or_default(),
                self.password.as_deref(),
            ),
            NtfyAuthMode::Bearer => {
                request.bearer_auth(self.bearer_token.as_deref().unwrap_or_default())
            }
        };

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(ChannelError::Status(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_topic() {
        let channel = NtfyChannel::new(
            "https://ntfy.sh",
            "",
            NtfyAuthMode::None,
            None,
            None,
            None,
            3,
            vec![],
        );
        assert!(channel.is_err());
    }

    #[test]
    fn test_auth_mode_requirements() {
        let basic_missing_user = NtfyChannel::new(
            "https://ntfy.example.com",
            "lan-alerts",
            NtfyAuthMode::Basic,
            None,
            None,
            None,
            3,
            vec![],
        );
        assert!(basic_missing_user.is_err());

        let bearer_missing_token = NtfyChannel::new(
            "https://ntfy.example.com",
            "lan-alerts",
            NtfyAuthMode::Bearer,
            None,
            None,
            None,
            3,
            vec![],
        );
        assert!(bearer_missing_token.is_err());

        let anonymous = NtfyChannel::new(
            "https://ntfy.sh",
            "lan-alerts",
            NtfyAuthMode::None,
            None,
            None,
            None,
            3,
            vec!["computer".into()],
        );
        assert!(anonymous.is_ok());
    }

    #[test]
    fn test_priority_clamped() {
        let channel = NtfyChannel::new(
            "https://ntfy.sh",
            "t",
            NtfyAuthMode::None,
            None,
            None,
            None,
            9,
            vec![],
        )
        .unwrap();
        assert_eq!(channel.priority, 5);
    }
}
