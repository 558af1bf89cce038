//! Home Assistant webhook channel
//!
//! Same JSON payload as the generic webhook, aimed at a Home Assistant
//! webhook trigger URL. Home Assistant acknowledges with either 200 or
//! 201 depending on version, so both count as delivered. No secret
//! header; the webhook id in the URL is the credential.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{parse_endpoint, Channel, ChannelError, ChannelResult};
use crate::notify::TransitionEvent;

pub struct HaWebhookChannel {
    url: url::Url,
    client: Client,
}

impl HaWebhookChannel {
    pub fn new(url: &str, timeout_secs: u64) -> ChannelResult<Self> {
        let url = parse_endpoint(url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(ChannelError::Http)?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl Channel for HaWebhookChannel {
    fn name(&self) -> &'static str {
        "ha_webhook"
    }

    async fn send(&self, event: &TransitionEvent) -> ChannelResult<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&event.payload())
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(ChannelError::Status(status)),
        }
    }
}
