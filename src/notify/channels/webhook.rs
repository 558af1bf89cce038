//! Generic webhook channel
//!
//! POSTs the event payload as JSON to an operator-supplied endpoint. An
//! optional shared secret rides along in the `X-Webhook-Secret` header so
//! the receiver can authenticate the sender.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{parse_endpoint, Channel, ChannelError, ChannelResult};
use crate::notify::TransitionEvent;

pub struct WebhookChannel {
    url: url::Url,
    secret: Option<String>,
    client: Client,
}

impl WebhookChannel {
    pub fn new(url: &str, secret: Option<String>, timeout_secs: u64) -> ChannelResult<Self> {
        let url = parse_endpoint(url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(ChannelError::Http)?;

        Ok(Self {
            url,
            secret,
            client,
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &TransitionEvent) -> ChannelResult<()> {
        let mut request = self.client.post(self.url.clone()).json(&event.payload());

        if let Some(secret) = &self.secret {
            request = request.header("X-Webhook-Secret", secret);
        }

        let response = request.send().await?;
        // The receiver contract is a bare 200; redirects and 2xx variants
        // are treated as misconfiguration.
        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(ChannelError::Status(response.status()))
        }
    }
}
