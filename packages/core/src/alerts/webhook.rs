//! Webhook alert delivery.
//!
//! [`SlackWebhook`] posts rendered messages to a Slack-compatible incoming
//! webhook. When the endpoint rejects a block payload it retries once with
//! the plain fallback text, so a formatting problem never swallows an alert.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::alerts::message::SlackMessage;
use crate::error::{AppError, AppResult};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for rendered notifications.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, message: &SlackMessage) -> AppResult<()>;

    /// Name used in logs.
    fn sink_name(&self) -> &str;
}

pub struct SlackWebhook {
    url: Option<String>,
    http: Client,
}

impl SlackWebhook {
    /// `None` (or an empty URL) turns delivery into a logged no-op.
    pub fn new(url: Option<String>) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|err| AppError::Config(format!("HTTP client: {}", err)))?;
        Ok(Self {
            url: url.filter(|u| !u.trim().is_empty()),
            http,
        })
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::StatusCode, reqwest::Error> {
        let response = self.http.post(url).json(body).send().await?;
        Ok(response.status())
    }

    async fn post_text_only(&self, url: &str, message: &SlackMessage) -> AppResult<()> {
        let body = SlackMessage::text_only(message.text.clone()).to_payload();
        match self.post(url, &body).await {
            Ok(status) if status.is_success() => {
                tracing::info!("Slack fallback text sent");
                Ok(())
            }
            Ok(status) => Err(AppError::Delivery(format!("fallback text rejected with HTTP {}", status))),
            Err(err) => Err(AppError::Delivery(format!("fallback text failed: {}", err))),
        }
    }
}

#[async_trait]
impl AlertSink for SlackWebhook {
    async fn deliver(&self, message: &SlackMessage) -> AppResult<()> {
        let Some(url) = self.url.as_deref() else {
            tracing::warn!("SLACK_WEBHOOK_URL not set. Skipping Slack notification. Message:\n{}", message.text);
            return Ok(());
        };

        let has_blocks = !message.blocks.is_empty();
        match self.post(url, &message.to_payload()).await {
            Ok(status) if status.is_success() => {
                tracing::info!("Slack notification sent ({} block(s))", message.blocks.len());
                Ok(())
            }
            Ok(status) if has_blocks => {
                tracing::error!("Slack responded with {}. Falling back to text payload.", status);
                self.post_text_only(url, message).await
            }
            Ok(status) => Err(AppError::Delivery(format!("webhook rejected message with HTTP {}", status))),
            Err(err) if has_blocks => {
                tracing::error!("Slack notification failed: {}. Falling back to text payload.", err);
                self.post_text_only(url, message).await
            }
            Err(err) => Err(AppError::Delivery(err.to_string())),
        }
    }

    fn sink_name(&self) -> &str {
        "slack"
    }
}
