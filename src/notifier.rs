use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::WebhookConfig;
use crate::platform::ChatEvent;

pub const IFTTT_BASE_URL: &str = "https://maker.ifttt.com";

/// Body of an IFTTT Maker trigger. The service only knows `value1..value3`,
/// in this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    #[serde(rename = "value1")]
    pub message: String,
    #[serde(rename = "value2")]
    pub sender: String,
    #[serde(rename = "value3")]
    pub channel: String,
}

impl From<&ChatEvent> for NotificationPayload {
    fn from(event: &ChatEvent) -> Self {
        Self {
            message: event.message.clone(),
            sender: event.sender.clone(),
            channel: event.channel.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

// The request URL carries the IFTTT key, so it never goes into the error.
impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.without_url())
    }
}

/// Somewhere notifications can be delivered
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Posts notifications to an IFTTT Maker webhook
pub struct IftttNotifier {
    client: reqwest::Client,
    base_url: String,
    config: WebhookConfig,
}

impl IftttNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self::with_base_url(config, IFTTT_BASE_URL)
    }

    pub fn with_base_url(config: WebhookConfig, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        }
    }

    fn trigger_url(&self) -> String {
        format!(
            "{}/trigger/{}/with/key/{}",
            self.base_url, self.config.event_name, self.config.key
        )
    }
}

#[async_trait]
impl Notifier for IftttNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        debug!(event = %self.config.event_name, "Sending IFTTT trigger");

        let response = self
            .client
            .post(self.trigger_url())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }

        Ok(())
    }
}

/// Fires notifications without making the caller wait for them.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send `payload` on a detached task. One attempt; failures end up in the
    /// log and nowhere else.
    pub fn dispatch(&self, payload: NotificationPayload) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            match notifier.notify(&payload).await {
                Ok(()) => debug!(
                    channel = %payload.channel,
                    sender = %payload.sender,
                    "Notification sent"
                ),
                Err(e) => error!(
                    error = %e,
                    channel = %payload.channel,
                    sender = %payload.sender,
                    "Couldn't send notification"
                ),
            }
        })
    }
}
