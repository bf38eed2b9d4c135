use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::core::errors::ApiError;

#[derive(Serialize, Clone, Debug)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub message: String,
}

#[derive(Error, Debug)]
#[error("Email delivery failed: {0}")]
pub struct NotifyError(pub String);

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), NotifyError>;
}

/// Writes outgoing mail to the log. Default when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        info!(to = %email.to, subject = %email.subject, "{}", email.message);
        Ok(())
    }
}

/// Posts each message as JSON to a mail relay.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&email)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError(format!("relay answered {}", resp.status())));
        }
        Ok(())
    }
}
