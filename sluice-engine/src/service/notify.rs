//! Notification transports
//!
//! Email and text delivery sit behind two small traits so the dispatcher can
//! be tested with recording doubles and deployed with whatever gateway is at
//! hand. Two implementations ship: one that only logs, one that POSTs the
//! spec as JSON to a webhook.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sluice_core::{EmailSpec, TextSpec};
use std::time::Duration;
use tracing::info;

use crate::error::NotifyError;

/// Request timeout of webhook transports built with [`WebhookTransport::new`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers completion emails
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(&self, email: &EmailSpec) -> Result<(), NotifyError>;
}

/// Delivers completion text messages
#[async_trait]
pub trait TextTransport: Send + Sync {
    async fn send_text(&self, text: &TextSpec) -> Result<(), NotifyError>;
}

/// Transport that records deliveries in the log and sends nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send_email(&self, email: &EmailSpec) -> Result<(), NotifyError> {
        info!(
            to = %email.to,
            from = %email.from,
            subject = %email.subject,
            html = email.html.is_some(),
            "Email notification"
        );
        Ok(())
    }
}

#[async_trait]
impl TextTransport for LogTransport {
    async fn send_text(&self, text: &TextSpec) -> Result<(), NotifyError> {
        info!(to = %text.to, body = %text.body, "Text notification");
        Ok(())
    }
}

/// Transport that POSTs each message as JSON to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    url: String,
    client: Client,
}

impl WebhookTransport {
    /// Uses a client with a [`DEFAULT_TIMEOUT`] per request
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(url, client)
    }

    /// Uses a configured reqwest client (timeouts, proxies, TLS)
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    async fn post<T: Serialize + Sync>(&self, body: &T) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::endpoint(status.as_u16(), message));
        }

        Ok(())
    }
}

#[async_trait]
impl EmailTransport for WebhookTransport {
    async fn send_email(&self, email: &EmailSpec) -> Result<(), NotifyError> {
        self.post(email).await
    }
}

#[async_trait]
impl TextTransport for WebhookTransport {
    async fn send_text(&self, text: &TextSpec) -> Result<(), NotifyError> {
        self.post(text).await
    }
}
