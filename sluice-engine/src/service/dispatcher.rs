//! Completion dispatcher
//!
//! Runs after every successful execution: email first, then text, then the
//! successor. The whole sequence runs on its own task so a slow transport
//! never holds up the run that triggered it. Transport failures are logged
//! and never fail the run.

use sluice_core::Notifications;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::pipeline::{RunOutcome, Successor};
use crate::service::notify::{EmailTransport, LogTransport, TextTransport, WebhookTransport};

/// Join handle of the completion task
///
/// Resolves to the successor's outcome once notifications are delivered,
/// or to `None` when there is no successor.
pub type CompletionHandle = JoinHandle<Option<Result<RunOutcome>>>;

/// Delivers notifications and starts successors
#[derive(Clone)]
pub struct CompletionDispatcher {
    email: Arc<dyn EmailTransport>,
    text: Arc<dyn TextTransport>,
}

impl CompletionDispatcher {
    pub fn new(email: Arc<dyn EmailTransport>, text: Arc<dyn TextTransport>) -> Self {
        Self { email, text }
    }

    /// Webhook transports where configured, log transports otherwise
    pub fn from_config(config: &EngineConfig) -> Self {
        let email: Arc<dyn EmailTransport> = match &config.email_webhook {
            Some(url) => Arc::new(WebhookTransport::new(url.clone())),
            None => Arc::new(LogTransport),
        };
        let text: Arc<dyn TextTransport> = match &config.text_webhook {
            Some(url) => Arc::new(WebhookTransport::new(url.clone())),
            None => Arc::new(LogTransport),
        };
        Self { email, text }
    }

    /// Handles the terminal success of a run of pipeline `completed`
    ///
    /// Returns `None` when there is nothing to deliver or start.
    pub fn on_complete(
        &self,
        notifications: Notifications,
        successor: Option<Successor>,
        completed: Uuid,
    ) -> Option<CompletionHandle> {
        if notifications.is_empty() && successor.is_none() {
            return None;
        }

        let dispatcher = self.clone();
        Some(tokio::spawn(async move {
            dispatcher.notify(&notifications).await;

            let successor = successor?;
            info!(
                successor = %successor.pipeline.name(),
                start_now = successor.start_now,
                "Starting successor"
            );
            Some(
                successor
                    .pipeline
                    .run_as_successor(successor.start_now, completed)
                    .await,
            )
        }))
    }

    async fn notify(&self, notifications: &Notifications) {
        if let Some(email) = &notifications.email {
            match self.email.send_email(email).await {
                Ok(()) => info!(to = %email.to, "Completion email sent"),
                Err(e) => warn!(to = %email.to, error = %e, "Failed to send completion email"),
            }
        }

        if let Some(text) = &notifications.text {
            match self.text.send_text(text).await {
                Ok(()) => info!(to = %text.to, "Completion text sent"),
                Err(e) => warn!(to = %text.to, error = %e, "Failed to send completion text"),
            }
        }
    }
}

impl Default for CompletionDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LogTransport), Arc::new(LogTransport))
    }
}
