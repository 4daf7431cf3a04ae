//! Notification specs delivered when a run completes successfully

use serde::{Deserialize, Serialize};

/// An email to send on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSpec {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// A text message to send on completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpec {
    pub to: String,
    pub body: String,
}

/// Notification specs attached to a pipeline; either may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifications {
    pub email: Option<EmailSpec>,
    pub text: Option<TextSpec>,
}

impl Notifications {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.text.is_none()
    }
}
