//! Engine configuration
//!
//! Defaults applied when a pipeline is configured from text (CLI, env)
//! rather than code: where file sinks land, what they are called, where
//! notifications are delivered and whether `run` starts immediately.

use std::path::PathBuf;

use crate::error::{EtlError, Result};

/// Output name used when a file sink is configured without one
pub const DEFAULT_OUTPUT_NAME: &str = "etl_output";

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory file sinks write into
    pub output_dir: PathBuf,

    /// File name for file sinks, with or without extension
    pub output_name: String,

    /// Endpoint receiving email notifications as JSON
    pub email_webhook: Option<String>,

    /// Endpoint receiving text notifications as JSON
    pub text_webhook: Option<String>,

    /// Whether `run` executes once before waiting for schedules
    pub start_immediately: bool,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            email_webhook: None,
            text_webhook: None,
            start_immediately: true,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - SLUICE_OUTPUT_DIR (default: current directory)
    /// - SLUICE_OUTPUT_NAME (default: etl_output)
    /// - SLUICE_EMAIL_WEBHOOK
    /// - SLUICE_TEXT_WEBHOOK
    /// - SLUICE_START_IMMEDIATELY (true/false, default: true)
    ///
    /// # Errors
    /// Returns `EtlError::Type` if SLUICE_START_IMMEDIATELY is not a boolean
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let output_dir = non_empty("SLUICE_OUTPUT_DIR").unwrap_or_else(|| ".".to_string());
        let mut config = Self::new(output_dir);

        if let Some(name) = non_empty("SLUICE_OUTPUT_NAME") {
            config.output_name = name;
        }
        config.email_webhook = non_empty("SLUICE_EMAIL_WEBHOOK");
        config.text_webhook = non_empty("SLUICE_TEXT_WEBHOOK");

        if let Some(flag) = lookup("SLUICE_START_IMMEDIATELY") {
            config.start_immediately = parse_start_flag(&flag)?;
        }

        Ok(config)
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    pub fn with_email_webhook(mut self, url: impl Into<String>) -> Self {
        self.email_webhook = Some(url.into());
        self
    }

    pub fn with_text_webhook(mut self, url: impl Into<String>) -> Self {
        self.text_webhook = Some(url.into());
        self
    }

    pub fn with_start_immediately(mut self, start: bool) -> Self {
        self.start_immediately = start;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.output_name.trim().is_empty() {
            return Err(EtlError::configuration("output_name cannot be empty"));
        }

        if self.output_name.contains('/') || self.output_name.contains('\\') {
            return Err(EtlError::configuration(
                "output_name must be a file name, not a path",
            ));
        }

        for (name, url) in [
            ("email_webhook", &self.email_webhook),
            ("text_webhook", &self.text_webhook),
        ] {
            let valid = url
                .as_deref()
                .is_none_or(|u| u.starts_with("http://") || u.starts_with("https://"));
            if !valid {
                return Err(EtlError::configuration(format!(
                    "{} must start with http:// or https://",
                    name
                )));
            }
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Parses a textual start-immediately flag
///
/// Only `true` and `false` (any case, surrounding whitespace ignored) are
/// accepted.
///
/// # Errors
/// Returns `EtlError::Type` for anything else
pub fn parse_start_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(EtlError::Type(format!(
            "start-immediately flag must be a boolean, got '{}'",
            raw
        ))),
    }
}
