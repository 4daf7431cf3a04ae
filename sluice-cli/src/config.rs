//! Configuration module
//!
//! Loads the engine configuration from the environment and applies
//! top-level CLI overrides.

use anyhow::{Context, Result};
use sluice_engine::EngineConfig;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine defaults (output location, webhooks, start flag)
    pub engine: EngineConfig,
}

impl Config {
    /// Reads SLUICE_* variables, then applies `--output-dir`
    pub fn load(output_dir: Option<String>) -> Result<Self> {
        let mut engine = EngineConfig::from_env().context("Invalid SLUICE_* environment")?;
        if let Some(dir) = output_dir {
            engine.output_dir = dir.into();
        }
        engine.validate().context("Invalid configuration")?;
        Ok(Self { engine })
    }

    /// Output directory as a sink location string
    pub fn output_dir(&self) -> String {
        self.engine.output_dir.to_string_lossy().into_owned()
    }
}
