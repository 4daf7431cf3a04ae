//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod inspect;
mod run;

pub use run::RunArgs;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compose a pipeline and run it once, on schedules, or both
    Run(RunArgs),
    /// Show which capability a file path or connection string resolves to
    Resolve {
        /// File path or connection string
        token: String,
    },
    /// Check a cron expression and show its next fire times
    CheckCron {
        /// Five- or six-field cron expression
        expression: String,

        /// Number of upcoming fire times to show
        #[arg(short, long, default_value = "3")]
        count: usize,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run(args, config).await,
        Commands::Resolve { token } => inspect::resolve_token(&token),
        Commands::CheckCron { expression, count } => inspect::check_cron(&expression, count),
    }
}
