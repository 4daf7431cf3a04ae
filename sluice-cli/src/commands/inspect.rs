//! Inspection command handlers
//!
//! Offline checks that do not touch any source or sink.

use anyhow::{Result, bail};
use chrono::Utc;
use colored::*;
use sluice_core::resolve;
use sluice_engine::driver::DriverRegistry;
use sluice_engine::scheduler::{parse_schedule, validate_cron_shape};

/// Resolve a location token and report driver availability
pub fn resolve_token(token: &str) -> Result<()> {
    let capability = resolve(token)?;
    let registry = DriverRegistry::with_defaults();

    println!("{}", capability.to_string().cyan().bold());
    println!(
        "  Reader: {}",
        availability(registry.reader(capability).is_some())
    );
    println!(
        "  Writer: {}",
        availability(registry.writer(capability).is_some())
    );
    Ok(())
}

fn availability(available: bool) -> ColoredString {
    if available {
        "available".green()
    } else {
        "not bundled".yellow()
    }
}

/// Validate a cron expression and print upcoming fire times
pub fn check_cron(expression: &str, count: usize) -> Result<()> {
    if !validate_cron_shape(expression) {
        bail!(
            "'{}' is not a cron expression (5 or 6 fields of digits and * / - ,)",
            expression
        );
    }
    let schedule = parse_schedule(expression)?;

    println!("{}", format!("✓ '{}' is valid", expression).green().bold());
    for fire_time in schedule.upcoming(Utc).take(count) {
        println!("  - {}", fire_time.to_rfc3339().dimmed());
    }
    Ok(())
}
