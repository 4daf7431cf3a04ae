//! Cron scheduler
//!
//! One tokio task per registered expression. Each task sleeps until the
//! next fire time, awaits the callback and repeats. Cancellation is only
//! observed while sleeping, so a firing that already started completes.

use chrono::Utc;
use ::cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FiringCallback, ScheduleHandle, Scheduler};
use crate::error::{EtlError, Result};

/// Scheduler backed by the `cron` crate and the tokio timer
///
/// Must be used from within a tokio runtime. Dropping the scheduler cancels
/// every handle it issued.
#[derive(Default)]
pub struct CronScheduler {
    tokens: Mutex<HashMap<ScheduleHandle, CancellationToken>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles that have not been cancelled
    pub fn active(&self) -> usize {
        self.tokens.lock().map(|t| t.len()).unwrap_or(0)
    }
}

/// Parses a five- or six-field expression
///
/// Five-field forms gain a leading `0` seconds field. The day-of-week field
/// uses the usual cron numbering (`0`-`7`, Sunday is `0` or `7`) and is
/// rewritten to the `cron` crate's `1`-`7` with Sunday as `1`.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let invalid = |reason: String| {
        EtlError::configuration(format!("invalid cron expression '{}': {}", expression, reason))
    };

    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    if fields.len() == 5 {
        fields.insert(0, "0".to_string());
    }
    if let Some(day_of_week) = fields.get_mut(5) {
        *day_of_week = crate_day_of_week(day_of_week.as_str()).map_err(invalid)?;
    }

    Schedule::from_str(&fields.join(" ")).map_err(|e| invalid(e.to_string()))
}

/// Rewrites a day-of-week field as an explicit list of `cron` crate days
fn crate_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid day-of-week step in '{}'", item))?;
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (day_number(a)?, day_number(b)?),
                None => {
                    let day = day_number(range)?;
                    // `n/step` runs from n to the end of the week
                    (day, if step.is_some() { 6 } else { day })
                }
            },
        };
        if start > end {
            return Err(format!("day-of-week range '{}' runs backwards", range));
        }

        let mut day = start;
        while day <= end {
            days[(day % 7) as usize] = true;
            day += step.unwrap_or(1);
        }
    }

    let list: Vec<String> = days
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .map(|(day, _)| (day + 1).to_string())
        .collect();
    Ok(list.join(","))
}

fn day_number(raw: &str) -> std::result::Result<u32, String> {
    raw.parse()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("day of week '{}' is outside 0-7", raw))
}

impl Scheduler for CronScheduler {
    fn schedule(&self, expression: &str, callback: FiringCallback) -> Result<ScheduleHandle> {
        let schedule = parse_schedule(expression)?;
        let handle = ScheduleHandle::new(expression);
        let token = CancellationToken::new();

        self.tokens
            .lock()
            .map_err(|e| EtlError::state(format!("scheduler lock poisoned: {}", e)))?
            .insert(handle.clone(), token.clone());

        let task_handle = handle.clone();
        tokio::spawn(async move {
            info!(schedule = %task_handle, "Schedule registered");

            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    debug!(schedule = %task_handle, "No further fire times");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(schedule = %task_handle, "Schedule cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                debug!(schedule = %task_handle, fire_time = %next, "Schedule firing");
                callback().await;
            }
        });

        Ok(handle)
    }

    fn cancel(&self, handle: &ScheduleHandle) {
        match self.tokens.lock() {
            Ok(mut tokens) => {
                if let Some(token) = tokens.remove(handle) {
                    token.cancel();
                }
            }
            Err(e) => warn!("Failed to cancel schedule {}: {}", handle, e),
        }
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        if let Ok(tokens) = self.tokens.get_mut() {
            for token in tokens.values() {
                token.cancel();
            }
        }
    }
}
