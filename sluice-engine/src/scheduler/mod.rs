//! Scheduler layer
//!
//! Registers cron expressions against a pipeline's run procedure and hands
//! back cancellable handles. The pipeline only checks the *shape* of an
//! expression; parsing and next-fire computation belong to the adapter.

mod cron;

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

pub use self::cron::{CronScheduler, parse_schedule};

/// Procedure invoked on every firing
///
/// The returned future is awaited to completion before the adapter looks
/// for the next fire time.
pub type FiringCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to one registered expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleHandle {
    id: Uuid,
    expression: String,
}

impl ScheduleHandle {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            expression: expression.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.id)
    }
}

/// Scheduler adapter
pub trait Scheduler: Send + Sync {
    /// Registers `callback` to fire on every match of `expression`
    ///
    /// # Errors
    /// Returns `EtlError::Configuration` if the adapter cannot parse the
    /// expression.
    fn schedule(&self, expression: &str, callback: FiringCallback) -> Result<ScheduleHandle>;

    /// Stops future firings of `handle`
    ///
    /// A firing already in progress runs to completion. Cancelling an unknown
    /// or already cancelled handle is a no-op.
    fn cancel(&self, handle: &ScheduleHandle);
}

/// Checks that an expression looks like a cron expression
///
/// Five or six whitespace-separated fields, each made only of digits and
/// `*`, `/`, `-`, `,`.
///
/// # Example
/// ```
/// use sluice_engine::scheduler::validate_cron_shape;
///
/// assert!(validate_cron_shape("*/5 * * * *"));
/// assert!(validate_cron_shape("0 30 2 * * 1-5"));
/// assert!(!validate_cron_shape("every day"));
/// ```
pub fn validate_cron_shape(expression: &str) -> bool {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 && fields.len() != 6 {
        return false;
    }
    fields.iter().all(|field| {
        field
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | '-' | ','))
    })
}
