//! Run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of one pipeline execution
///
/// Created when a run starts and finalized when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub batches_written: u64,
    pub records_written: u64,
    pub error_message: Option<String>,
}

impl RunRecord {
    /// Starts a new record in the `Running` state
    pub fn start(pipeline_id: Uuid, pipeline_name: impl Into<String>, trigger: RunTrigger) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_id,
            pipeline_name: pipeline_name.into(),
            trigger,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            batches_written: 0,
            records_written: 0,
            error_message: None,
        }
    }

    pub fn succeed(mut self) -> Self {
        self.status = RunStatus::Succeeded;
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Run execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// What started a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunTrigger {
    /// Direct call to `run`
    Manual,
    /// A cron firing, carrying the expression that fired
    Scheduled(String),
    /// Completion of the predecessor pipeline with this id
    Successor(Uuid),
}
