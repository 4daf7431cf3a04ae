//! Pipeline lifecycle state

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pipeline
///
/// `Empty → Configured → Composed → Running → {Idle | Terminated}`.
/// Only a reset returns a pipeline to `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing configured, or configuration was cleared
    Empty,
    /// Source or sink registered, not yet composed
    Configured,
    /// Execution plan frozen, never run
    Composed,
    /// A run is in flight
    Running,
    /// Last run finished and schedules are active
    Idle,
    /// Last run finished and nothing else will fire
    Terminated,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Empty => write!(f, "Empty"),
            PipelineState::Configured => write!(f, "Configured"),
            PipelineState::Composed => write!(f, "Composed"),
            PipelineState::Running => write!(f, "Running"),
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Terminated => write!(f, "Terminated"),
        }
    }
}
