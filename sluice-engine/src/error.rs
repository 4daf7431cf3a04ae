//! Error types for the Sluice engine

use sluice_core::ResolveError;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors surfaced by pipeline lifecycle operations
#[derive(Debug, Error)]
pub enum EtlError {
    /// Invalid or mismatched source, sink, transform or schedule arguments
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation invoked in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    State(String),

    /// Argument of the wrong type on an untyped surface
    #[error("Type error: {0}")]
    Type(String),

    /// A reader or writer failed while a run was in flight
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl EtlError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    pub fn is_type(&self) -> bool {
        matches!(self, Self::Type(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

impl From<ResolveError> for EtlError {
    fn from(err: ResolveError) -> Self {
        EtlError::Configuration(err.to_string())
    }
}

/// Stage of a run at which an execution error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Open,
    Write,
    Close,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Read => write!(f, "read"),
            Stage::Open => write!(f, "open"),
            Stage::Write => write!(f, "write"),
            Stage::Close => write!(f, "close"),
        }
    }
}

/// A driver failure annotated with where in the run it happened
#[derive(Debug, Error)]
#[error("Execution failed during {stage}{}: {source}", batch_suffix(.batch))]
pub struct ExecutionError {
    pub stage: Stage,
    /// Index of the batch being processed, when known
    pub batch: Option<usize>,
    #[source]
    pub source: DriverError,
}

impl ExecutionError {
    pub fn new(stage: Stage, batch: Option<usize>, source: DriverError) -> Self {
        Self {
            stage,
            batch,
            source,
        }
    }
}

fn batch_suffix(batch: &Option<usize>) -> String {
    batch.map(|b| format!(" of batch {}", b)).unwrap_or_default()
}

/// Errors raised by readers and writers
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Errors raised by notification transports
///
/// These are logged by the dispatcher and never fail a run.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Endpoint answered with an error status
    #[error("Endpoint error (status {status}): {message}")]
    Endpoint { status: u16, message: String },

    /// Transport refused the message
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

impl NotifyError {
    pub fn endpoint(status: u16, message: impl Into<String>) -> Self {
        Self::Endpoint {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(EtlError::configuration("bad sink").is_configuration());
        assert!(EtlError::state("not composed").is_state());
        assert!(EtlError::Type("expected boolean".to_string()).is_type());

        let exec: EtlError =
            ExecutionError::new(Stage::Read, None, DriverError::InvalidData("x".into())).into();
        assert!(exec.is_execution());
    }

    #[test]
    fn test_execution_error_message_includes_batch() {
        let err = ExecutionError::new(
            Stage::Write,
            Some(2),
            DriverError::Unsupported("xml".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Execution failed during write of batch 2: Unsupported: xml"
        );
    }

    #[test]
    fn test_resolve_error_becomes_configuration() {
        let err: EtlError = ResolveError::Empty.into();
        assert!(err.is_configuration());
    }
}
