//! `mzflow` Error Types
//!
//! Centralized error handling using thiserror for type-safe errors.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for `mzflow`
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Handoff error: {0}")]
    Handoff(#[from] HandoffError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while a task executes.
///
/// `Cancelled` is not a failure: the execute boundary maps it to the
/// `Canceled` status and records no message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Cannot read '{resource}': {reason}")]
    Input { resource: String, reason: String },

    #[error("{message}")]
    ChildFailed { child: String, message: String },

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Internal fault: {0}")]
    Internal(String),

    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid phase weights: {0}")]
    InvalidWeights(String),

    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    /// Input error naming the unreadable resource
    pub fn input(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::Input {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::Handoff(HandoffError::Cancelled))
    }
}

/// Designated-thread handoff errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    #[error("Handoff cancelled while waiting for the designated thread")]
    Cancelled,

    #[error("Designated thread did not run delegated work within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("Designated thread is gone")]
    Disconnected,
}

/// Shared-state (project) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Artifact '{id}' is already committed")]
    DuplicateArtifact { id: Uuid },

    #[error("Artifact '{id}' not found")]
    ArtifactNotFound { id: Uuid },
}

/// Worker pool errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to build worker runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Worker pool needs at least one worker thread")]
    NoWorkers,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for `mzflow` operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for Task operations
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Result type alias for handoff operations
pub type HandoffResult<T> = std::result::Result<T, HandoffError>;

/// Result type alias for Store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for Config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaskError::input("run_b.mzML", "file not found");
        assert_eq!(err.to_string(), "Cannot read 'run_b.mzML': file not found");

        let err = HandoffError::TimedOut { timeout_ms: 250 };
        assert_eq!(
            err.to_string(),
            "Designated thread did not run delegated work within 250ms"
        );
    }

    #[test]
    fn test_child_failure_carries_message() {
        let err = TaskError::ChildFailed {
            child: "Importing run_b.mzML".to_string(),
            message: "Cannot read 'run_b.mzML': truncated".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot read 'run_b.mzML': truncated");
    }

    #[test]
    fn test_error_conversion() {
        let task_err: TaskError = HandoffError::Cancelled.into();
        assert!(task_err.is_cancelled());

        let engine_err: EngineError = TaskError::Cancelled.into();
        assert!(matches!(engine_err, EngineError::Task(TaskError::Cancelled)));
    }
}
