//! Task Model
//!
//! Lifecycle status, the task contract, and the change signal used to
//! observe status transitions from other threads.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Task identifier
pub type TaskId = Uuid;

/// Shared handle to a schedulable task
pub type TaskHandle = Arc<dyn Task>;

/// Task lifecycle status
///
/// `Waiting` and `Processing` are active; the other three are terminal and
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, not yet picked up by a worker
    #[default]
    Waiting,
    /// A worker is executing the task
    Processing,
    /// Completed successfully
    Finished,
    /// Terminated with an error message
    Error,
    /// Stopped on request
    Canceled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Error | TaskStatus::Canceled
        )
    }

    /// Check if the task is still waiting or running
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Forward-only transition rule: `Waiting -> Processing -> terminal`
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Waiting, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Finished)
                | (TaskStatus::Processing, TaskStatus::Error)
                | (TaskStatus::Processing, TaskStatus::Canceled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Waiting => write!(f, "Waiting"),
            TaskStatus::Processing => write!(f, "Processing"),
            TaskStatus::Finished => write!(f, "Finished"),
            TaskStatus::Error => write!(f, "Error"),
            TaskStatus::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Point-in-time view of a task, safe to hand to monitoring code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub error: Option<String>,
}

/// Capability set every schedulable unit of work exposes.
///
/// `execute` is called once by a scheduler and leaves the task terminal.
/// `cancel` only raises a flag; the running task observes it at its own
/// safe points. Status and progress may be read from any thread while
/// `execute` runs.
pub trait Task: Send + Sync {
    fn id(&self) -> TaskId;

    fn status(&self) -> TaskStatus;

    /// Completion fraction in `[0.0, 1.0]`
    fn progress(&self) -> f64;

    fn description(&self) -> String;

    /// Set only when the status is `Error`
    fn error_message(&self) -> Option<String>;

    /// Idempotent, non-blocking, advisory
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    fn execute(&self);

    /// Register a signal notified on every status change.
    ///
    /// Tasks that cannot notify keep the default no-op; waiters then fall
    /// back to their bounded wait slice.
    fn watch(&self, _signal: &Arc<StatusSignal>) {}

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id(),
            description: self.description(),
            status: self.status(),
            progress: self.progress(),
            error: self.error_message(),
        }
    }
}

/// Generation counter paired with a condition variable.
///
/// Every `notify` bumps the generation; waiters block until it moves past
/// the value they last saw or the timeout elapses.
#[derive(Debug, Default)]
pub struct StatusSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl StatusSignal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the generation differs from `seen` or `timeout` passes.
    /// Returns the generation observed on wake-up.
    pub fn wait_timeout(&self, seen: u64, timeout: Duration) -> u64 {
        let guard = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Block the calling thread until `task` is terminal or `timeout` passes.
///
/// Returns `true` if the task reached a terminal status in time.
pub fn wait_for_terminal(task: &dyn Task, timeout: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(50);

    let signal = StatusSignal::new();
    task.watch(&signal);
    let deadline = Instant::now() + timeout;
    let mut seen = signal.generation();

    loop {
        if task.status().is_terminal() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        seen = signal.wait_timeout(seen, (deadline - now).min(SLICE));
    }
}
