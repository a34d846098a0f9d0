//! Base Task
//!
//! Shared bookkeeping (status cell, progress, error slot, cancellation
//! token) that concrete tasks build on.
//!
//! Transition policy: `set_status` with an illegal transition (anything but
//! `Waiting -> Processing -> terminal`) returns
//! [`TaskError::InvalidStateTransition`] and leaves the state untouched. In
//! debug builds it also trips a `debug_assert!` so the bug fails loudly.

use super::model::{StatusSignal, Task, TaskId, TaskStatus};
use crate::error::{TaskError, TaskResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct TaskState {
    status: TaskStatus,
    progress: f64,
    error: Option<String>,
}

/// Default implementation of the task bookkeeping
#[derive(Debug)]
pub struct BaseTask {
    id: TaskId,
    state: Mutex<TaskState>,
    cancel: CancellationToken,
    watchers: Mutex<Vec<Weak<StatusSignal>>>,
}

impl BaseTask {
    #[must_use]
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Build on an existing token, e.g. a child of a shutdown token
    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(TaskState::default()),
            cancel,
            watchers: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.state().progress
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(task_id = %self.id, "Cancellation requested");
        }
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn watch(&self, signal: &Arc<StatusSignal>) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|w| w.strong_count() > 0);
        watchers.push(Arc::downgrade(signal));
    }

    /// Raise the stored progress to `value` (clamped to `[0, 1]`).
    ///
    /// Lower values are ignored so readers never see progress go backwards.
    /// Returns the stored value.
    pub fn set_progress(&self, value: f64) -> f64 {
        let mut state = self.state();
        if value.is_finite() {
            let value = value.clamp(0.0, 1.0);
            if value > state.progress {
                state.progress = value;
            }
        }
        state.progress
    }

    /// Checked status setter, see the module docs for the policy
    pub fn set_status(&self, next: TaskStatus) -> TaskResult<()> {
        let result = self.transition(next, None);
        if let Err(ref e) = result {
            debug_assert!(false, "task {}: {e}", self.id);
        }
        result
    }

    pub fn finish(&self) -> TaskResult<()> {
        self.set_status(TaskStatus::Finished)
    }

    /// Enter `Error`; message and status become visible together
    pub fn fail(&self, message: impl Into<String>) -> TaskResult<()> {
        let result = self.transition(TaskStatus::Error, Some(message.into()));
        if let Err(ref e) = result {
            debug_assert!(false, "task {}: {e}", self.id);
        }
        result
    }

    pub fn mark_canceled(&self) -> TaskResult<()> {
        self.set_status(TaskStatus::Canceled)
    }

    fn transition(&self, next: TaskStatus, error: Option<String>) -> TaskResult<()> {
        let from = {
            let mut state = self.state();
            if !state.status.can_transition_to(next) {
                return Err(TaskError::InvalidStateTransition {
                    from: state.status.to_string(),
                    to: next.to_string(),
                });
            }
            let from = state.status;
            state.status = next;
            if next == TaskStatus::Error {
                state.error = error;
            }
            if next == TaskStatus::Finished {
                state.progress = 1.0;
            }
            from
        };

        debug!(task_id = %self.id, %from, to = %next, "Task status changed");
        self.notify_watchers();
        Ok(())
    }

    fn notify_watchers(&self) {
        let live: Vec<Arc<StatusSignal>> = {
            let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers.retain(|w| w.strong_count() > 0);
            watchers.iter().filter_map(Weak::upgrade).collect()
        };
        for signal in live {
            signal.notify();
        }
    }

    /// Execute boundary.
    ///
    /// Claims `Waiting -> Processing` (a repeated call is a logged no-op),
    /// runs `work` with faults caught, and settles the task into a terminal
    /// status unless `work` already did so itself.
    pub fn run<F>(&self, work: F)
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult<()>,
    {
        if let Err(e) = self.transition(TaskStatus::Processing, None) {
            warn!(task_id = %self.id, error = %e, "Task executed more than once, ignoring");
            return;
        }

        let outcome = if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            let cx = TaskContext { base: self };
            panic::catch_unwind(AssertUnwindSafe(|| work(&cx)))
                .unwrap_or_else(|payload| Err(TaskError::Internal(panic_message(payload.as_ref()))))
        };

        self.settle(outcome);
    }

    fn settle(&self, outcome: TaskResult<()>) {
        if self.status().is_terminal() {
            return;
        }
        let result = match outcome {
            Ok(()) => self.transition(TaskStatus::Finished, None),
            Err(e) if e.is_cancelled() => self.transition(TaskStatus::Canceled, None),
            Err(e) => {
                if matches!(e, TaskError::Internal(_)) {
                    error!(task_id = %self.id, error = %e, "Task fault caught at execute boundary");
                } else {
                    warn!(task_id = %self.id, error = %e, "Task failed");
                }
                self.transition(TaskStatus::Error, Some(e.to_string()))
            }
        };
        if let Err(e) = result {
            warn!(task_id = %self.id, error = %e, "Could not settle task");
        }
    }
}

impl Default for BaseTask {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle passed to work logic while a task is `Processing`
pub struct TaskContext<'a> {
    base: &'a BaseTask,
}

impl TaskContext<'_> {
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.base.id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.base.is_cancelled()
    }

    /// Cancellation safe point
    pub fn checkpoint(&self) -> TaskResult<()> {
        if self.base.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        self.base.cancellation_token()
    }

    pub fn set_progress(&self, value: f64) -> f64 {
        self.base.set_progress(value)
    }
}

type Work = Box<dyn FnOnce(&TaskContext<'_>) -> TaskResult<()> + Send>;

/// Task whose work logic is a closure
pub struct FnTask {
    base: BaseTask,
    description: String,
    work: Mutex<Option<Work>>,
}

impl FnTask {
    pub fn new<F>(description: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult<()> + Send + 'static,
    {
        Self {
            base: BaseTask::new(),
            description: description.into(),
            work: Mutex::new(Some(Box::new(work))),
        }
    }

    #[must_use]
    pub fn base(&self) -> &BaseTask {
        &self.base
    }
}

impl Task for FnTask {
    fn id(&self) -> TaskId {
        self.base.id()
    }

    fn status(&self) -> TaskStatus {
        self.base.status()
    }

    fn progress(&self) -> f64 {
        self.base.progress()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn error_message(&self) -> Option<String> {
        self.base.error_message()
    }

    fn cancel(&self) {
        self.base.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.base.is_cancelled()
    }

    fn execute(&self) {
        let work = self.work.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.base.run(|cx| match work {
            Some(work) => work(cx),
            None => Ok(()),
        });
    }

    fn watch(&self, signal: &Arc<StatusSignal>) {
        self.base.watch(signal);
    }
}
