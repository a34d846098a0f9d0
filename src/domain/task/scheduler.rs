//! Task Scheduler
//!
//! The submission contract composite tasks delegate children through, plus
//! the statistics and configuration shared by scheduler implementations.

use super::model::{TaskHandle, TaskSnapshot, TaskStatus};
use serde::{Deserialize, Serialize};

/// Accepts tasks for execution on worker threads.
///
/// `submit` returns without waiting; every submitted task has `execute`
/// called exactly once. Implementations that cannot run a task must still
/// drive it to a terminal status so that joins waiting on it return.
pub trait Scheduler: Send + Sync {
    fn submit(&self, tasks: Vec<TaskHandle>);
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub waiting: usize,
    pub processing: usize,
    pub finished: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SchedulerStats {
    /// Tally a set of task snapshots
    #[must_use]
    pub fn from_snapshots(snapshots: &[TaskSnapshot]) -> Self {
        let mut stats = Self {
            total: snapshots.len(),
            ..Default::default()
        };
        for snapshot in snapshots {
            match snapshot.status {
                TaskStatus::Waiting => stats.waiting += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Finished => stats.finished += 1,
                TaskStatus::Error => stats.failed += 1,
                TaskStatus::Canceled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// No task is waiting or running
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.waiting + self.processing == 0
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed number of tasks executing at once
    pub worker_threads: usize,
    /// Name prefix of worker threads
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name: "mzflow-worker".to_string(),
        }
    }
}

/// Available parallelism, falling back to 4
#[must_use]
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot {
            id: Uuid::new_v4(),
            description: String::new(),
            status,
            progress: 0.0,
            error: None,
        }
    }

    #[test]
    fn test_stats_tally() {
        let snapshots = vec![
            snapshot(TaskStatus::Waiting),
            snapshot(TaskStatus::Processing),
            snapshot(TaskStatus::Finished),
            snapshot(TaskStatus::Finished),
            snapshot(TaskStatus::Error),
            snapshot(TaskStatus::Canceled),
        ];
        let stats = SchedulerStats::from_snapshots(&snapshots);
        assert_eq!(
            stats,
            SchedulerStats {
                total: 6,
                waiting: 1,
                processing: 1,
                finished: 2,
                failed: 1,
                cancelled: 1,
            }
        );
        assert!(!stats.is_idle());
    }

    #[test]
    fn test_empty_stats_are_idle() {
        assert!(SchedulerStats::from_snapshots(&[]).is_idle());
    }

    #[test]
    fn test_default_config_has_workers() {
        let config = SchedulerConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.thread_name, "mzflow-worker");
    }
}
