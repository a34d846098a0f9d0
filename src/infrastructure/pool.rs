//! Worker Pool
//!
//! Fixed-size pool executing submitted tasks on blocking worker threads of
//! an owned tokio runtime. A semaphore holds one permit per worker; each
//! task holds a permit for the whole of its `execute` call, so at most
//! `worker_threads` tasks run at once and the rest queue in submission
//! order.
//!
//! A composite task occupies a slot while it joins its children, so nested
//! submissions need `worker_threads` greater than the nesting depth.

use crate::domain::task::model::{StatusSignal, TaskHandle, TaskSnapshot, TaskStatus};
use crate::domain::task::scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
use crate::error::SchedulerError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Submission handle shared with tasks that delegate work
pub struct PoolScheduler {
    runtime: Handle,
    permits: Arc<Semaphore>,
    tasks: Mutex<Vec<TaskHandle>>,
    /// Notified whenever a task leaves its worker
    activity: Arc<StatusSignal>,
    worker_threads: usize,
}

impl std::fmt::Debug for PoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolScheduler")
            .field("worker_threads", &self.worker_threads)
            .field("available_permits", &self.permits.available_permits())
            .field("tracked", &self.tasks().len())
            .finish_non_exhaustive()
    }
}

impl PoolScheduler {
    fn tasks(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Snapshots of every tracked task, in submission order
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let tasks: Vec<TaskHandle> = self.tasks().clone();
        tasks.iter().map(|task| task.snapshot()).collect()
    }

    #[must_use]
    pub fn statistics(&self) -> SchedulerStats {
        SchedulerStats::from_snapshots(&self.snapshot())
    }

    /// Request cancellation of every task that has not finished
    pub fn cancel_all(&self) {
        let tasks: Vec<TaskHandle> = self.tasks().clone();
        let mut cancelled = 0;
        for task in tasks.iter().filter(|t| t.status().is_active()) {
            task.cancel();
            cancelled += 1;
        }
        info!(cancelled, "Cancelled all active tasks");
    }

    /// Forget terminal tasks; returns how many were dropped
    pub fn prune_terminal(&self) -> usize {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|task| task.status().is_active());
        before - tasks.len()
    }

    /// Block until no tracked task is waiting or running.
    ///
    /// Returns `false` if `timeout` passes first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);

        let deadline = Instant::now() + timeout;
        let mut seen = self.activity.generation();
        loop {
            if self.statistics().is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            seen = self.activity.wait_timeout(seen, (deadline - now).min(SLICE));
        }
    }

    /// Settle tasks that never reached a worker so their waiters return
    fn settle_queued(&self) {
        let queued: Vec<TaskHandle> = self
            .tasks()
            .iter()
            .filter(|task| task.status() == TaskStatus::Waiting)
            .cloned()
            .collect();
        for task in queued {
            task.cancel();
            if panic::catch_unwind(AssertUnwindSafe(|| task.execute())).is_err() {
                error!(task_id = %task.id(), "Queued task panicked while settling");
            }
        }
    }

    fn reject(&self, tasks: Vec<TaskHandle>) {
        warn!(count = tasks.len(), "Worker pool is shut down, cancelling submitted tasks");
        // Executing a cancelled task settles it without running its work.
        for task in tasks {
            task.cancel();
            task.execute();
        }
    }
}

impl Scheduler for PoolScheduler {
    fn submit(&self, tasks: Vec<TaskHandle>) {
        if self.permits.is_closed() {
            self.reject(tasks);
            return;
        }

        self.tasks().extend(tasks.iter().cloned());
        for task in tasks {
            let permits = Arc::clone(&self.permits);
            let activity = Arc::clone(&self.activity);
            debug!(task_id = %task.id(), description = %task.description(), "Task submitted");

            self.runtime.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    debug!(task_id = %task.id(), "Worker pool closed before task started");
                    return;
                };
                let task_id = task.id();
                let runner = Arc::clone(&task);
                if let Err(e) = tokio::task::spawn_blocking(move || runner.execute()).await {
                    error!(%task_id, error = %e, "Task execution escaped its fault boundary");
                }
                activity.notify();
            });
        }
    }
}

/// Owner of the worker runtime
#[derive(Debug)]
pub struct WorkerPool {
    runtime: Option<Runtime>,
    scheduler: Arc<PoolScheduler>,
    config: SchedulerConfig,
}

impl WorkerPool {
    /// Start a pool with `config.worker_threads` workers
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if config.worker_threads == 0 {
            return Err(SchedulerError::NoWorkers);
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()?;

        let scheduler = Arc::new(PoolScheduler {
            runtime: runtime.handle().clone(),
            permits: Arc::new(Semaphore::new(config.worker_threads)),
            tasks: Mutex::new(Vec::new()),
            activity: StatusSignal::new(),
            worker_threads: config.worker_threads,
        });

        info!(workers = config.worker_threads, "Worker pool started");
        Ok(Self {
            runtime: Some(runtime),
            scheduler,
            config,
        })
    }

    /// Create a pool with default configuration
    pub fn with_defaults() -> Result<Self, SchedulerError> {
        Self::new(SchedulerConfig::default())
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shareable submission handle
    #[must_use]
    pub fn scheduler(&self) -> Arc<PoolScheduler> {
        Arc::clone(&self.scheduler)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.scheduler.snapshot()
    }

    #[must_use]
    pub fn statistics(&self) -> SchedulerStats {
        self.scheduler.statistics()
    }

    pub fn cancel_all(&self) {
        self.scheduler.cancel_all();
    }

    pub fn prune_terminal(&self) -> usize {
        self.scheduler.prune_terminal()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    /// Cancel everything, stop accepting work and wait up to `timeout` for
    /// running tasks to return. Must not be called from a worker thread.
    pub fn shutdown(mut self, timeout: Duration) {
        self.scheduler.cancel_all();
        self.scheduler.permits.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
        }
        self.scheduler.settle_queued();
        self.scheduler.tasks().clear();
        info!("Worker pool stopped");
    }
}

impl Scheduler for WorkerPool {
    fn submit(&self, tasks: Vec<TaskHandle>) {
        self.scheduler.submit(tasks);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.scheduler.cancel_all();
            self.scheduler.permits.close();
            runtime.shutdown_background();
            self.scheduler.settle_queued();
        }
        // Tracked tasks may hold the scheduler handle themselves.
        self.scheduler.tasks().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::base::FnTask;
    use crate::domain::task::model::{Task, TaskId, TaskStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(SchedulerConfig {
            worker_threads: workers,
            thread_name: "pool-test".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = WorkerPool::new(SchedulerConfig {
            worker_threads: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(SchedulerError::NoWorkers)));
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = pool(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<TaskHandle> = (0..6)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                Arc::new(FnTask::new(format!("Task{i}"), move |_| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })) as TaskHandle
            })
            .collect();
        pool.submit(tasks);

        assert!(pool.wait_idle(Duration::from_secs(10)));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.statistics().finished, 6);
    }

    struct RawPanicTask {
        id: TaskId,
    }

    impl Task for RawPanicTask {
        fn id(&self) -> TaskId {
            self.id
        }
        fn status(&self) -> TaskStatus {
            TaskStatus::Error
        }
        fn progress(&self) -> f64 {
            0.0
        }
        fn description(&self) -> String {
            "raw panic".to_string()
        }
        fn error_message(&self) -> Option<String> {
            None
        }
        fn cancel(&self) {}
        fn is_cancelled(&self) -> bool {
            false
        }
        fn execute(&self) {
            panic!("no fault boundary");
        }
    }

    #[test]
    fn test_worker_survives_unbounded_panic() {
        let pool = pool(1);
        pool.submit(vec![Arc::new(RawPanicTask {
            id: uuid::Uuid::new_v4(),
        })]);

        let after = Arc::new(FnTask::new("After", |_| Ok(())));
        pool.submit(vec![after.clone() as TaskHandle]);

        assert!(pool.wait_idle(Duration::from_secs(10)));
        assert_eq!(after.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_cancel_all_reaches_queued_tasks() {
        let pool = pool(1);
        let blocker = Arc::new(FnTask::new("Blocker", |cx| loop {
            cx.checkpoint()?;
            std::thread::sleep(Duration::from_millis(5));
        }));
        let queued: Vec<Arc<FnTask>> = (0..3)
            .map(|i| Arc::new(FnTask::new(format!("Queued{i}"), |_| Ok(()))))
            .collect();

        pool.submit(vec![blocker.clone() as TaskHandle]);
        pool.submit(queued.iter().map(|t| t.clone() as TaskHandle).collect());
        std::thread::sleep(Duration::from_millis(30));
        pool.cancel_all();

        assert!(pool.wait_idle(Duration::from_secs(10)));
        let stats = pool.statistics();
        assert_eq!(stats.cancelled, 4);
        assert_eq!(stats.finished, 0);
    }

    #[test]
    fn test_prune_terminal() {
        let pool = pool(2);
        pool.submit(vec![
            Arc::new(FnTask::new("A", |_| Ok(()))) as TaskHandle,
            Arc::new(FnTask::new("B", |_| Ok(()))) as TaskHandle,
        ]);
        assert!(pool.wait_idle(Duration::from_secs(10)));
        assert_eq!(pool.prune_terminal(), 2);
        assert!(pool.snapshot().is_empty());
    }

    #[test]
    fn test_shutdown_settles_queued_tasks() {
        let pool = pool(1);
        let blocker = Arc::new(FnTask::new("Blocker", |cx| loop {
            cx.checkpoint()?;
            std::thread::sleep(Duration::from_millis(5));
        }));
        let queued = Arc::new(FnTask::new("Queued", |_| Ok(())));
        pool.submit(vec![blocker.clone() as TaskHandle, queued.clone() as TaskHandle]);
        std::thread::sleep(Duration::from_millis(30));

        pool.shutdown(Duration::from_secs(5));
        assert_eq!(blocker.status(), TaskStatus::Canceled);
        assert_eq!(queued.status(), TaskStatus::Canceled);
    }

    #[test]
    fn test_submit_after_shutdown_cancels() {
        let pool = pool(1);
        let scheduler = pool.scheduler();
        pool.shutdown(Duration::from_secs(1));

        let late = Arc::new(FnTask::new("Late", |_| panic!("must not run")));
        scheduler.submit(vec![late.clone() as TaskHandle]);
        assert_eq!(late.status(), TaskStatus::Canceled);
    }
}
