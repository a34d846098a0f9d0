//! Handoff gate between worker threads and a designated thread
//!
//! A background task sometimes has to build objects on one particular
//! thread (an event loop, a host UI thread). The gate packages the work
//! with a one-shot reply channel, sends it to the designated thread and
//! blocks the caller until the reply arrives.
//!
//! The caller's wait is bounded: it re-checks its cancellation token every
//! slice and gives up after the configured timeout, so a designated thread
//! that never runs cannot wedge a worker.

use crate::error::{HandoffError, HandoffResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Default bound on how long a caller waits for the designated thread
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between cancellation checks while waiting
const WAIT_SLICE: Duration = Duration::from_millis(50);

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
enum Route {
    Channel(mpsc::Sender<Job>),
    /// Headless mode: the caller's thread is the designated thread
    Inline,
}

/// Sending side, held by tasks
#[derive(Debug, Clone)]
pub struct HandoffGate {
    route: Route,
}

impl HandoffGate {
    /// Create a gate and the worker the designated thread drives
    pub fn new() -> (Self, DesignatedWorker) {
        let (job_tx, job_rx) = mpsc::channel();
        (
            Self {
                route: Route::Channel(job_tx),
            },
            DesignatedWorker { jobs: job_rx },
        )
    }

    /// Gate that runs delegated work directly on the calling thread
    #[must_use]
    pub fn inline() -> Self {
        Self {
            route: Route::Inline,
        }
    }

    /// Run `work` on the designated thread and block until it has finished.
    pub fn delegate<T, F>(
        &self,
        work: F,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> HandoffResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(HandoffError::Cancelled);
        }

        let job_tx = match &self.route {
            Route::Inline => return Ok(work()),
            Route::Channel(job_tx) => job_tx,
        };

        let (reply_tx, reply_rx) = mpsc::sync_channel::<T>(1);
        // Cancelled when the caller stops waiting, so late work is skipped.
        let abandoned = cancel.child_token();
        let job_abandoned = abandoned.clone();
        let job: Job = Box::new(move || {
            if job_abandoned.is_cancelled() {
                debug!("Skipping abandoned handoff work");
                return;
            }
            let _ = reply_tx.send(work());
        });

        job_tx.send(job).map_err(|_| HandoffError::Disconnected)?;

        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                abandoned.cancel();
                return Err(HandoffError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                abandoned.cancel();
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "Designated thread did not pick up handoff work");
                return Err(HandoffError::TimedOut { timeout_ms });
            }
            match reply_rx.recv_timeout((deadline - now).min(WAIT_SLICE)) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(HandoffError::Disconnected),
            }
        }
    }
}

/// Receiving side, driven by the designated thread
#[derive(Debug)]
pub struct DesignatedWorker {
    jobs: mpsc::Receiver<Job>,
}

impl DesignatedWorker {
    /// Run delegated work until every gate has been dropped
    pub fn run(self) {
        debug!("Designated worker started");
        while let Ok(job) = self.jobs.recv() {
            run_job(job);
        }
        debug!("Designated worker stopped");
    }

    /// Run whatever work is queued right now and return how many jobs ran.
    ///
    /// For hosts that own their event loop and pump the gate once per turn.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.jobs.try_recv() {
            run_job(job);
            count += 1;
        }
        count
    }
}

fn run_job(job: Job) {
    // A panicking job drops its reply sender; the caller sees Disconnected.
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Delegated work panicked on the designated thread");
    }
}

/// Spawn a dedicated OS thread that serves as the designated thread
pub fn spawn_designated_thread(name: &str) -> std::io::Result<(HandoffGate, JoinHandle<()>)> {
    let (gate, worker) = HandoffGate::new();
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || worker.run())?;
    Ok((gate, handle))
}
