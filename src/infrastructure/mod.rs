//! Infrastructure Layer
//!
//! Thread plumbing: the worker pool and the designated-thread handoff.

pub mod handoff;
pub mod pool;

pub use handoff::{spawn_designated_thread, DesignatedWorker, HandoffGate, DEFAULT_HANDOFF_TIMEOUT};
pub use pool::{PoolScheduler, WorkerPool};
