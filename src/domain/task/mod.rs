//! Task Management
//!
//! Task contract, base bookkeeping, composite fan-out and the scheduler
//! seam.

pub mod base;
pub mod composite;
pub mod model;
pub mod scheduler;

pub use base::{BaseTask, FnTask, TaskContext};
pub use composite::{
    ChildOutcome, ChildTask, CompositeConfig, CompositePhase, CompositeTask, FailurePolicy,
    Orchestrator, OutputOf, PhaseWeights,
};
pub use model::{wait_for_terminal, StatusSignal, Task, TaskHandle, TaskId, TaskSnapshot, TaskStatus};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
