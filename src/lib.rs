//! mzflow Library
//!
//! This library provides a task execution engine for feature-list processing:
//! - Task contract with forward-only status and monotonic progress
//! - Composite tasks that fan out children and blend their progress
//! - A bounded worker pool and a designated-thread handoff gate
//! - Import and normalization tasks committing into a shared project

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod logging;
pub mod processing;

pub use config::EngineConfig;
pub use domain::project::{ArtifactStore, FeatureList, Project, RawDataFile};
pub use domain::task::{
    BaseTask, CompositeTask, Orchestrator, Scheduler, Task, TaskContext, TaskHandle, TaskStatus,
};
pub use error::{EngineError, Result, TaskError};
pub use infrastructure::{HandoffGate, WorkerPool};
