//! Composite Task
//!
//! A task that fans out into child tasks, joins them and commits one
//! combined artifact. Execution runs in four phases:
//!
//! 1. Resolve: compute one input per child (weight `resolve`).
//! 2. Delegate: build every child on the designated thread through the
//!    handoff gate and submit them to the scheduler.
//! 3. Join: wait until every child is terminal. Progress over this phase is
//!    `resolve + join * mean(child progress)`.
//! 4. Finalize: assemble the artifact and commit it (weight `finalize`).
//!
//! What the composite builds is supplied by an [`Orchestrator`]; the phase
//! machinery, progress blending, cancellation cascade and failure rules
//! live here.

use super::base::{BaseTask, TaskContext};
use super::model::{StatusSignal, Task, TaskHandle, TaskId, TaskSnapshot, TaskStatus};
use super::scheduler::Scheduler;
use crate::domain::project::{AppliedMethod, ArtifactId, ArtifactStore, FeatureList};
use crate::error::{TaskError, TaskResult};
use crate::infrastructure::handoff::{HandoffGate, DEFAULT_HANDOFF_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tolerance when checking that phase weights sum to one
const WEIGHT_EPSILON: f64 = 1e-6;

/// Highest progress reported before the composite is `Finished`
const UNFINISHED_CEILING: f64 = 0.999;

/// Share of overall progress assigned to each phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseWeights {
    pub resolve: f64,
    pub join: f64,
    pub finalize: f64,
}

impl PhaseWeights {
    /// Checked constructor: weights must be non-negative and sum to one
    pub fn new(resolve: f64, join: f64, finalize: f64) -> TaskResult<Self> {
        let weights = Self {
            resolve,
            join,
            finalize,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> TaskResult<()> {
        let parts = [self.resolve, self.join, self.finalize];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(TaskError::InvalidWeights(format!(
                "weights must be non-negative, got {self:?}"
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(TaskError::InvalidWeights(format!(
                "weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }

    /// Overall progress while joining, given the children's progress
    #[must_use]
    pub fn blend(&self, child_progress: &[f64]) -> f64 {
        if child_progress.is_empty() {
            return self.resolve + self.join;
        }
        let mean = child_progress.iter().sum::<f64>() / child_progress.len() as f64;
        self.resolve + self.join * mean
    }
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            resolve: 0.1,
            join: 0.8,
            finalize: 0.1,
        }
    }
}

/// What the composite does when a child fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let siblings run to their natural end
    #[default]
    WaitForAll,
    /// Cancel remaining siblings once a required child fails
    CancelSiblings,
}

/// Composite tuning
#[derive(Debug, Clone)]
pub struct CompositeConfig {
    pub weights: PhaseWeights,
    pub failure_policy: FailurePolicy,
    /// Longest the join sleeps without a child notification
    pub poll_interval: Duration,
    /// Bound on waiting for the designated thread to build children
    pub handoff_timeout: Duration,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            weights: PhaseWeights::default(),
            failure_policy: FailurePolicy::default(),
            poll_interval: Duration::from_millis(200),
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
        }
    }
}

/// Execution phase of a composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositePhase {
    Resolve,
    Delegate,
    Join,
    Finalize,
}

/// A child task whose result the composite collects after the join
pub trait ChildTask: Task + 'static {
    type Output: Send + 'static;

    /// Move the result out; `None` unless the child finished
    fn take_output(&self) -> Option<Self::Output>;
}

/// Terminal state of one child, in submission order
#[derive(Debug, Clone, PartialEq)]
pub struct ChildOutcome<T> {
    pub index: usize,
    pub description: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub output: Option<T>,
}

/// Output type of an orchestrator's children
pub type OutputOf<O> = <<O as Orchestrator>::Child as ChildTask>::Output;

/// Domain logic plugged into a [`CompositeTask`]
pub trait Orchestrator: Send + Sync + 'static {
    type Input: Send + 'static;
    type Child: ChildTask;

    fn description(&self) -> String;

    /// Compute one input per child. Runs on the worker thread.
    fn resolve(&self, cx: &TaskContext<'_>) -> TaskResult<Vec<Self::Input>>;

    /// Construct a child. Runs on the designated thread.
    fn build_child(&self, input: Self::Input) -> Arc<Self::Child>;

    /// Whether the child at `index` must finish for the composite to succeed
    fn is_required(&self, _index: usize) -> bool {
        true
    }

    /// Combine the children's outcomes into the artifact to commit
    fn assemble(
        &self,
        cx: &TaskContext<'_>,
        outcomes: Vec<ChildOutcome<OutputOf<Self>>>,
    ) -> TaskResult<FeatureList>;

    /// History record appended to the committed artifact
    fn applied_method(&self) -> Option<AppliedMethod> {
        None
    }

    /// History carried over from the input artifact, oldest first
    fn inherited_history(&self) -> Vec<AppliedMethod> {
        Vec::new()
    }

    /// Artifact removed from the store once the new one is committed
    fn replaces(&self) -> Option<ArtifactId> {
        None
    }

    /// Runs once the artifact is in the store. Side effects on the project
    /// that must not outlive a failed or cancelled run belong here.
    fn after_commit(&self, _committed: ArtifactId) {}
}

struct ChildSet<C> {
    phase: Option<CompositePhase>,
    children: Vec<Arc<C>>,
}

/// Task that runs an orchestrator's children and commits their result
pub struct CompositeTask<O: Orchestrator> {
    base: BaseTask,
    orchestrator: Arc<O>,
    scheduler: Arc<dyn Scheduler>,
    store: Arc<dyn ArtifactStore>,
    gate: HandoffGate,
    config: CompositeConfig,
    set: Mutex<ChildSet<O::Child>>,
    /// Children notify this on every status change
    signal: Arc<StatusSignal>,
    committed: Mutex<Option<ArtifactId>>,
}

impl<O: Orchestrator> CompositeTask<O> {
    pub fn new(
        orchestrator: O,
        scheduler: Arc<dyn Scheduler>,
        store: Arc<dyn ArtifactStore>,
        gate: HandoffGate,
    ) -> Self {
        Self {
            base: BaseTask::new(),
            orchestrator: Arc::new(orchestrator),
            scheduler,
            store,
            gate,
            config: CompositeConfig::default(),
            set: Mutex::new(ChildSet {
                phase: None,
                children: Vec::new(),
            }),
            signal: StatusSignal::new(),
            committed: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CompositeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    #[must_use]
    pub fn orchestrator(&self) -> &O {
        &self.orchestrator
    }

    fn set(&self) -> MutexGuard<'_, ChildSet<O::Child>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current phase, `None` before execution starts
    #[must_use]
    pub fn phase(&self) -> Option<CompositePhase> {
        self.set().phase
    }

    /// Snapshots of the children still held; empty once terminal
    #[must_use]
    pub fn children(&self) -> Vec<TaskSnapshot> {
        let children: Vec<Arc<O::Child>> = self.set().children.clone();
        children.iter().map(|child| child.snapshot()).collect()
    }

    /// Id of the artifact this composite committed
    #[must_use]
    pub fn committed_artifact(&self) -> Option<ArtifactId> {
        *self.committed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, phase: CompositePhase) {
        self.set().phase = Some(phase);
        info!(task_id = %self.base.id(), ?phase, "Composite phase started");
    }

    fn cancel_children(&self) {
        let children: Vec<Arc<O::Child>> = self.set().children.clone();
        for child in children.iter().filter(|c| c.status().is_active()) {
            child.cancel();
        }
    }

    fn orchestrate(&self, cx: &TaskContext<'_>) -> TaskResult<()> {
        let weights = self.config.weights;

        self.enter(CompositePhase::Resolve);
        let inputs = self.orchestrator.resolve(cx)?;
        cx.checkpoint()?;
        self.advance(weights.resolve);

        let children = if inputs.is_empty() {
            debug!(task_id = %cx.task_id(), "No child inputs, skipping delegation");
            self.advance(weights.resolve + weights.join);
            Vec::new()
        } else {
            self.enter(CompositePhase::Delegate);
            let children = self.delegate(cx, inputs)?;
            self.enter(CompositePhase::Join);
            self.join(cx)?;
            children
        };

        cx.checkpoint()?;
        self.enter(CompositePhase::Finalize);
        self.finalize(cx, &children)
    }

    fn delegate(
        &self,
        cx: &TaskContext<'_>,
        inputs: Vec<O::Input>,
    ) -> TaskResult<Vec<Arc<O::Child>>> {
        let count = inputs.len();
        let orchestrator = Arc::clone(&self.orchestrator);
        let children = self.gate.delegate(
            move || {
                inputs
                    .into_iter()
                    .map(|input| orchestrator.build_child(input))
                    .collect::<Vec<_>>()
            },
            cx.token(),
            self.config.handoff_timeout,
        )?;
        debug!(task_id = %cx.task_id(), count, "Children built on designated thread");

        for child in &children {
            child.watch(&self.signal);
        }
        // Stored before submission so a concurrent cancel reaches them.
        self.set().children = children.clone();
        if cx.is_cancelled() {
            self.cancel_children();
        }

        let handles: Vec<TaskHandle> = children
            .iter()
            .map(|child| Arc::clone(child) as TaskHandle)
            .collect();
        self.scheduler.submit(handles);
        Ok(children)
    }

    fn join(&self, cx: &TaskContext<'_>) -> TaskResult<()> {
        let mut seen = self.signal.generation();
        let mut reported = Vec::new();
        let mut siblings_cancelled = false;

        loop {
            if cx.is_cancelled() {
                info!(task_id = %cx.task_id(), "Composite cancelled while joining children");
                self.cancel_children();
                return Err(TaskError::Cancelled);
            }

            let children: Vec<Arc<O::Child>> = self.set().children.clone();
            let mut all_terminal = true;
            let mut required_failed = false;
            for (index, child) in children.iter().enumerate() {
                let status = child.status();
                all_terminal &= status.is_terminal();
                if matches!(status, TaskStatus::Error | TaskStatus::Canceled)
                    && !reported.contains(&index)
                {
                    reported.push(index);
                    let required = self.orchestrator.is_required(index);
                    required_failed |= required;
                    warn!(
                        task_id = %cx.task_id(),
                        child = %child.description(),
                        %status,
                        required,
                        error = child.error_message().as_deref().unwrap_or(""),
                        "Child task did not finish"
                    );
                }
            }
            self.blended_progress();

            if required_failed
                && !siblings_cancelled
                && self.config.failure_policy == FailurePolicy::CancelSiblings
            {
                debug!(task_id = %cx.task_id(), "Cancelling sibling children");
                siblings_cancelled = true;
                self.cancel_children();
            }
            if all_terminal {
                return Ok(());
            }
            seen = self.signal.wait_timeout(seen, self.config.poll_interval);
        }
    }

    fn finalize(&self, cx: &TaskContext<'_>, children: &[Arc<O::Child>]) -> TaskResult<()> {
        let outcomes: Vec<ChildOutcome<OutputOf<O>>> = children
            .iter()
            .enumerate()
            .map(|(index, child)| ChildOutcome {
                index,
                description: child.description(),
                status: child.status(),
                error: child.error_message(),
                output: child.take_output(),
            })
            .collect();

        if let Some(failure) = self.required_failure(&outcomes) {
            return Err(failure);
        }

        let mut artifact = self.orchestrator.assemble(cx, outcomes)?;
        artifact.inherit_history(&self.orchestrator.inherited_history());
        if let Some(method) = self.orchestrator.applied_method() {
            artifact.add_applied_method(method);
        }

        cx.checkpoint()?;
        let id = artifact.id;
        let name = artifact.name.clone();
        self.store.commit_artifact(artifact)?;
        *self.committed.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        info!(task_id = %cx.task_id(), artifact = %name, "Composite committed artifact");

        self.orchestrator.after_commit(id);

        if let Some(replaced) = self.orchestrator.replaces() {
            if let Err(e) = self.store.remove_artifact(replaced) {
                warn!(task_id = %cx.task_id(), error = %e, "Could not remove replaced artifact");
            }
        }
        Ok(())
    }

    /// Reason the composite cannot commit, if any required child fell short.
    /// A child's own error wins over a sibling cancelled on its account.
    fn required_failure(&self, outcomes: &[ChildOutcome<OutputOf<O>>]) -> Option<TaskError> {
        let required: Vec<&ChildOutcome<OutputOf<O>>> = outcomes
            .iter()
            .filter(|o| self.orchestrator.is_required(o.index))
            .collect();
        let first = |status: fn(TaskStatus) -> bool| required.iter().find(|o| status(o.status));

        if let Some(failed) = first(|s| s == TaskStatus::Error) {
            return Some(TaskError::ChildFailed {
                child: failed.description.clone(),
                message: failed
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", failed.description)),
            });
        }
        if let Some(cancelled) = first(|s| s == TaskStatus::Canceled) {
            return Some(TaskError::ChildFailed {
                child: cancelled.description.clone(),
                message: format!("{} was cancelled", cancelled.description),
            });
        }
        first(|s| s.is_active()).map(|active| {
            TaskError::Internal(format!(
                "{} is still active after the join",
                active.description
            ))
        })
    }

    /// Raise stored progress, keeping it below 1.0 until `Finished`
    fn advance(&self, value: f64) -> f64 {
        self.base.set_progress(value.min(UNFINISHED_CEILING))
    }

    /// Progress computed from the children while joining, stored otherwise
    fn blended_progress(&self) -> f64 {
        let values: Option<Vec<f64>> = {
            let set = self.set();
            (set.phase == Some(CompositePhase::Join) && !set.children.is_empty())
                .then(|| set.children.iter().map(|c| c.progress()).collect())
        };
        match values {
            Some(values) if self.base.status() == TaskStatus::Processing => {
                self.advance(self.config.weights.blend(&values))
            }
            _ => self.base.progress(),
        }
    }

    fn release_children(&self) {
        self.cancel_children();
        self.set().children.clear();
    }
}

impl<O: Orchestrator> Task for CompositeTask<O> {
    fn id(&self) -> TaskId {
        self.base.id()
    }

    fn status(&self) -> TaskStatus {
        self.base.status()
    }

    fn progress(&self) -> f64 {
        self.blended_progress()
    }

    fn description(&self) -> String {
        self.orchestrator.description()
    }

    fn error_message(&self) -> Option<String> {
        self.base.error_message()
    }

    fn cancel(&self) {
        self.base.cancel();
        self.cancel_children();
        self.signal.notify();
    }

    fn is_cancelled(&self) -> bool {
        self.base.is_cancelled()
    }

    fn execute(&self) {
        self.base.run(|cx| self.orchestrate(cx));
        self.release_children();
    }

    fn watch(&self, signal: &Arc<StatusSignal>) {
        self.base.watch(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::project::{Project, RawDataFile};
    use crate::domain::task::model::wait_for_terminal;
    use crate::infrastructure::handoff::spawn_designated_thread;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Runs each task on its own OS thread
    struct ThreadScheduler;

    impl Scheduler for ThreadScheduler {
        fn submit(&self, tasks: Vec<TaskHandle>) {
            for task in tasks {
                std::thread::spawn(move || task.execute());
            }
        }
    }

    #[derive(Clone)]
    enum Plan {
        Succeed(&'static str),
        Fail(&'static str),
        Block {
            progress: f64,
            release: Arc<AtomicBool>,
        },
    }

    struct StubChild {
        base: BaseTask,
        plan: Plan,
        output: Mutex<Option<String>>,
    }

    impl Task for StubChild {
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
            match &self.plan {
                Plan::Succeed(name) | Plan::Fail(name) => format!("Importing {name}"),
                Plan::Block { .. } => "Importing slow file".to_string(),
            }
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
            self.base.run(|cx| {
                let name = match &self.plan {
                    Plan::Succeed(name) => name.to_string(),
                    Plan::Fail(name) => return Err(TaskError::input(*name, "unreadable")),
                    Plan::Block { progress, release } => {
                        cx.set_progress(*progress);
                        while !release.load(Ordering::SeqCst) {
                            cx.checkpoint()?;
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        "slow.mzML".to_string()
                    }
                };
                *self.output.lock().unwrap() = Some(name);
                Ok(())
            });
        }
        fn watch(&self, signal: &Arc<StatusSignal>) {
            self.base.watch(signal);
        }
    }

    impl ChildTask for StubChild {
        type Output = String;

        fn take_output(&self) -> Option<String> {
            self.output.lock().unwrap().take()
        }
    }

    #[derive(Default)]
    struct StubOrchestrator {
        plans: Vec<Plan>,
        optional: Vec<usize>,
        replaces: Option<ArtifactId>,
        history: Vec<AppliedMethod>,
        built_on: Mutex<Vec<Option<String>>>,
        committed: Mutex<Vec<ArtifactId>>,
    }

    impl StubOrchestrator {
        fn with_plans(plans: Vec<Plan>) -> Self {
            Self {
                plans,
                ..Default::default()
            }
        }
    }

    impl Orchestrator for StubOrchestrator {
        type Input = Plan;
        type Child = StubChild;

        fn description(&self) -> String {
            "Combine stub files".to_string()
        }

        fn resolve(&self, _cx: &TaskContext<'_>) -> TaskResult<Vec<Plan>> {
            Ok(self.plans.clone())
        }

        fn build_child(&self, plan: Plan) -> Arc<StubChild> {
            self.built_on
                .lock()
                .unwrap()
                .push(std::thread::current().name().map(str::to_string));
            Arc::new(StubChild {
                base: BaseTask::new(),
                plan,
                output: Mutex::new(None),
            })
        }

        fn is_required(&self, index: usize) -> bool {
            !self.optional.contains(&index)
        }

        fn assemble(
            &self,
            cx: &TaskContext<'_>,
            outcomes: Vec<ChildOutcome<String>>,
        ) -> TaskResult<FeatureList> {
            cx.checkpoint()?;
            let raw_files = outcomes
                .into_iter()
                .filter_map(|o| o.output)
                .map(RawDataFile::new)
                .collect();
            Ok(FeatureList::new("combined", raw_files))
        }

        fn applied_method(&self) -> Option<AppliedMethod> {
            Some(AppliedMethod::new("Combine stub files", json!({})))
        }

        fn inherited_history(&self) -> Vec<AppliedMethod> {
            self.history.clone()
        }

        fn replaces(&self) -> Option<ArtifactId> {
            self.replaces
        }

        fn after_commit(&self, committed: ArtifactId) {
            self.committed.lock().unwrap().push(committed);
        }
    }

    fn composite(
        orchestrator: StubOrchestrator,
        project: &Arc<Project>,
    ) -> CompositeTask<StubOrchestrator> {
        CompositeTask::new(
            orchestrator,
            Arc::new(ThreadScheduler),
            Arc::clone(project) as Arc<dyn ArtifactStore>,
            HandoffGate::inline(),
        )
        .with_config(CompositeConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        })
    }

    #[test]
    fn test_weights_validation() {
        assert!(PhaseWeights::new(0.1, 0.8, 0.1).is_ok());
        assert!(matches!(
            PhaseWeights::new(0.5, 0.5, 0.5),
            Err(TaskError::InvalidWeights(_))
        ));
        assert!(matches!(
            PhaseWeights::new(-0.1, 1.0, 0.1),
            Err(TaskError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_blend_uses_mean_child_progress() {
        let weights = PhaseWeights::default();
        assert!((weights.blend(&[1.0, 0.5, 0.0]) - 0.5).abs() < 1e-9);
        assert!((weights.blend(&[]) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_all_children_finish_and_commit() {
        let project = Arc::new(Project::new("p"));
        let task = composite(
            StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML"), Plan::Succeed("b.mzML")]),
            &project,
        );
        task.execute();

        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.progress(), 1.0);
        let lists = project.feature_lists();
        assert_eq!(lists.len(), 1);
        let names: Vec<_> = lists[0].raw_files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mzML", "b.mzML"]);
        assert_eq!(lists[0].applied_methods.len(), 1);
        assert_eq!(task.committed_artifact(), Some(lists[0].id));
        assert_eq!(*task.orchestrator().committed.lock().unwrap(), vec![lists[0].id]);
    }

    #[test]
    fn test_inherited_history_precedes_own_record() {
        let project = Arc::new(Project::new("p"));
        let mut orchestrator = StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML")]);
        orchestrator.history = vec![
            AppliedMethod::new("Import", json!({ "file": "study.mzTab" })),
            AppliedMethod::new("Align", json!({})),
        ];
        let task = composite(orchestrator, &project);
        task.execute();

        assert_eq!(task.status(), TaskStatus::Finished);
        let list = project.feature_list_by_name("combined").unwrap();
        let history: Vec<_> = list
            .applied_methods
            .iter()
            .map(|m| m.description.as_str())
            .collect();
        assert_eq!(history, vec!["Import", "Align", "Combine stub files"]);
    }

    #[test]
    fn test_required_child_error_fails_composite() {
        let project = Arc::new(Project::new("p"));
        let task = composite(
            StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML"), Plan::Fail("b.mzML")]),
            &project,
        );
        task.execute();

        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(
            task.error_message().as_deref(),
            Some("Cannot read 'b.mzML': unreadable")
        );
        assert_eq!(project.artifact_count(), 0);
    }

    #[test]
    fn test_optional_child_error_is_tolerated() {
        let project = Arc::new(Project::new("p"));
        let mut orchestrator =
            StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML"), Plan::Fail("b.mzML")]);
        orchestrator.optional = vec![1];
        let task = composite(orchestrator, &project);
        task.execute();

        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(project.feature_lists()[0].raw_files.len(), 1);
    }

    #[test]
    fn test_no_inputs_still_commits() {
        let project = Arc::new(Project::new("p"));
        let task = composite(StubOrchestrator::with_plans(vec![]), &project);
        task.execute();

        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.progress(), 1.0);
        assert_eq!(project.artifact_count(), 1);
        assert!(project.feature_lists()[0].raw_files.is_empty());
    }

    #[test]
    fn test_progress_blends_children_while_joining() {
        let project = Arc::new(Project::new("p"));
        let release = Arc::new(AtomicBool::new(false));
        let task = Arc::new(composite(
            StubOrchestrator::with_plans(vec![
                Plan::Succeed("a.mzML"),
                Plan::Block {
                    progress: 0.5,
                    release: Arc::clone(&release),
                },
                Plan::Block {
                    progress: 0.0,
                    release: Arc::clone(&release),
                },
            ]),
            &project,
        ));
        let runner = Arc::clone(&task);
        let handle = std::thread::spawn(move || runner.execute());

        let mut blended = 0.0;
        for _ in 0..400 {
            let children = task.children();
            let settled = children.len() == 3
                && children[0].status == TaskStatus::Finished
                && children[1].progress == 0.5
                && children[2].status == TaskStatus::Processing;
            if settled {
                blended = task.progress();
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!((blended - 0.5).abs() < 1e-9, "blended progress was {blended}");
        assert_eq!(task.phase(), Some(CompositePhase::Join));

        release.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(task.status(), TaskStatus::Finished);
        assert!(task.children().is_empty());
    }

    #[test]
    fn test_cancel_cascades_and_skips_commit() {
        let project = Arc::new(Project::new("p"));
        let release = Arc::new(AtomicBool::new(false));
        let task = Arc::new(composite(
            StubOrchestrator::with_plans(vec![
                Plan::Block {
                    progress: 0.2,
                    release: Arc::clone(&release),
                },
                Plan::Block {
                    progress: 0.4,
                    release,
                },
            ]),
            &project,
        ));
        let runner = Arc::clone(&task);
        let handle = std::thread::spawn(move || runner.execute());

        while task.children().iter().any(|c| c.status == TaskStatus::Waiting)
            || task.children().is_empty()
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        let children = task.children();
        task.cancel();

        assert!(wait_for_terminal(task.as_ref(), Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(task.status(), TaskStatus::Canceled);
        assert!(task.error_message().is_none());
        assert_eq!(children.len(), 2);
        assert_eq!(project.artifact_count(), 0);
    }

    #[test]
    fn test_cancel_after_some_children_finished_skips_commit() {
        let project = Arc::new(Project::new("p"));
        let release = Arc::new(AtomicBool::new(false));
        let task = Arc::new(composite(
            StubOrchestrator::with_plans(vec![
                Plan::Succeed("a.mzML"),
                Plan::Succeed("b.mzML"),
                Plan::Block {
                    progress: 0.5,
                    release: Arc::clone(&release),
                },
            ]),
            &project,
        ));
        let runner = Arc::clone(&task);
        let handle = std::thread::spawn(move || runner.execute());

        let started = std::time::Instant::now();
        loop {
            let children = task.children();
            let ready = children.len() == 3
                && children[0].status == TaskStatus::Finished
                && children[1].status == TaskStatus::Finished
                && children[2].status == TaskStatus::Processing;
            if ready {
                break;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "children never settled");
            std::thread::sleep(Duration::from_millis(5));
        }
        task.cancel();

        assert!(wait_for_terminal(task.as_ref(), Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(task.status(), TaskStatus::Canceled);
        assert!(task.progress() < 1.0);
        assert_eq!(task.committed_artifact(), None);
        assert_eq!(project.artifact_count(), 0);
        assert!(task.orchestrator().committed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progress_never_decreases_while_observed() {
        let project = Arc::new(Project::new("p"));
        let release = Arc::new(AtomicBool::new(false));
        let task = Arc::new(composite(
            StubOrchestrator::with_plans(vec![
                Plan::Succeed("a.mzML"),
                Plan::Block {
                    progress: 0.3,
                    release: Arc::clone(&release),
                },
            ]),
            &project,
        ));

        let observed = Arc::clone(&task);
        let sampler = std::thread::spawn(move || {
            let mut samples = Vec::new();
            loop {
                // Progress first: a 1.0 read implies the status is already final
                let progress = observed.progress();
                let status = observed.status();
                samples.push((progress, status));
                if status.is_terminal() {
                    return samples;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let runner = Arc::clone(&task);
        let handle = std::thread::spawn(move || runner.execute());
        let started = std::time::Instant::now();
        while !task
            .children()
            .get(1)
            .is_some_and(|c| c.status == TaskStatus::Processing)
        {
            assert!(started.elapsed() < Duration::from_secs(5), "child never started");
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(30));
        release.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        let samples = sampler.join().unwrap();

        assert_eq!(task.status(), TaskStatus::Finished);
        for pair in samples.windows(2) {
            assert!(pair[1].0 >= pair[0].0, "progress went back: {pair:?}");
        }
        for (progress, status) in &samples {
            if *progress >= 1.0 {
                assert_eq!(*status, TaskStatus::Finished);
            } else {
                assert!(*progress <= UNFINISHED_CEILING);
            }
        }
        assert!(samples.iter().any(|(p, _)| *p > 0.0 && *p < 1.0));
        assert_eq!(samples.last().map(|s| s.0), Some(1.0));
    }

    #[test]
    fn test_cancel_siblings_policy() {
        let project = Arc::new(Project::new("p"));
        let never = Arc::new(AtomicBool::new(false));
        let task = composite(
            StubOrchestrator::with_plans(vec![
                Plan::Fail("bad.mzML"),
                Plan::Block {
                    progress: 0.1,
                    release: never,
                },
            ]),
            &project,
        )
        .with_config(CompositeConfig {
            poll_interval: Duration::from_millis(20),
            failure_policy: FailurePolicy::CancelSiblings,
            ..Default::default()
        });
        task.execute();

        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(
            task.error_message().as_deref(),
            Some("Cannot read 'bad.mzML': unreadable")
        );
        assert_eq!(project.artifact_count(), 0);
    }

    #[test]
    fn test_cancel_siblings_reports_failing_child() {
        let project = Arc::new(Project::new("p"));
        let never = Arc::new(AtomicBool::new(false));
        let task = composite(
            StubOrchestrator::with_plans(vec![
                Plan::Block {
                    progress: 0.1,
                    release: never,
                },
                Plan::Fail("bad.mzML"),
            ]),
            &project,
        )
        .with_config(CompositeConfig {
            poll_interval: Duration::from_millis(20),
            failure_policy: FailurePolicy::CancelSiblings,
            ..Default::default()
        });
        task.execute();

        // The blocked sibling ends Canceled, yet the real error is reported
        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(
            task.error_message().as_deref(),
            Some("Cannot read 'bad.mzML': unreadable")
        );
        assert_eq!(project.artifact_count(), 0);
    }

    #[test]
    fn test_children_built_on_designated_thread() {
        let project = Arc::new(Project::new("p"));
        let (gate, designated) = spawn_designated_thread("designated-ui").unwrap();
        let task = CompositeTask::new(
            StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML"), Plan::Succeed("b.mzML")]),
            Arc::new(ThreadScheduler),
            Arc::clone(&project) as Arc<dyn ArtifactStore>,
            gate,
        );
        task.execute();

        assert_eq!(task.status(), TaskStatus::Finished);
        let built_on = task.orchestrator().built_on.lock().unwrap().clone();
        assert_eq!(
            built_on,
            vec![Some("designated-ui".to_string()), Some("designated-ui".to_string())]
        );

        drop(task);
        designated.join().unwrap();
    }

    #[test]
    fn test_unresponsive_designated_thread_fails_composite() {
        let project = Arc::new(Project::new("p"));
        let (gate, _worker) = HandoffGate::new();
        let task = CompositeTask::new(
            StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML")]),
            Arc::new(ThreadScheduler),
            Arc::clone(&project) as Arc<dyn ArtifactStore>,
            gate,
        )
        .with_config(CompositeConfig {
            handoff_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        task.execute();

        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(
            task.error_message().as_deref(),
            Some("Designated thread did not run delegated work within 50ms")
        );
        assert_eq!(project.artifact_count(), 0);
    }

    #[test]
    fn test_replaced_artifact_is_removed() {
        let project = Arc::new(Project::new("p"));
        let old = FeatureList::new("old", vec![]);
        let old_id = old.id;
        project.commit_artifact(old).unwrap();

        let mut orchestrator = StubOrchestrator::with_plans(vec![Plan::Succeed("a.mzML")]);
        orchestrator.replaces = Some(old_id);
        let task = composite(orchestrator, &project);
        task.execute();

        assert_eq!(task.status(), TaskStatus::Finished);
        assert!(project.feature_list(old_id).is_none());
        assert!(project.feature_list_by_name("combined").is_some());
    }
}
