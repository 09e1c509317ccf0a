//! Testing utilities for users of the crank library.
//!
//! This module provides scriptable fakes for every collaborator boundary:
//!
//! - [`FakeStepFactory`]: a step factory with configurable behavior that
//!   records binds, runs, releases, predecessors, and received signals
//! - [`FakeFactory`]: a leaf [`Factory`] serving fake steps per leaf name
//! - [`FakeBuildDelegate`]: records delegate acquisition and finish calls
//! - [`Timeline`]: records event ordering across steps for verification

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::plan::{GetPlan, Location, PutPlan, TaskConfig, TaskPlan};
use crate::core::types::{BuildModel, ExitStatus, SourceName, VersionInfo, WorkerIdentifier};
use crate::engine::delegate::{BuildDelegate, BuildDelegateFactory};
use crate::exec::{
    pending_signal, signal_channel, signal_received, ArtifactRegistry, BoxStep, ByteSink,
    ExecError, Factory, Outcome, ReadyLatch, ResourceDelegate, SharedFactory, SignalRx, Step,
    StepFactory, StepSignal, TaskDelegate,
};

/// Records named events in order across concurrent steps.
#[derive(Clone, Default)]
pub struct Timeline {
    events: Arc<Mutex<Vec<String>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().expect("timeline poisoned").push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("timeline poisoned").clone()
    }
}

/// A fresh registry for binding steps in tests.
pub fn test_registry() -> Arc<ArtifactRegistry> {
    Arc::new(ArtifactRegistry::new())
}

/// Run a bound step to completion with no signals and a throwaway latch.
pub async fn run_step(step: &mut BoxStep) -> Result<(), ExecError> {
    let (_tx, rx) = signal_channel();
    let (latch, _waiter) = ReadyLatch::new();
    step.run(rx, latch).await
}

/// Run a bound step on its own task, handing back the step with the
/// result so outcome and release stay observable.
pub fn spawn_step(
    mut step: BoxStep,
    signals: SignalRx,
) -> tokio::task::JoinHandle<(BoxStep, Result<(), ExecError>)> {
    let (latch, _waiter) = ReadyLatch::new();
    tokio::spawn(async move {
        let result = step.run(signals, latch).await;
        (step, result)
    })
}

#[derive(Clone, Debug)]
enum FakeBehavior {
    /// Complete cleanly with success.
    Succeed,
    /// Complete cleanly without success.
    Fail,
    /// Return an execution error without becoming ready.
    Error(String),
    /// Become ready, then wait for a signal and return interrupted.
    Block,
}

#[derive(Default)]
struct FakeStepState {
    bind_count: AtomicU32,
    run_count: AtomicU32,
    done_count: AtomicU32,
    release_count: AtomicU32,
    last_prev: Mutex<Option<Outcome>>,
    last_signal: Mutex<Option<StepSignal>>,
}

/// A scriptable step factory.
///
/// Cloning shares the recorded state, so a test can hold a handle while
/// the combinator under test owns the factory via [`shared`](Self::shared).
#[derive(Clone)]
pub struct FakeStepFactory {
    name: String,
    behavior: FakeBehavior,
    delay: Option<Duration>,
    version: Option<VersionInfo>,
    timeline: Option<Timeline>,
    state: Arc<FakeStepState>,
}

impl FakeStepFactory {
    fn new(name: &str, behavior: FakeBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            delay: None,
            version: None,
            timeline: None,
            state: Arc::new(FakeStepState::default()),
        }
    }

    /// Steps that complete cleanly and report success.
    pub fn succeeding(name: &str) -> Self {
        Self::new(name, FakeBehavior::Succeed)
    }

    /// Steps that complete cleanly and report failure.
    pub fn failing(name: &str) -> Self {
        Self::new(name, FakeBehavior::Fail)
    }

    /// Steps whose run errors out.
    pub fn erroring(name: &str, message: &str) -> Self {
        Self::new(name, FakeBehavior::Error(message.to_string()))
    }

    /// Steps that park until signalled, then return interrupted.
    pub fn blocking(name: &str) -> Self {
        Self::new(name, FakeBehavior::Block)
    }

    /// Sleep before completing (interruptible).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attach a version to the reported outcome.
    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = Some(version);
        self
    }

    /// Record run/done/release events on a shared timeline.
    pub fn with_timeline(mut self, timeline: &Timeline) -> Self {
        self.timeline = Some(timeline.clone());
        self
    }

    /// This factory as the `Arc<dyn StepFactory>` combinators take.
    pub fn shared(&self) -> SharedFactory {
        Arc::new(self.clone())
    }

    pub fn bind_count(&self) -> u32 {
        self.state.bind_count.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> u32 {
        self.state.run_count.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u32 {
        self.state.release_count.load(Ordering::SeqCst)
    }

    /// Whether at least one bound step's run has returned.
    pub fn finished(&self) -> bool {
        self.state.done_count.load(Ordering::SeqCst) > 0
    }

    /// The predecessor outcome most recently passed to bind.
    pub fn last_prev(&self) -> Option<Outcome> {
        self.state.last_prev.lock().expect("fake state poisoned").clone()
    }

    pub fn was_signalled(&self) -> bool {
        self.last_signal().is_some()
    }

    pub fn last_signal(&self) -> Option<StepSignal> {
        *self.state.last_signal.lock().expect("fake state poisoned")
    }

    /// Wait until a bound step's run has been entered.
    pub async fn started(&self) {
        while self.run_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn record(&self, event: &str) {
        if let Some(timeline) = &self.timeline {
            timeline.record(format!("{}:{}", event, self.name));
        }
    }
}

impl StepFactory for FakeStepFactory {
    fn bind(&self, prev: &Outcome, _registry: &Arc<ArtifactRegistry>) -> BoxStep {
        self.state.bind_count.fetch_add(1, Ordering::SeqCst);
        *self.state.last_prev.lock().expect("fake state poisoned") = Some(prev.clone());
        Box::new(FakeStep { factory: self.clone() })
    }
}

struct FakeStep {
    factory: FakeStepFactory,
}

impl FakeStep {
    fn note_signal(&self, sig: StepSignal) {
        *self
            .factory
            .state
            .last_signal
            .lock()
            .expect("fake state poisoned") = Some(sig);
    }
}

#[async_trait]
impl Step for FakeStep {
    async fn run(&mut self, mut signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let state = &self.factory.state;
        state.run_count.fetch_add(1, Ordering::SeqCst);
        self.factory.record("run");

        let result = 'run: {
            if let Some(sig) = pending_signal(&signals) {
                self.note_signal(sig);
                break 'run Err(ExecError::Interrupted);
            }

            if let Some(delay) = self.factory.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    sig = signal_received(&mut signals) => {
                        self.note_signal(sig);
                        break 'run Err(ExecError::Interrupted);
                    }
                }
            }

            match &self.factory.behavior {
                FakeBehavior::Succeed | FakeBehavior::Fail => {
                    ready.ready();
                    Ok(())
                }
                FakeBehavior::Error(message) => {
                    Err(ExecError::ExecutionFailed(message.clone()))
                }
                FakeBehavior::Block => {
                    ready.ready();
                    let sig = signal_received(&mut signals).await;
                    self.note_signal(sig);
                    Err(ExecError::Interrupted)
                }
            }
        };

        state.done_count.fetch_add(1, Ordering::SeqCst);
        self.factory.record("done");
        result
    }

    fn outcome(&self) -> Outcome {
        let mut outcome = match self.factory.behavior {
            FakeBehavior::Succeed => Outcome::succeeded(),
            FakeBehavior::Fail => Outcome::failed(),
            FakeBehavior::Error(_) | FakeBehavior::Block => Outcome::default(),
        };
        if let Some(version) = &self.factory.version {
            outcome.version = Some(version.clone());
        }
        outcome
    }

    async fn release(&mut self) {
        self.factory.state.release_count.fetch_add(1, Ordering::SeqCst);
        self.factory.record("release");
    }
}

#[derive(Default)]
struct FakeFactoryState {
    steps: Mutex<HashMap<String, FakeStepFactory>>,
    get_calls: Mutex<Vec<(SourceName, WorkerIdentifier, GetPlan)>>,
    put_calls: Mutex<Vec<(WorkerIdentifier, PutPlan)>>,
    task_calls: Mutex<Vec<(SourceName, WorkerIdentifier, TaskPlan)>>,
    dependent_get_calls: Mutex<Vec<(SourceName, WorkerIdentifier, GetPlan)>>,
}

/// A leaf factory serving [`FakeStepFactory`]s, keyed by leaf name.
///
/// Unstubbed names get a succeeding fake; handles stay queryable through
/// [`step`](Self::step) after the build ran.
#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<FakeFactoryState>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preconfigure the fake used for a leaf name.
    pub fn stub(&self, name: &str, factory: FakeStepFactory) {
        self.state
            .steps
            .lock()
            .expect("fake factory poisoned")
            .insert(name.to_string(), factory);
    }

    /// Handle to the fake serving a leaf name (creating it if needed).
    pub fn step(&self, name: &str) -> FakeStepFactory {
        self.state
            .steps
            .lock()
            .expect("fake factory poisoned")
            .entry(name.to_string())
            .or_insert_with(|| FakeStepFactory::succeeding(name))
            .clone()
    }

    pub fn get_count(&self) -> usize {
        self.state.get_calls.lock().expect("fake factory poisoned").len()
    }

    pub fn put_count(&self) -> usize {
        self.state.put_calls.lock().expect("fake factory poisoned").len()
    }

    pub fn task_count(&self) -> usize {
        self.state.task_calls.lock().expect("fake factory poisoned").len()
    }

    pub fn dependent_get_count(&self) -> usize {
        self.state
            .dependent_get_calls
            .lock()
            .expect("fake factory poisoned")
            .len()
    }

    pub fn get_calls(&self) -> Vec<(SourceName, WorkerIdentifier, GetPlan)> {
        self.state.get_calls.lock().expect("fake factory poisoned").clone()
    }

    pub fn task_calls(&self) -> Vec<(SourceName, WorkerIdentifier, TaskPlan)> {
        self.state.task_calls.lock().expect("fake factory poisoned").clone()
    }

    pub fn dependent_get_calls(&self) -> Vec<(SourceName, WorkerIdentifier, GetPlan)> {
        self.state
            .dependent_get_calls
            .lock()
            .expect("fake factory poisoned")
            .clone()
    }
}

impl Factory for FakeFactory {
    fn get(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        _delegate: Arc<dyn ResourceDelegate>,
        plan: GetPlan,
    ) -> SharedFactory {
        let step = self.step(name.as_str());
        self.state
            .get_calls
            .lock()
            .expect("fake factory poisoned")
            .push((name, id, plan));
        step.shared()
    }

    fn put(
        &self,
        id: WorkerIdentifier,
        _delegate: Arc<dyn ResourceDelegate>,
        plan: PutPlan,
    ) -> SharedFactory {
        let step = self.step(&plan.name);
        self.state
            .put_calls
            .lock()
            .expect("fake factory poisoned")
            .push((id, plan));
        step.shared()
    }

    fn task(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        _delegate: Arc<dyn TaskDelegate>,
        plan: TaskPlan,
    ) -> SharedFactory {
        let step = self.step(name.as_str());
        self.state
            .task_calls
            .lock()
            .expect("fake factory poisoned")
            .push((name, id, plan));
        step.shared()
    }

    fn dependent_get(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        _delegate: Arc<dyn ResourceDelegate>,
        plan: GetPlan,
    ) -> SharedFactory {
        let step = self.step(name.as_str());
        self.state
            .dependent_get_calls
            .lock()
            .expect("fake factory poisoned")
            .push((name, id, plan));
        step.shared()
    }
}

/// A delegate that swallows all callbacks and output.
pub struct NullTaskDelegate;

#[async_trait]
impl TaskDelegate for NullTaskDelegate {
    async fn initializing(&self, _config: &TaskConfig) {}

    async fn started(&self) {}

    async fn finished(&self, _exit_status: ExitStatus) {}

    async fn failed(&self, _err: &ExecError) {}

    fn stdout(&self) -> ByteSink {
        Box::new(tokio::io::sink())
    }

    fn stderr(&self) -> ByteSink {
        Box::new(tokio::io::sink())
    }
}

/// A resource delegate that swallows all callbacks and output.
pub struct NullResourceDelegate;

#[async_trait]
impl ResourceDelegate for NullResourceDelegate {
    async fn completed(&self, _exit_status: ExitStatus, _version: Option<&VersionInfo>) {}

    async fn failed(&self, _err: &ExecError) {}

    fn stdout(&self) -> ByteSink {
        Box::new(tokio::io::sink())
    }

    fn stderr(&self) -> ByteSink {
        Box::new(tokio::io::sink())
    }
}

/// A recorded `finish` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishCall {
    pub error: Option<String>,
    pub succeeded: bool,
    pub aborted: bool,
}

#[derive(Default)]
struct FakeDelegateState {
    input_locations: Mutex<Vec<Location>>,
    output_locations: Mutex<Vec<Location>>,
    execution_locations: Mutex<Vec<Location>>,
    start_count: AtomicU32,
    finishes: Mutex<Vec<FinishCall>>,
}

/// Records every delegate interaction of a build.
#[derive(Clone, Default)]
pub struct FakeBuildDelegate {
    state: Arc<FakeDelegateState>,
}

impl FakeBuildDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_delegate_count(&self) -> usize {
        self.state.input_locations.lock().expect("fake delegate poisoned").len()
    }

    pub fn output_delegate_count(&self) -> usize {
        self.state.output_locations.lock().expect("fake delegate poisoned").len()
    }

    pub fn execution_delegate_count(&self) -> usize {
        self.state
            .execution_locations
            .lock()
            .expect("fake delegate poisoned")
            .len()
    }

    pub fn execution_locations(&self) -> Vec<Location> {
        self.state
            .execution_locations
            .lock()
            .expect("fake delegate poisoned")
            .clone()
    }

    pub fn start_count(&self) -> u32 {
        self.state.start_count.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> Vec<FinishCall> {
        self.state.finishes.lock().expect("fake delegate poisoned").clone()
    }
}

#[async_trait]
impl BuildDelegate for FakeBuildDelegate {
    fn input_delegate(&self, location: Location) -> Arc<dyn ResourceDelegate> {
        self.state
            .input_locations
            .lock()
            .expect("fake delegate poisoned")
            .push(location);
        Arc::new(NullResourceDelegate)
    }

    fn output_delegate(&self, location: Location) -> Arc<dyn ResourceDelegate> {
        self.state
            .output_locations
            .lock()
            .expect("fake delegate poisoned")
            .push(location);
        Arc::new(NullResourceDelegate)
    }

    fn execution_delegate(&self, location: Location) -> Arc<dyn TaskDelegate> {
        self.state
            .execution_locations
            .lock()
            .expect("fake delegate poisoned")
            .push(location);
        Arc::new(NullTaskDelegate)
    }

    async fn start(&self) {
        self.state.start_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn finish(&self, err: Option<&ExecError>, succeeded: bool, aborted: bool) {
        self.state
            .finishes
            .lock()
            .expect("fake delegate poisoned")
            .push(FinishCall {
                error: err.map(|e| e.to_string()),
                succeeded,
                aborted,
            });
    }
}

/// Hands the same recorded delegate to every build.
#[derive(Clone, Default)]
pub struct FakeBuildDelegateFactory {
    delegate: FakeBuildDelegate,
}

impl FakeBuildDelegateFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegate_handle(&self) -> FakeBuildDelegate {
        self.delegate.clone()
    }
}

impl BuildDelegateFactory for FakeBuildDelegateFactory {
    fn delegate(&self, _build: &BuildModel) -> Arc<dyn BuildDelegate> {
        Arc::new(self.delegate.clone())
    }
}
