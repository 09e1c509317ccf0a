//! The build driver.
//!
//! An [`Engine`] turns a plan plus a build model into a [`Build`], which
//! when resumed interprets the plan, binds the root step against a fresh
//! artifact registry, and drives it to completion while forwarding
//! external aborts into the step tree's signal channel.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

use crate::core::plan::{Plan, StepPlan};
use crate::core::types::{BuildId, BuildModel, RunId};
use crate::exec::{
    pending_signal, signal_channel, ArtifactRegistry, ExecError, Factory, Outcome, ReadyLatch,
    SignalRx, SignalTx, StepSignal,
};

pub mod delegate;
mod interpreter;

use delegate::{BuildDelegate, BuildDelegateFactory};
use interpreter::Interpreter;

/// Errors surfaced when constructing a build.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The plan refers to a leaf without a usable name.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

/// Constructs runnable builds from plans.
pub struct Engine {
    factory: Arc<dyn Factory>,
    delegates: Arc<dyn BuildDelegateFactory>,
}

impl Engine {
    pub fn new(factory: Arc<dyn Factory>, delegates: Arc<dyn BuildDelegateFactory>) -> Self {
        Self { factory, delegates }
    }

    /// Construct a build for the given model and plan.
    pub fn create_build(&self, model: BuildModel, plan: Plan) -> Result<Build, EngineError> {
        validate_leaf_names(&plan)?;

        let delegate = self.delegates.delegate(&model);
        let (signal_tx, signal_rx) = signal_channel();

        Ok(Build {
            model,
            plan: Some(plan),
            run_id: RunId::new(),
            factory: Arc::clone(&self.factory),
            delegate,
            signal_tx: Arc::new(signal_tx),
            signal_rx,
        })
    }
}

fn validate_leaf_names(plan: &Plan) -> Result<(), EngineError> {
    match &plan.step {
        StepPlan::Get(get) | StepPlan::DependentGet(get) => {
            if get.name.is_empty() {
                return Err(EngineError::InvalidPlan("get with empty name".to_string()));
            }
        }
        StepPlan::Put(put) => {
            if put.name.is_empty() {
                return Err(EngineError::InvalidPlan("put with empty name".to_string()));
            }
        }
        StepPlan::Task(task) => {
            if task.name.is_empty() {
                return Err(EngineError::InvalidPlan("task with empty name".to_string()));
            }
        }
        StepPlan::Aggregate(plans) | StepPlan::Do(plans) => {
            for plan in plans {
                validate_leaf_names(plan)?;
            }
        }
        StepPlan::OnSuccess(hook) | StepPlan::OnFailure(hook) | StepPlan::Ensure(hook) => {
            validate_leaf_names(&hook.step)?;
            validate_leaf_names(&hook.next)?;
        }
        StepPlan::Try(plan) => validate_leaf_names(plan)?,
        StepPlan::Timeout(timeout) => validate_leaf_names(&timeout.step)?,
        StepPlan::Conditional(conditional) => validate_leaf_names(&conditional.step)?,
        StepPlan::Retry(retry) => validate_leaf_names(&retry.step)?,
    }
    Ok(())
}

/// Terminal summary of one resumed build.
#[derive(Debug)]
pub struct BuildResult {
    pub succeeded: bool,
    pub aborted: bool,
    pub error: Option<ExecError>,
}

/// Delivers external cancellation into a running build.
#[derive(Clone)]
pub struct AbortHandle {
    signal_tx: Arc<SignalTx>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.signal_tx.send(Some(StepSignal::Interrupt));
    }
}

/// One execution of a plan.
pub struct Build {
    model: BuildModel,
    plan: Option<Plan>,
    run_id: RunId,
    factory: Arc<dyn Factory>,
    delegate: Arc<dyn BuildDelegate>,
    signal_tx: Arc<SignalTx>,
    signal_rx: SignalRx,
}

impl Build {
    pub fn model(&self) -> &BuildModel {
        &self.model
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Request cancellation. May be called at any time, from any task.
    pub fn abort(&self) {
        let _ = self.signal_tx.send(Some(StepSignal::Interrupt));
    }

    /// A cloneable handle for aborting from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal_tx: Arc::clone(&self.signal_tx),
        }
    }

    /// Run the build to completion.
    ///
    /// Interprets the plan, binds the root against a fresh registry, runs
    /// it forwarding any abort, then reports exactly one `finish` to the
    /// delegate and releases the whole tree.
    pub async fn resume(&mut self) -> BuildResult {
        let span = info_span!("build", id = self.model.id, run = %self.run_id);

        async {
            let plan = match self.plan.take() {
                Some(plan) => plan,
                None => {
                    warn!("build resumed more than once");
                    return BuildResult {
                        succeeded: false,
                        aborted: false,
                        error: Some(ExecError::ExecutionFailed(
                            "build already resumed".to_string(),
                        )),
                    };
                }
            };

            let registry = Arc::new(ArtifactRegistry::new());
            let interpreter = Interpreter::new(
                Arc::clone(&self.factory),
                Arc::clone(&self.delegate),
                BuildId::new(self.model.id),
            );

            self.delegate.start().await;

            let root_factory = interpreter.interpret(&plan);
            let mut root = root_factory.bind(&Outcome::succeeded(), &registry);
            debug!("running root step");

            let (latch, _waiter) = ReadyLatch::new();
            let result = root.run(self.signal_rx.clone(), latch).await;

            let succeeded = root.outcome().is_success();
            let abort_requested = pending_signal(&self.signal_rx).is_some();
            let aborted =
                abort_requested && matches!(result, Err(ExecError::Interrupted));

            debug!(succeeded, aborted, errored = result.is_err(), "root step finished");
            self.delegate
                .finish(result.as_ref().err(), succeeded, aborted)
                .await;

            root.release().await;

            BuildResult {
                succeeded,
                aborted,
                error: result.err(),
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::{GetPlan, TaskPlan};
    use crate::testing::{FakeBuildDelegateFactory, FakeFactory};

    fn engine(factory: &FakeFactory, delegates: &FakeBuildDelegateFactory) -> Engine {
        Engine::new(Arc::new(factory.clone()), Arc::new(delegates.clone()))
    }

    #[test]
    fn test_create_build_rejects_empty_leaf_names() {
        let factory = FakeFactory::new();
        let delegates = FakeBuildDelegateFactory::new();

        let plan = Plan::new(StepPlan::Get(GetPlan::default()));
        let result = engine(&factory, &delegates).create_build(BuildModel::default(), plan);

        assert!(matches!(result, Err(EngineError::InvalidPlan(_))));
    }

    #[test]
    fn test_create_build_rejects_nested_empty_names() {
        let factory = FakeFactory::new();
        let delegates = FakeBuildDelegateFactory::new();

        let plan = Plan::new(StepPlan::Do(vec![
            Plan::new(StepPlan::Task(TaskPlan {
                name: "ok".to_string(),
                ..TaskPlan::default()
            })),
            Plan::new(StepPlan::Task(TaskPlan::default())),
        ]));
        let result = engine(&factory, &delegates).create_build(BuildModel::default(), plan);

        assert!(matches!(result, Err(EngineError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn test_resume_twice_reports_failure_without_rerunning() {
        let factory = FakeFactory::new();
        let delegates = FakeBuildDelegateFactory::new();

        let plan = Plan::new(StepPlan::Task(TaskPlan {
            name: "t".to_string(),
            ..TaskPlan::default()
        }));
        let mut build = engine(&factory, &delegates)
            .create_build(BuildModel::default(), plan)
            .unwrap();

        let first = build.resume().await;
        assert!(first.succeeded);

        let second = build.resume().await;
        assert!(!second.succeeded);
        assert_eq!(factory.step("t").run_count(), 1);
        assert_eq!(delegates.delegate_handle().finishes().len(), 1);
    }
}
