//! Translating plans into step factories.
//!
//! Recursive descent over the plan tree: leaves go to the external
//! [`Factory`] collaborator, combinator nodes to the matching combinator
//! in [`exec`](crate::exec). Leaf construction is deferred until the leaf
//! is bound, so a hook branch that never fires never reaches the factory.
//! `Location` modifiers are routed to delegate acquisition and never
//! reach the combinators.

use std::sync::Arc;

use crate::core::plan::{GetPlan, Location, Plan, PutPlan, StepPlan, TaskPlan};
use crate::core::types::{BuildId, ContainerType, SourceName, WorkerIdentifier};
use crate::exec::{
    Aggregate, ArtifactRegistry, BoxStep, Compose, Conditional, Ensure, Factory, Identity,
    OnFailure, OnSuccess, Outcome, Retry, SharedFactory, StepFactory, Timeout, Try,
};

use super::delegate::BuildDelegate;

pub(crate) struct Interpreter {
    factory: Arc<dyn Factory>,
    delegate: Arc<dyn BuildDelegate>,
    build_id: BuildId,
}

impl Interpreter {
    pub(crate) fn new(
        factory: Arc<dyn Factory>,
        delegate: Arc<dyn BuildDelegate>,
        build_id: BuildId,
    ) -> Self {
        Self {
            factory,
            delegate,
            build_id,
        }
    }

    fn leaf(&self, location: Location, kind: LeafKind) -> SharedFactory {
        Arc::new(DeferredLeaf {
            factory: Arc::clone(&self.factory),
            delegate: Arc::clone(&self.delegate),
            build_id: self.build_id,
            location,
            kind,
        })
    }

    pub(crate) fn interpret(&self, plan: &Plan) -> SharedFactory {
        let location = plan.location.clone().unwrap_or_default();

        match &plan.step {
            StepPlan::Get(get) => self.leaf(location, LeafKind::Get(get.clone())),

            StepPlan::Put(put) => self.leaf(location, LeafKind::Put(put.clone())),

            StepPlan::DependentGet(get) => {
                self.leaf(location, LeafKind::DependentGet(get.clone()))
            }

            StepPlan::Task(task) => self.leaf(location, LeafKind::Task(task.clone())),

            StepPlan::Aggregate(plans) => Arc::new(Aggregate::new(
                plans.iter().map(|plan| self.interpret(plan)).collect(),
            )),

            StepPlan::Do(plans) => {
                let mut factories = plans.iter().map(|plan| self.interpret(plan));
                match factories.next() {
                    None => Arc::new(Identity),
                    Some(first) => factories.fold(first, |acc, next| {
                        Arc::new(Compose::new(acc, next)) as SharedFactory
                    }),
                }
            }

            StepPlan::OnSuccess(hook) => Arc::new(OnSuccess::new(
                self.interpret(&hook.step),
                self.interpret(&hook.next),
            )),

            StepPlan::OnFailure(hook) => Arc::new(OnFailure::new(
                self.interpret(&hook.step),
                self.interpret(&hook.next),
            )),

            StepPlan::Ensure(hook) => Arc::new(Ensure::new(
                self.interpret(&hook.step),
                self.interpret(&hook.next),
            )),

            StepPlan::Try(plan) => Arc::new(Try::new(self.interpret(plan))),

            StepPlan::Timeout(timeout) => Arc::new(Timeout::new(
                self.interpret(&timeout.step),
                timeout.duration.clone(),
            )),

            StepPlan::Conditional(conditional) => Arc::new(Conditional::new(
                conditional.conditions.clone(),
                self.interpret(&conditional.step),
            )),

            StepPlan::Retry(retry) => {
                Arc::new(Retry::new(self.interpret(&retry.step), retry.attempts))
            }
        }
    }
}

enum LeafKind {
    Get(GetPlan),
    Put(PutPlan),
    DependentGet(GetPlan),
    Task(TaskPlan),
}

/// Constructs its leaf through the collaborator only when bound.
///
/// Combinators bind children lazily (a hook's branch, a compose's second
/// stage), so deferring the factory call keeps never-run leaves from ever
/// being constructed or acquiring delegates.
struct DeferredLeaf {
    factory: Arc<dyn Factory>,
    delegate: Arc<dyn BuildDelegate>,
    build_id: BuildId,
    location: Location,
    kind: LeafKind,
}

impl DeferredLeaf {
    fn identifier(&self, container_type: ContainerType, name: &str) -> WorkerIdentifier {
        WorkerIdentifier {
            build_id: self.build_id,
            container_type,
            name: name.to_string(),
        }
    }
}

impl StepFactory for DeferredLeaf {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        let location = self.location.clone();

        let inner = match &self.kind {
            LeafKind::Get(get) => self.factory.get(
                SourceName::new(&get.name),
                self.identifier(ContainerType::Get, &get.name),
                self.delegate.input_delegate(location),
                get.clone(),
            ),
            LeafKind::Put(put) => self.factory.put(
                self.identifier(ContainerType::Put, &put.name),
                self.delegate.output_delegate(location),
                put.clone(),
            ),
            LeafKind::DependentGet(get) => self.factory.dependent_get(
                SourceName::new(&get.name),
                self.identifier(ContainerType::Get, &get.name),
                self.delegate.input_delegate(location),
                get.clone(),
            ),
            LeafKind::Task(task) => self.factory.task(
                SourceName::new(&task.name),
                self.identifier(ContainerType::Task, &task.name),
                self.delegate.execution_delegate(location),
                task.clone(),
            ),
        };

        inner.bind(prev, registry)
    }
}
