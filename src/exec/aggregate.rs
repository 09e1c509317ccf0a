//! Parallel fan-out over a set of steps.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

use super::registry::ArtifactRegistry;
use super::step::{
    BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step, StepFactory,
};

/// Binds all children eagerly against the same predecessor and registry,
/// then runs them in parallel.
///
/// All children finish before the aggregate's run returns; the terminal
/// error is the first erroring child in plan order. The aggregate's
/// success is the logical AND of its children's.
pub struct Aggregate {
    factories: Vec<SharedFactory>,
}

impl Aggregate {
    pub fn new(factories: Vec<SharedFactory>) -> Self {
        Self { factories }
    }
}

impl StepFactory for Aggregate {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(AggregateStep {
            children: self
                .factories
                .iter()
                .map(|factory| Some(factory.bind(prev, registry)))
                .collect(),
        })
    }
}

pub struct AggregateStep {
    children: Vec<Option<BoxStep>>,
}

#[async_trait]
impl Step for AggregateStep {
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let child_count = self.children.len();
        let mut join = JoinSet::new();
        let mut waiters = Vec::with_capacity(child_count);

        for (idx, slot) in self.children.iter_mut().enumerate() {
            let mut child = slot.take().expect("aggregate step run twice");
            let child_signals = signals.clone();
            let (latch, waiter) = ReadyLatch::new();
            waiters.push(waiter);

            join.spawn(async move {
                let result = child.run(child_signals, latch).await;
                (idx, child, result)
            });
        }

        // Ready once every child is ready (or already finished).
        for waiter in &mut waiters {
            waiter.wait().await;
        }
        ready.ready();

        let mut results: Vec<Option<Result<(), ExecError>>> =
            (0..child_count).map(|_| None).collect();
        let mut panicked = None;

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((idx, child, result)) => {
                    self.children[idx] = Some(child);
                    results[idx] = Some(result);
                }
                Err(err) => {
                    debug!(error = %err, "aggregate child task died");
                    panicked = Some(err.to_string());
                }
            }
        }

        for result in results.into_iter().flatten() {
            result?;
        }

        if let Some(msg) = panicked {
            return Err(ExecError::ExecutionFailed(msg));
        }

        Ok(())
    }

    fn outcome(&self) -> Outcome {
        let success = self
            .children
            .iter()
            .all(|child| matches!(child, Some(child) if child.outcome().is_success()));

        Outcome {
            success: Some(success),
            ..Outcome::default()
        }
    }

    async fn release(&mut self) {
        for slot in self.children.iter_mut().rev() {
            if let Some(mut child) = slot.take() {
                child.release().await;
            }
        }
    }
}
