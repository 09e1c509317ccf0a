//! The retry combinator.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::registry::ArtifactRegistry;
use super::step::{
    pending_signal, BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step,
    StepFactory,
};

/// Re-binds and re-runs its sub-factory until an attempt succeeds or all
/// attempts are spent.
///
/// Every attempt observes the original predecessor outcome. An interrupt
/// (or a signal pending between attempts) stops retrying immediately. The
/// last attempt's outcome and status stand; every bound attempt is
/// released.
pub struct Retry {
    step: SharedFactory,
    attempts: u32,
}

impl Retry {
    pub fn new(step: SharedFactory, attempts: u32) -> Self {
        Self {
            step,
            attempts: attempts.max(1),
        }
    }
}

impl StepFactory for Retry {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(RetryStep {
            factory: Arc::clone(&self.step),
            attempts: self.attempts,
            prev: prev.clone(),
            registry: Arc::clone(registry),
            runs: Vec::new(),
        })
    }
}

pub struct RetryStep {
    factory: SharedFactory,
    attempts: u32,
    prev: Outcome,
    registry: Arc<ArtifactRegistry>,
    runs: Vec<BoxStep>,
}

#[async_trait]
impl Step for RetryStep {
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        for attempt in 1..=self.attempts {
            if pending_signal(&signals).is_some() {
                return Err(ExecError::Interrupted);
            }

            let mut step = self.factory.bind(&self.prev, &self.registry);
            let result = step.run(signals.clone(), ready.clone()).await;
            let succeeded = step.outcome().is_success();
            self.runs.push(step);

            let last_attempt = attempt == self.attempts;
            match result {
                Err(ExecError::Interrupted) => return Err(ExecError::Interrupted),
                Err(err) if last_attempt => return Err(err),
                Err(err) => {
                    debug!(attempt, error = %err, "attempt errored, retrying");
                }
                Ok(()) if succeeded || last_attempt => return Ok(()),
                Ok(()) => {
                    debug!(attempt, "attempt unsuccessful, retrying");
                }
            }
        }

        unreachable!("retry loop always returns within its attempts")
    }

    fn outcome(&self) -> Outcome {
        match self.runs.last() {
            Some(step) => step.outcome(),
            None => Outcome::default(),
        }
    }

    async fn release(&mut self) {
        for mut step in self.runs.drain(..).rev() {
            step.release().await;
        }
    }
}
