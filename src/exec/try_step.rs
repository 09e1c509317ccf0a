//! The non-fatal wrapper.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::registry::ArtifactRegistry;
use super::step::{
    BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step, StepFactory,
};

/// Makes a subtree non-fatal: run errors and unsuccessful completions are
/// suppressed, surfacing a clean successful outcome.
///
/// [`ExecError::Interrupted`] is the exception and propagates: a
/// cancelled build must terminate promptly instead of letting a Try
/// subtree convert the abort into success.
pub struct Try {
    step: SharedFactory,
}

impl Try {
    pub fn new(step: SharedFactory) -> Self {
        Self { step }
    }
}

impl StepFactory for Try {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(TryStep {
            inner: Some(self.step.bind(prev, registry)),
        })
    }
}

pub struct TryStep {
    inner: Option<BoxStep>,
}

#[async_trait]
impl Step for TryStep {
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let inner = self.inner.as_mut().expect("try step run twice");

        match inner.run(signals, ready).await {
            Err(ExecError::Interrupted) => Err(ExecError::Interrupted),
            Err(err) => {
                debug!(error = %err, "suppressing subtree failure");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn outcome(&self) -> Outcome {
        let mut outcome = match &self.inner {
            Some(inner) => inner.outcome(),
            None => Outcome::default(),
        };
        outcome.success = Some(true);
        outcome
    }

    async fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.release().await;
        }
    }
}
