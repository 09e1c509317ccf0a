//! The trivial step.

use async_trait::async_trait;
use std::sync::Arc;

use super::registry::ArtifactRegistry;
use super::step::{BoxStep, ExecError, Outcome, ReadyLatch, SignalRx, Step, StepFactory};

/// Factory for a step that does nothing and succeeds.
///
/// Used as the filler for missing plan branches and as the predecessor of
/// a build's root step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl StepFactory for Identity {
    fn bind(&self, _prev: &Outcome, _registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(IdentityStep)
    }
}

/// A bound no-op: marks ready, reports success, returns immediately.
#[derive(Debug, Default)]
pub struct IdentityStep;

#[async_trait]
impl Step for IdentityStep {
    async fn run(&mut self, _signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        ready.ready();
        Ok(())
    }

    fn outcome(&self) -> Outcome {
        Outcome::succeeded()
    }
}
