//! The success hook.

use async_trait::async_trait;
use std::sync::Arc;

use super::registry::ArtifactRegistry;
use super::step::{
    pending_signal, BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step,
    StepFactory,
};

/// Runs `next` only after `step` completes cleanly with success.
///
/// A run error from `step` propagates without constructing the hook; a
/// clean-but-unsuccessful completion skips the hook and keeps `step`'s
/// outcome.
pub struct OnSuccess {
    step: SharedFactory,
    next: SharedFactory,
}

impl OnSuccess {
    pub fn new(step: SharedFactory, next: SharedFactory) -> Self {
        Self { step, next }
    }
}

impl StepFactory for OnSuccess {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(OnSuccessStep {
            guarded: Some(self.step.bind(prev, registry)),
            hook_factory: Arc::clone(&self.next),
            registry: Arc::clone(registry),
            hook: None,
        })
    }
}

pub struct OnSuccessStep {
    guarded: Option<BoxStep>,
    hook_factory: SharedFactory,
    registry: Arc<ArtifactRegistry>,
    hook: Option<BoxStep>,
}

#[async_trait]
impl Step for OnSuccessStep {
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let guarded = self.guarded.as_mut().expect("on-success step run twice");
        guarded.run(signals.clone(), ready.clone()).await?;

        if !guarded.outcome().is_success() {
            return Ok(());
        }

        if pending_signal(&signals).is_some() {
            return Err(ExecError::Interrupted);
        }

        let hook = self.hook_factory.bind(&guarded.outcome(), &self.registry);
        let hook = self.hook.insert(hook);
        hook.run(signals, ready).await
    }

    fn outcome(&self) -> Outcome {
        let guarded = match &self.guarded {
            Some(guarded) => guarded.outcome(),
            None => return Outcome::default(),
        };
        match &self.hook {
            Some(hook) => guarded.and(&hook.outcome()),
            None => guarded,
        }
    }

    async fn release(&mut self) {
        if let Some(mut hook) = self.hook.take() {
            hook.release().await;
        }
        if let Some(mut guarded) = self.guarded.take() {
            guarded.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::step::{signal_channel, StepSignal};
    use crate::testing::{run_step, spawn_step, test_registry, FakeStepFactory};

    #[tokio::test]
    async fn test_hook_runs_after_success() {
        let step = FakeStepFactory::succeeding("step");
        let next = FakeStepFactory::succeeding("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let mut bound = on_success.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut bound).await;

        assert!(result.is_ok());
        assert_eq!(next.run_count(), 1);
        assert!(bound.outcome().is_success());
    }

    #[tokio::test]
    async fn test_hook_skipped_on_clean_failure() {
        let step = FakeStepFactory::failing("step");
        let next = FakeStepFactory::succeeding("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let mut bound = on_success.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut bound).await;

        assert!(result.is_ok());
        assert_eq!(next.bind_count(), 0);
        assert_eq!(bound.outcome().success, Some(false));
    }

    #[tokio::test]
    async fn test_hook_skipped_on_hard_error() {
        let step = FakeStepFactory::erroring("step", "disaster");
        let next = FakeStepFactory::succeeding("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let mut bound = on_success.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut bound).await;

        assert!(matches!(result, Err(ExecError::ExecutionFailed(_))));
        assert_eq!(next.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_hook_observes_guarded_outcome_as_predecessor() {
        let step = FakeStepFactory::succeeding("step");
        let next = FakeStepFactory::succeeding("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let mut bound = on_success.bind(&Outcome::failed(), &test_registry());
        run_step(&mut bound).await.unwrap();

        assert_eq!(next.last_prev(), Some(Outcome::succeeded()));
    }

    #[tokio::test]
    async fn test_adopts_hook_status_and_success() {
        let step = FakeStepFactory::succeeding("step");
        let next = FakeStepFactory::failing("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let mut bound = on_success.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut bound).await;

        assert!(result.is_ok());
        assert_eq!(bound.outcome().success, Some(false));
    }

    #[tokio::test]
    async fn test_signal_during_guarded_step_prevents_hook() {
        let step = FakeStepFactory::blocking("step");
        let next = FakeStepFactory::succeeding("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let bound = on_success.bind(&Outcome::succeeded(), &test_registry());
        let (tx, rx) = signal_channel();
        let handle = spawn_step(bound, rx);

        step.started().await;
        tx.send(Some(StepSignal::Interrupt)).unwrap();

        let (_bound, result) = handle.await.unwrap();
        assert!(matches!(result, Err(ExecError::Interrupted)));
        assert_eq!(next.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_release_frees_guarded_and_hook() {
        let step = FakeStepFactory::succeeding("step");
        let next = FakeStepFactory::succeeding("next");
        let on_success = OnSuccess::new(step.shared(), next.shared());

        let mut bound = on_success.bind(&Outcome::succeeded(), &test_registry());
        run_step(&mut bound).await.unwrap();
        bound.release().await;

        assert_eq!(step.release_count(), 1);
        assert_eq!(next.release_count(), 1);
    }
}
