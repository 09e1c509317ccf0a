//! Two-stage sequential composition.

use async_trait::async_trait;
use std::sync::Arc;

use super::registry::ArtifactRegistry;
use super::step::{
    pending_signal, BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step,
    StepFactory,
};

/// Runs `a`, then binds and runs `b` against `a`'s outcome.
///
/// `b` is never constructed if `a`'s run errors or a signal was observed
/// while `a` ran. The composed status is `b`'s; `a`'s success flag does
/// not gate `b` (that is [`OnSuccess`](super::on_success::OnSuccess)'s
/// job).
pub struct Compose {
    a: SharedFactory,
    b: SharedFactory,
}

impl Compose {
    pub fn new(a: SharedFactory, b: SharedFactory) -> Self {
        Self { a, b }
    }
}

impl StepFactory for Compose {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(ComposeStep {
            first: Some(self.a.bind(prev, registry)),
            second_factory: Arc::clone(&self.b),
            registry: Arc::clone(registry),
            second: None,
        })
    }
}

pub struct ComposeStep {
    first: Option<BoxStep>,
    second_factory: SharedFactory,
    registry: Arc<ArtifactRegistry>,
    second: Option<BoxStep>,
}

#[async_trait]
impl Step for ComposeStep {
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let first = self.first.as_mut().expect("compose step run twice");
        first.run(signals.clone(), ready.clone()).await?;

        if pending_signal(&signals).is_some() {
            return Err(ExecError::Interrupted);
        }

        let second = self.second_factory.bind(&first.outcome(), &self.registry);
        let second = self.second.insert(second);
        second.run(signals, ready).await
    }

    fn outcome(&self) -> Outcome {
        match (&self.first, &self.second) {
            (Some(first), Some(second)) => first.outcome().and(&second.outcome()),
            _ => Outcome::default(),
        }
    }

    async fn release(&mut self) {
        if let Some(mut second) = self.second.take() {
            second.release().await;
        }
        if let Some(mut first) = self.first.take() {
            first.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::step::{signal_channel, StepSignal};
    use crate::testing::{run_step, spawn_step, test_registry, FakeStepFactory};

    #[tokio::test]
    async fn test_runs_both_steps_in_order() {
        let a = FakeStepFactory::succeeding("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut step).await;

        assert!(result.is_ok());
        assert_eq!(a.run_count(), 1);
        assert_eq!(b.run_count(), 1);
        assert!(step.outcome().is_success());
    }

    #[tokio::test]
    async fn test_first_step_sees_the_input_outcome() {
        let a = FakeStepFactory::succeeding("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let prev = Outcome::failed();
        let mut step = compose.bind(&prev, &test_registry());
        run_step(&mut step).await.unwrap();

        assert_eq!(a.last_prev(), Some(prev));
    }

    #[tokio::test]
    async fn test_second_step_sees_first_outcome_as_predecessor() {
        let a = FakeStepFactory::failing("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        run_step(&mut step).await.unwrap();

        assert_eq!(b.last_prev(), Some(Outcome::failed()));
    }

    #[tokio::test]
    async fn test_unsuccessful_first_step_does_not_gate_second() {
        let a = FakeStepFactory::failing("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut step).await;

        assert!(result.is_ok());
        assert_eq!(b.run_count(), 1);
    }

    #[tokio::test]
    async fn test_first_step_error_skips_second() {
        let a = FakeStepFactory::erroring("a", "nope");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        let result = run_step(&mut step).await;

        assert!(matches!(result, Err(ExecError::ExecutionFailed(_))));
        assert_eq!(b.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_success_is_the_and_of_both_steps() {
        let a = FakeStepFactory::succeeding("a");
        let b = FakeStepFactory::failing("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        run_step(&mut step).await.unwrap();

        assert_eq!(step.outcome().success, Some(false));
    }

    #[tokio::test]
    async fn test_composing_with_a_trivial_second_step_preserves_failure() {
        let a = FakeStepFactory::failing("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        run_step(&mut step).await.unwrap();

        assert_eq!(step.outcome().success, Some(false));
    }

    #[tokio::test]
    async fn test_outcome_empty_when_second_never_constructed() {
        let a = FakeStepFactory::erroring("a", "nope");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        let _ = run_step(&mut step).await;

        assert_eq!(step.outcome(), Outcome::default());
    }

    #[tokio::test]
    async fn test_release_frees_both_children() {
        let a = FakeStepFactory::succeeding("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        run_step(&mut step).await.unwrap();
        step.release().await;

        assert_eq!(a.release_count(), 1);
        assert_eq!(b.release_count(), 1);
    }

    #[tokio::test]
    async fn test_release_after_first_step_error_frees_only_first() {
        let a = FakeStepFactory::erroring("a", "nope");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let mut step = compose.bind(&Outcome::succeeded(), &test_registry());
        let _ = run_step(&mut step).await;
        step.release().await;

        assert_eq!(a.release_count(), 1);
        assert_eq!(b.release_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_during_first_step_prevents_second() {
        let a = FakeStepFactory::blocking("a");
        let b = FakeStepFactory::succeeding("b");
        let compose = Compose::new(a.shared(), b.shared());

        let step = compose.bind(&Outcome::succeeded(), &test_registry());
        let (tx, rx) = signal_channel();
        let handle = spawn_step(step, rx);

        a.started().await;
        tx.send(Some(StepSignal::Interrupt)).unwrap();

        let (_step, result) = handle.await.unwrap();
        assert!(matches!(result, Err(ExecError::Interrupted)));
        assert!(a.was_signalled());
        assert_eq!(b.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_during_second_step_is_forwarded() {
        let a = FakeStepFactory::succeeding("a");
        let b = FakeStepFactory::blocking("b");
        let compose = Compose::new(a.shared(), b.shared());

        let step = compose.bind(&Outcome::succeeded(), &test_registry());
        let (tx, rx) = signal_channel();
        let handle = spawn_step(step, rx);

        b.started().await;
        tx.send(Some(StepSignal::Interrupt)).unwrap();

        let (_step, result) = handle.await.unwrap();
        assert!(matches!(result, Err(ExecError::Interrupted)));
        assert!(b.was_signalled());
    }
}
