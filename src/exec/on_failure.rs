//! The failure hook.

use async_trait::async_trait;
use std::sync::Arc;

use super::registry::ArtifactRegistry;
use super::step::{
    pending_signal, BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step,
    StepFactory,
};

/// Runs `next` only after `step` completes cleanly without success.
///
/// Hard run errors bypass the hook entirely and propagate; the hook fires
/// on a *reported* unsuccessful completion, nothing else. Running the
/// hook does not redeem the failure: the combined outcome stays
/// unsuccessful.
pub struct OnFailure {
    step: SharedFactory,
    next: SharedFactory,
}

impl OnFailure {
    pub fn new(step: SharedFactory, next: SharedFactory) -> Self {
        Self { step, next }
    }
}

impl StepFactory for OnFailure {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(OnFailureStep {
            guarded: Some(self.step.bind(prev, registry)),
            hook_factory: Arc::clone(&self.next),
            registry: Arc::clone(registry),
            hook: None,
        })
    }
}

pub struct OnFailureStep {
    guarded: Option<BoxStep>,
    hook_factory: SharedFactory,
    registry: Arc<ArtifactRegistry>,
    hook: Option<BoxStep>,
}

#[async_trait]
impl Step for OnFailureStep {
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let guarded = self.guarded.as_mut().expect("on-failure step run twice");
        guarded.run(signals.clone(), ready.clone()).await?;

        if guarded.outcome().is_success() {
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
