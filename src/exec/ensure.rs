//! The always-run hook.

use async_trait::async_trait;
use std::pin::pin;
use std::sync::Arc;

use super::registry::ArtifactRegistry;
use super::step::{
    signal_channel, BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step,
    StepFactory,
};

/// Runs `next` after `step` no matter how `step` ended: success, failure,
/// hard error, or interrupt.
///
/// If both err, the guarded step's error wins. The combined success is
/// the logical AND.
pub struct Ensure {
    step: SharedFactory,
    next: SharedFactory,
}

impl Ensure {
    pub fn new(step: SharedFactory, next: SharedFactory) -> Self {
        Self { step, next }
    }
}

impl StepFactory for Ensure {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(EnsureStep {
            guarded: Some(self.step.bind(prev, registry)),
            hook_factory: Arc::clone(&self.next),
            registry: Arc::clone(registry),
            hook: None,
        })
    }
}

pub struct EnsureStep {
    guarded: Option<BoxStep>,
    hook_factory: SharedFactory,
    registry: Arc<ArtifactRegistry>,
    hook: Option<BoxStep>,
}

#[async_trait]
impl Step for EnsureStep {
    async fn run(&mut self, mut signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let guarded = self.guarded.as_mut().expect("ensure step run twice");
        let guarded_result = guarded.run(signals.clone(), ready.clone()).await;

        let hook = self.hook_factory.bind(&guarded.outcome(), &self.registry);
        let hook = self.hook.insert(hook);

        // The hook must run even when a signal already stopped the guarded
        // step, so it gets a derived channel carrying only signals that
        // arrive from here on.
        signals.mark_unchanged();
        let (hook_tx, hook_rx) = signal_channel();

        let hook_result = {
            let mut run = pin!(hook.run(hook_rx, ready));
            let mut forward = true;
            loop {
                tokio::select! {
                    result = &mut run => break result,
                    changed = signals.changed(), if forward => match changed {
                        Ok(()) => {
                            if let Some(sig) = *signals.borrow_and_update() {
                                let _ = hook_tx.send(Some(sig));
                            }
                        }
                        Err(_) => forward = false,
                    },
                }
            }
        };

        guarded_result?;
        hook_result
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
