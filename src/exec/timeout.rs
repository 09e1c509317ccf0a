//! The deadline combinator.

use async_trait::async_trait;
use std::pin::pin;
use std::sync::Arc;
use tracing::debug;

use super::registry::ArtifactRegistry;
use super::step::{
    signal_channel, BoxStep, ExecError, Outcome, ReadyLatch, SharedFactory, SignalRx, Step,
    StepFactory, StepSignal,
};

/// Imposes a deadline on a subtree.
///
/// The duration text (`"50ms"`, `"10s"`, `"1h30m"`) is parsed when the
/// step runs; a parse error fails the step before the child starts. When
/// the timer fires first, the child is killed, awaited, and the step
/// returns [`ExecError::Timeout`]. External signals are forwarded to the
/// child and their outcome wins over the timer's.
pub struct Timeout {
    step: SharedFactory,
    duration: String,
}

impl Timeout {
    pub fn new(step: SharedFactory, duration: impl Into<String>) -> Self {
        Self {
            step,
            duration: duration.into(),
        }
    }
}

impl StepFactory for Timeout {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(TimeoutStep {
            inner: Some(self.step.bind(prev, registry)),
            duration: self.duration.clone(),
            timed_out: false,
        })
    }
}

pub struct TimeoutStep {
    inner: Option<BoxStep>,
    duration: String,
    timed_out: bool,
}

#[async_trait]
impl Step for TimeoutStep {
    async fn run(&mut self, mut signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let duration =
            humantime::parse_duration(&self.duration).map_err(|source| ExecError::InvalidDuration {
                text: self.duration.clone(),
                source,
            })?;

        let inner = self.inner.as_mut().expect("timeout step run twice");

        let (inner_tx, inner_rx) = signal_channel();
        if let Some(sig) = *signals.borrow_and_update() {
            let _ = inner_tx.send(Some(sig));
        }

        let run_result = {
            let mut run = pin!(inner.run(inner_rx, ready));
            let timer = tokio::time::sleep(duration);
            let mut timer = pin!(timer);
            let mut forward = true;

            loop {
                tokio::select! {
                    result = &mut run => break result,
                    _ = &mut timer, if !self.timed_out => {
                        debug!(duration = %self.duration, "timeout elapsed, killing step");
                        self.timed_out = true;
                        let _ = inner_tx.send(Some(StepSignal::Kill));
                    }
                    changed = signals.changed(), if forward => match changed {
                        Ok(()) => {
                            if let Some(sig) = *signals.borrow_and_update() {
                                let _ = inner_tx.send(Some(sig));
                            }
                        }
                        Err(_) => forward = false,
                    },
                }
            }
        };

        if self.timed_out {
            return Err(ExecError::Timeout);
        }

        run_result
    }

    fn outcome(&self) -> Outcome {
        let mut outcome = match &self.inner {
            Some(inner) => inner.outcome(),
            None => Outcome::default(),
        };
        outcome.success = Some(outcome.is_success() && !self.timed_out);
        outcome
    }

    async fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.release().await;
        }
    }
}
