//! The step contract.
//!
//! Every runnable unit in a build obeys the same lifecycle: it is bound
//! from a [`StepFactory`], [`run`](Step::run) exactly once, observed
//! through [`outcome`](Step::outcome), and [`released`](Step::release)
//! exactly once after run returns. Cancellation is cooperative: a watch
//! channel of [`StepSignal`]s fans out to every running step, and a step
//! must not start new children after it has observed a signal.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::core::types::{ExitStatus, SourceName, VersionInfo};

use super::registry::{ArtifactError, ArtifactRegistry};

/// External cancellation hint delivered to running steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSignal {
    /// Graceful stop: finish up and return promptly.
    Interrupt,
    /// Hard stop: abandon work immediately.
    Kill,
}

/// Sending half of the cancellation fan-out.
pub type SignalTx = watch::Sender<Option<StepSignal>>;

/// Receiving half of the cancellation fan-out; cheap to clone per child.
pub type SignalRx = watch::Receiver<Option<StepSignal>>;

/// Create a signal channel with no signal pending.
pub fn signal_channel() -> (SignalTx, SignalRx) {
    watch::channel(None)
}

/// Resolve once a signal is pending on the channel.
///
/// Never resolves if the sender is dropped without signalling, so it is
/// safe to park on one branch of a `select!`.
pub async fn signal_received(rx: &mut SignalRx) -> StepSignal {
    loop {
        if let Some(sig) = *rx.borrow_and_update() {
            return sig;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The signal currently pending, if any, without consuming it.
pub fn pending_signal(rx: &SignalRx) -> Option<StepSignal> {
    *rx.borrow()
}

/// Marks a step as having reached a stable running state.
///
/// Idempotent: composites hand clones to children as they start, and the
/// first child to become ready satisfies the latch.
#[derive(Clone)]
pub struct ReadyLatch {
    tx: watch::Sender<bool>,
}

/// Awaits a [`ReadyLatch`].
pub struct ReadyWaiter {
    rx: watch::Receiver<bool>,
}

impl ReadyLatch {
    pub fn new() -> (ReadyLatch, ReadyWaiter) {
        let (tx, rx) = watch::channel(false);
        (ReadyLatch { tx }, ReadyWaiter { rx })
    }

    /// Mark ready. Later calls are no-ops.
    pub fn ready(&self) {
        let _ = self.tx.send(true);
    }
}

impl ReadyWaiter {
    /// Resolve once the latch is marked ready, or once every latch handle
    /// has been dropped (the step finished without marking ready).
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Typed result snapshot of a completed step.
///
/// `None` fields mean the step never populated that slot; a composite
/// whose observable child was never constructed reports an empty outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub success: Option<bool>,
    pub version: Option<VersionInfo>,
    pub exit_status: Option<ExitStatus>,
}

impl Outcome {
    /// Outcome of a cleanly completed step with nothing else to report.
    pub fn succeeded() -> Self {
        Self {
            success: Some(true),
            ..Self::default()
        }
    }

    /// Outcome of a clean completion that did not succeed.
    pub fn failed() -> Self {
        Self {
            success: Some(false),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_exit_status(mut self, exit_status: ExitStatus) -> Self {
        self.exit_status = Some(exit_status);
        self
    }

    /// Whether the step reported a successful completion.
    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }

    /// Combine a guarded step's outcome with its hook's.
    ///
    /// Success is the logical AND; version and exit status prefer the
    /// later (hook) step's slots, falling back to the guarded step's.
    pub fn and(&self, next: &Outcome) -> Outcome {
        Outcome {
            success: Some(self.is_success() && next.is_success()),
            version: next.version.clone().or_else(|| self.version.clone()),
            exit_status: next.exit_status.or(self.exit_status),
        }
    }
}

/// Terminal causes of a step run.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Externally-requested cancellation.
    #[error("interrupted")]
    Interrupted,

    /// The enclosing timeout combinator tripped.
    #[error("step exceeded timeout limit")]
    Timeout,

    /// The timeout duration text could not be parsed.
    #[error("invalid duration '{text}': {source}")]
    InvalidDuration {
        text: String,
        source: humantime::DurationError,
    },

    /// A required artifact source was not in the registry.
    #[error("unknown artifact source: {0}")]
    UnknownArtifact(SourceName),

    /// Artifact streaming failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// A leaf workload failed to run.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ExecError {
    /// Check for the cancellation sentinel.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ExecError::Interrupted)
    }

    /// Check for the timeout sentinel.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout)
    }
}

/// A runnable unit of a build.
#[async_trait]
pub trait Step: Send {
    /// Run the step to completion.
    ///
    /// Invoked exactly once per bound step. Marks `ready` once the step
    /// (and its children, if any) have reached a stable running state.
    /// Signals pending on `signals` must be honored promptly; a step
    /// returns [`ExecError::Interrupted`] when cancelled.
    async fn run(&mut self, signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError>;

    /// Result snapshot. Valid after `run` returns and before `release`.
    fn outcome(&self) -> Outcome;

    /// Free step-owned resources.
    ///
    /// Called exactly once per bound step, after `run` has returned.
    /// Composite steps release every child they constructed, in reverse
    /// construction order. Idempotent.
    async fn release(&mut self) {}
}

/// A deferred step: a blueprint awaiting the predecessor's outcome and
/// the build's artifact registry.
pub trait StepFactory: Send + Sync {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep;
}

pub type BoxStep = Box<dyn Step>;

pub type SharedFactory = Arc<dyn StepFactory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_succeeded() {
        let outcome = Outcome::succeeded();
        assert!(outcome.is_success());
        assert!(outcome.version.is_none());
        assert!(outcome.exit_status.is_none());
    }

    #[test]
    fn test_outcome_failed_is_populated_but_unsuccessful() {
        let outcome = Outcome::failed();
        assert_eq!(outcome.success, Some(false));
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_empty_outcome_is_not_success() {
        assert!(!Outcome::default().is_success());
    }

    #[test]
    fn test_exec_error_sentinels() {
        assert!(ExecError::Interrupted.is_interrupted());
        assert!(ExecError::Timeout.is_timeout());
        assert!(!ExecError::ExecutionFailed("nope".into()).is_interrupted());
    }

    #[test]
    fn test_exec_error_display() {
        assert_eq!(ExecError::Interrupted.to_string(), "interrupted");
        assert_eq!(
            ExecError::Timeout.to_string(),
            "step exceeded timeout limit"
        );
    }

    #[tokio::test]
    async fn test_signal_received_resolves_on_signal() {
        let (tx, mut rx) = signal_channel();

        tx.send(Some(StepSignal::Interrupt)).unwrap();

        assert_eq!(signal_received(&mut rx).await, StepSignal::Interrupt);
    }

    #[tokio::test]
    async fn test_signal_received_pends_without_signal() {
        let (_tx, mut rx) = signal_channel();

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(20), signal_received(&mut rx))
                .await;

        assert!(result.is_err(), "should still be waiting");
    }

    #[test]
    fn test_pending_signal_observes_without_consuming() {
        let (tx, rx) = signal_channel();
        assert_eq!(pending_signal(&rx), None);

        tx.send(Some(StepSignal::Kill)).unwrap();
        assert_eq!(pending_signal(&rx), Some(StepSignal::Kill));
        assert_eq!(pending_signal(&rx), Some(StepSignal::Kill));
    }

    #[tokio::test]
    async fn test_ready_latch_wakes_waiter() {
        let (latch, mut waiter) = ReadyLatch::new();
        assert!(!waiter.is_ready());

        latch.ready();
        waiter.wait().await;

        assert!(waiter.is_ready());
    }

    #[tokio::test]
    async fn test_ready_latch_is_idempotent() {
        let (latch, mut waiter) = ReadyLatch::new();
        let clone = latch.clone();

        latch.ready();
        clone.ready();
        waiter.wait().await;

        assert!(waiter.is_ready());
    }

    #[tokio::test]
    async fn test_dropped_latch_releases_waiter() {
        let (latch, mut waiter) = ReadyLatch::new();

        drop(latch);
        waiter.wait().await;

        assert!(!waiter.is_ready());
    }
}
