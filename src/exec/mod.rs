//! The step executor.
//!
//! Everything a build runs is a [`Step`](step::Step) bound from a
//! [`StepFactory`](step::StepFactory). Leaf steps come from the external
//! [`Factory`](factory::Factory) collaborator; this module provides the
//! combinators that compose them and the artifact registry they share.

pub mod aggregate;
pub mod compose;
pub mod conditional;
pub mod ensure;
pub mod factory;
pub mod identity;
pub mod on_failure;
pub mod on_success;
pub mod registry;
pub mod retry;
pub mod step;
pub mod timeout;
pub mod try_step;

pub use aggregate::Aggregate;
pub use compose::Compose;
pub use conditional::Conditional;
pub use ensure::Ensure;
pub use factory::{ByteSink, Factory, ResourceDelegate, TaskDelegate};
pub use identity::{Identity, IdentityStep};
pub use on_failure::OnFailure;
pub use on_success::OnSuccess;
pub use registry::{
    ArtifactDestination, ArtifactError, ArtifactReader, ArtifactRegistry, ArtifactSource,
};
pub use retry::Retry;
pub use step::{
    pending_signal, signal_channel, signal_received, BoxStep, ExecError, Outcome, ReadyLatch,
    ReadyWaiter, SharedFactory, SignalRx, SignalTx, Step, StepFactory, StepSignal,
};
pub use timeout::Timeout;
pub use try_step::Try;
