//! The collaborator boundary producing leaf steps.
//!
//! The engine never runs a task, get, or put itself; it asks a [`Factory`]
//! for an opaque [`StepFactory`](super::step::StepFactory) per leaf plan
//! node and composes the results. Delegates are the reverse direction:
//! sinks the leaves report progress and output into.

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::core::plan::{GetPlan, PutPlan, TaskConfig, TaskPlan};
use crate::core::types::{ExitStatus, SourceName, VersionInfo, WorkerIdentifier};

use super::step::{ExecError, SharedFactory};

/// An async writer handle for a leaf's stdout or stderr.
///
/// Each call to `stdout()`/`stderr()` yields a fresh handle; a delegate
/// must tolerate concurrent use of its handles.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Sink for the lifecycle of one task step.
#[async_trait]
pub trait TaskDelegate: Send + Sync {
    /// The task's configuration has been resolved; work is about to start.
    async fn initializing(&self, config: &TaskConfig);

    /// The task process has started.
    async fn started(&self);

    /// The task process exited.
    async fn finished(&self, exit_status: ExitStatus);

    /// The task could not run to completion.
    async fn failed(&self, err: &ExecError);

    fn stdout(&self) -> ByteSink;

    fn stderr(&self) -> ByteSink;
}

/// Sink for the lifecycle of one get or put step.
#[async_trait]
pub trait ResourceDelegate: Send + Sync {
    /// The resource operation completed, possibly yielding a version.
    async fn completed(&self, exit_status: ExitStatus, version: Option<&VersionInfo>);

    /// The resource operation could not run to completion.
    async fn failed(&self, err: &ExecError);

    fn stdout(&self) -> ByteSink;

    fn stderr(&self) -> ByteSink;
}

/// Produces the opaque leaf step factories the interpreter composes.
///
/// Implemented by the worker runtime in production and by fakes in tests;
/// the engine only relies on the returned factories honoring the step
/// contract.
pub trait Factory: Send + Sync {
    /// A step that fetches a resource version and registers it under `name`.
    fn get(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        delegate: std::sync::Arc<dyn ResourceDelegate>,
        plan: GetPlan,
    ) -> SharedFactory;

    /// A step that pushes current artifacts to a resource.
    fn put(
        &self,
        id: WorkerIdentifier,
        delegate: std::sync::Arc<dyn ResourceDelegate>,
        plan: PutPlan,
    ) -> SharedFactory;

    /// A step that runs a task workload.
    fn task(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        delegate: std::sync::Arc<dyn TaskDelegate>,
        plan: TaskPlan,
    ) -> SharedFactory;

    /// A step that fetches the version its predecessor (a put) produced.
    fn dependent_get(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        delegate: std::sync::Arc<dyn ResourceDelegate>,
        plan: GetPlan,
    ) -> SharedFactory;
}
