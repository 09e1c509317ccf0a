//! Build-level delegates.
//!
//! A [`BuildDelegate`] is the sink a build reports into: it hands out
//! per-leaf delegates (tagged with the plan location) as the interpreter
//! constructs leaves, and receives exactly one `finish` when the build is
//! over. The engine only consumes these traits; the surrounding service
//! decides where the data goes.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::plan::{Location, TaskConfig};
use crate::core::types::{BuildModel, ExitStatus, VersionInfo};
use crate::exec::{ByteSink, ExecError, ResourceDelegate, TaskDelegate};

/// Sink for one build's lifecycle.
#[async_trait]
pub trait BuildDelegate: Send + Sync {
    /// Delegate for a Get (or DependentGet) leaf at the given location.
    fn input_delegate(&self, location: Location) -> Arc<dyn ResourceDelegate>;

    /// Delegate for a Put leaf at the given location.
    fn output_delegate(&self, location: Location) -> Arc<dyn ResourceDelegate>;

    /// Delegate for a Task leaf at the given location.
    fn execution_delegate(&self, location: Location) -> Arc<dyn TaskDelegate>;

    /// The build is about to run its root step.
    async fn start(&self);

    /// The build is over. Called exactly once, after all status
    /// callbacks; `aborted` means an external signal stopped the build.
    async fn finish(&self, err: Option<&ExecError>, succeeded: bool, aborted: bool);
}

/// Produces one delegate per build.
pub trait BuildDelegateFactory: Send + Sync {
    fn delegate(&self, build: &BuildModel) -> Arc<dyn BuildDelegate>;
}

/// A delegate that reports build progress through `tracing` and pipes
/// leaf output to the process's own stdout and stderr.
pub struct LoggingBuildDelegate {
    build: BuildModel,
}

impl LoggingBuildDelegate {
    pub fn new(build: BuildModel) -> Self {
        Self { build }
    }
}

#[async_trait]
impl BuildDelegate for LoggingBuildDelegate {
    fn input_delegate(&self, location: Location) -> Arc<dyn ResourceDelegate> {
        Arc::new(LoggingResourceDelegate {
            kind: "get",
            location,
        })
    }

    fn output_delegate(&self, location: Location) -> Arc<dyn ResourceDelegate> {
        Arc::new(LoggingResourceDelegate {
            kind: "put",
            location,
        })
    }

    fn execution_delegate(&self, location: Location) -> Arc<dyn TaskDelegate> {
        Arc::new(LoggingTaskDelegate { location })
    }

    async fn start(&self) {
        info!(build = self.build.id, name = %self.build.name, "build started");
    }

    async fn finish(&self, err: Option<&ExecError>, succeeded: bool, aborted: bool) {
        match err {
            Some(err) if aborted => warn!(build = self.build.id, error = %err, "build aborted"),
            Some(err) => error!(build = self.build.id, error = %err, "build errored"),
            None if succeeded => info!(build = self.build.id, "build succeeded"),
            None => warn!(build = self.build.id, "build failed"),
        }
    }
}

/// Hands every build a [`LoggingBuildDelegate`].
#[derive(Default)]
pub struct LoggingBuildDelegateFactory;

impl BuildDelegateFactory for LoggingBuildDelegateFactory {
    fn delegate(&self, build: &BuildModel) -> Arc<dyn BuildDelegate> {
        Arc::new(LoggingBuildDelegate::new(build.clone()))
    }
}

struct LoggingTaskDelegate {
    location: Location,
}

#[async_trait]
impl TaskDelegate for LoggingTaskDelegate {
    async fn initializing(&self, config: &TaskConfig) {
        info!(id = self.location.id, path = %config.run.path, "task initializing");
    }

    async fn started(&self) {
        info!(id = self.location.id, "task started");
    }

    async fn finished(&self, exit_status: ExitStatus) {
        info!(id = self.location.id, exit_status, "task finished");
    }

    async fn failed(&self, err: &ExecError) {
        warn!(id = self.location.id, error = %err, "task failed");
    }

    fn stdout(&self) -> ByteSink {
        Box::new(tokio::io::stdout())
    }

    fn stderr(&self) -> ByteSink {
        Box::new(tokio::io::stderr())
    }
}

struct LoggingResourceDelegate {
    kind: &'static str,
    location: Location,
}

#[async_trait]
impl ResourceDelegate for LoggingResourceDelegate {
    async fn completed(&self, exit_status: ExitStatus, version: Option<&VersionInfo>) {
        info!(
            kind = self.kind,
            id = self.location.id,
            exit_status,
            has_version = version.is_some(),
            "resource step completed"
        );
    }

    async fn failed(&self, err: &ExecError) {
        warn!(kind = self.kind, id = self.location.id, error = %err, "resource step failed");
    }

    fn stdout(&self) -> ByteSink {
        Box::new(tokio::io::stdout())
    }

    fn stderr(&self) -> ByteSink {
        Box::new(tokio::io::stderr())
    }
}
