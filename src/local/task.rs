//! Task steps that run as local processes.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::core::plan::{TaskConfig, TaskPlan};
use crate::core::types::{ExitStatus, SourceName, WorkerIdentifier};
use crate::exec::{
    pending_signal, signal_received, ArtifactRegistry, BoxStep, ExecError, Outcome, ReadyLatch,
    SignalRx, Step, StepFactory, TaskDelegate,
};

use super::artifacts::{DirArtifactDestination, DirArtifactSource};

/// Binds task plans to steps that run the configured process in a
/// scratch workspace on this machine.
pub struct LocalTaskFactory {
    pub(super) name: SourceName,
    pub(super) id: WorkerIdentifier,
    pub(super) delegate: Arc<dyn TaskDelegate>,
    pub(super) plan: TaskPlan,
}

impl StepFactory for LocalTaskFactory {
    fn bind(&self, _prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(LocalTaskStep {
            name: self.name.clone(),
            id: self.id.clone(),
            delegate: Arc::clone(&self.delegate),
            plan: self.plan.clone(),
            registry: Arc::clone(registry),
            workspace: None,
            exit_status: None,
        })
    }
}

struct LocalTaskStep {
    name: SourceName,
    id: WorkerIdentifier,
    delegate: Arc<dyn TaskDelegate>,
    plan: TaskPlan,
    registry: Arc<ArtifactRegistry>,
    workspace: Option<TempDir>,
    exit_status: Option<ExitStatus>,
}

impl LocalTaskStep {
    async fn stage_inputs(&self, config: &TaskConfig, workspace: &TempDir) -> Result<(), ExecError> {
        for input in &config.inputs {
            let name = SourceName::new(&input.name);
            let source = self
                .registry
                .lookup(&name)
                .ok_or(ExecError::UnknownArtifact(name))?;

            let target = workspace
                .path()
                .join(input.path.as_deref().unwrap_or(&input.name));
            tokio::fs::create_dir_all(&target).await?;
            source
                .stream_to(&DirArtifactDestination::new(&target))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Step for LocalTaskStep {
    async fn run(&mut self, mut signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let config = self.plan.config.clone().ok_or_else(|| {
            ExecError::ExecutionFailed(format!("task '{}' has no config", self.id.name))
        })?;

        self.delegate.initializing(&config).await;

        let workspace = TempDir::new()?;
        self.stage_inputs(&config, &workspace).await?;

        if let Some(_sig) = pending_signal(&signals) {
            return Err(ExecError::Interrupted);
        }

        debug!(task = %self.id.name, path = %config.run.path, "spawning task process");
        let spawned = Command::new(&config.run.path)
            .args(&config.run.args)
            .envs(&config.params)
            .current_dir(workspace.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                let err = ExecError::ExecutionFailed(format!(
                    "failed to spawn '{}': {}",
                    config.run.path, err
                ));
                self.delegate.failed(&err).await;
                return Err(err);
            }
        };

        self.delegate.started().await;
        ready.ready();

        // Pump output into the delegate's writers while the process runs.
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");
        let mut stdout_sink = self.delegate.stdout();
        let mut stderr_sink = self.delegate.stderr();
        let pump = async {
            let _ = tokio::join!(
                tokio::io::copy(&mut stdout, &mut stdout_sink),
                tokio::io::copy(&mut stderr, &mut stderr_sink),
            );
        };

        let status = tokio::select! {
            (status, ()) = async { tokio::join!(child.wait(), pump) } => status?,
            sig = signal_received(&mut signals) => {
                debug!(task = %self.id.name, ?sig, "killing task process");
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.delegate.failed(&ExecError::Interrupted).await;
                self.workspace = Some(workspace);
                return Err(ExecError::Interrupted);
            }
        };

        let exit_status = status.code().unwrap_or(-1);
        self.exit_status = Some(exit_status);
        self.delegate.finished(exit_status).await;

        // The workspace doubles as the task's output artifact.
        self.registry.register(
            self.name.clone(),
            Arc::new(DirArtifactSource::new(workspace.path())),
        );
        self.workspace = Some(workspace);

        Ok(())
    }

    fn outcome(&self) -> Outcome {
        match self.exit_status {
            Some(exit_status) => Outcome {
                success: Some(exit_status == 0),
                version: None,
                exit_status: Some(exit_status),
            },
            None => Outcome::default(),
        }
    }

    async fn release(&mut self) {
        self.workspace.take();
    }
}
