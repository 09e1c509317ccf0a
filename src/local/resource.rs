//! Get and put steps backed by local directories.
//!
//! The local runner models a resource as a directory named by the
//! resource's `source.path`. A get exposes that directory to the build; a
//! put streams every registered artifact into it and reports a version.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::core::plan::{GetPlan, PutPlan};
use crate::core::types::{MetadataField, SourceName, Version, VersionInfo, WorkerIdentifier};
use crate::exec::{
    ArtifactRegistry, ArtifactSource, BoxStep, ExecError, Outcome, ReadyLatch, ResourceDelegate,
    SignalRx, Step, StepFactory,
};

use super::artifacts::{DirArtifactDestination, DirArtifactSource};

fn source_path(params: &crate::core::types::Params, what: &str) -> Result<String, ExecError> {
    params
        .get("path")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| ExecError::ExecutionFailed(format!("{} requires a source path", what)))
}

fn path_version(path: &str) -> VersionInfo {
    let mut version = Version::new();
    version.insert("path".to_string(), path.to_string());
    VersionInfo {
        version,
        metadata: Vec::new(),
    }
}

/// Binds get plans to steps exposing a local directory.
pub struct LocalGetFactory {
    pub(super) name: SourceName,
    pub(super) id: WorkerIdentifier,
    pub(super) delegate: Arc<dyn ResourceDelegate>,
    pub(super) plan: GetPlan,
}

impl StepFactory for LocalGetFactory {
    fn bind(&self, _prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(LocalGetStep {
            name: self.name.clone(),
            id: self.id.clone(),
            delegate: Arc::clone(&self.delegate),
            path: source_path(&self.plan.source, "get"),
            pinned: self.plan.version.clone(),
            registry: Arc::clone(registry),
            version: None,
        })
    }
}

struct LocalGetStep {
    name: SourceName,
    id: WorkerIdentifier,
    delegate: Arc<dyn ResourceDelegate>,
    path: Result<String, ExecError>,
    pinned: Option<Version>,
    registry: Arc<ArtifactRegistry>,
    version: Option<VersionInfo>,
}

#[async_trait]
impl Step for LocalGetStep {
    async fn run(&mut self, _signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let path = match std::mem::replace(&mut self.path, Ok(String::new())) {
            Ok(path) => path,
            Err(err) => {
                self.delegate.failed(&err).await;
                return Err(err);
            }
        };

        if let Err(err) = tokio::fs::metadata(&path).await {
            let err = ExecError::ExecutionFailed(format!(
                "get '{}': source path '{}' is unusable: {}",
                self.id.name, path, err
            ));
            self.delegate.failed(&err).await;
            return Err(err);
        }

        debug!(get = %self.id.name, path = %path, "exposing directory");
        self.registry
            .register(self.name.clone(), Arc::new(DirArtifactSource::new(&path)));

        let version = match &self.pinned {
            Some(pinned) => VersionInfo {
                version: pinned.clone(),
                metadata: Vec::new(),
            },
            None => path_version(&path),
        };
        self.delegate.completed(0, Some(&version)).await;
        self.version = Some(version);

        ready.ready();
        Ok(())
    }

    fn outcome(&self) -> Outcome {
        match &self.version {
            Some(version) => Outcome::succeeded()
                .with_version(version.clone())
                .with_exit_status(0),
            None => Outcome::default(),
        }
    }
}

/// Binds put plans to steps streaming the build's artifacts into a local
/// directory.
pub struct LocalPutFactory {
    pub(super) id: WorkerIdentifier,
    pub(super) delegate: Arc<dyn ResourceDelegate>,
    pub(super) plan: PutPlan,
}

impl StepFactory for LocalPutFactory {
    fn bind(&self, _prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        Box::new(LocalPutStep {
            id: self.id.clone(),
            delegate: Arc::clone(&self.delegate),
            path: source_path(&self.plan.source, "put"),
            registry: Arc::clone(registry),
            version: None,
        })
    }
}

struct LocalPutStep {
    id: WorkerIdentifier,
    delegate: Arc<dyn ResourceDelegate>,
    path: Result<String, ExecError>,
    registry: Arc<ArtifactRegistry>,
    version: Option<VersionInfo>,
}

#[async_trait]
impl Step for LocalPutStep {
    async fn run(&mut self, _signals: SignalRx, ready: ReadyLatch) -> Result<(), ExecError> {
        let path = match std::mem::replace(&mut self.path, Ok(String::new())) {
            Ok(path) => path,
            Err(err) => {
                self.delegate.failed(&err).await;
                return Err(err);
            }
        };

        tokio::fs::create_dir_all(&path).await?;

        let sources = self.registry.snapshot();
        debug!(put = %self.id.name, path = %path, sources = sources.len(), "streaming artifacts");
        self.registry
            .stream_to(&DirArtifactDestination::new(&path))
            .await?;

        let mut version = path_version(&path);
        version.metadata.push(MetadataField {
            name: "sources".to_string(),
            value: sources.len().to_string(),
        });
        self.delegate.completed(0, Some(&version)).await;
        self.version = Some(version);

        ready.ready();
        Ok(())
    }

    fn outcome(&self) -> Outcome {
        match &self.version {
            Some(version) => Outcome::succeeded()
                .with_version(version.clone())
                .with_exit_status(0),
            None => Outcome::default(),
        }
    }
}

/// Binds dependent-get plans to steps exposing whatever directory the
/// preceding put reported in its version.
pub struct LocalDependentGetFactory {
    pub(super) name: SourceName,
    pub(super) id: WorkerIdentifier,
    pub(super) delegate: Arc<dyn ResourceDelegate>,
    pub(super) plan: GetPlan,
}

impl StepFactory for LocalDependentGetFactory {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        let inherited = prev
            .version
            .as_ref()
            .and_then(|info| info.version.get("path").cloned());

        Box::new(LocalGetStep {
            name: self.name.clone(),
            id: self.id.clone(),
            delegate: Arc::clone(&self.delegate),
            path: inherited.ok_or_else(|| {
                ExecError::ExecutionFailed(format!(
                    "dependent get '{}' has no predecessor version",
                    self.plan.name
                ))
            }),
            pinned: None,
            registry: Arc::clone(registry),
            version: None,
        })
    }
}
