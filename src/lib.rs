pub mod config;
pub mod core;
pub mod engine;
pub mod exec;
pub mod local;
pub mod testing;

pub use crate::core::plan::{
    Condition, ConditionalPlan, GetPlan, HookPlan, Location, Plan, PutPlan, RetryPlan, StepPlan,
    TaskConfig, TaskInputConfig, TaskPlan, TaskRunConfig, TimeoutPlan,
};
pub use crate::core::types::{
    BuildId, BuildModel, ContainerType, ExitStatus, MetadataField, Params, RunId, SourceName,
    Version, VersionInfo, WorkerIdentifier,
};

pub use crate::engine::delegate::{
    BuildDelegate, BuildDelegateFactory, LoggingBuildDelegate, LoggingBuildDelegateFactory,
};
pub use crate::engine::{AbortHandle, Build, BuildResult, Engine, EngineError};

pub use crate::exec::{
    ArtifactDestination, ArtifactError, ArtifactReader, ArtifactRegistry, ArtifactSource, BoxStep,
    ByteSink, ExecError, Factory, Outcome, ReadyLatch, ReadyWaiter, ResourceDelegate,
    SharedFactory, SignalRx, SignalTx, Step, StepFactory, StepSignal, TaskDelegate,
};

pub use crate::config::{load_plan_file, ConfigError, PlanFile};

pub use crate::local::{DirArtifactDestination, DirArtifactSource, LocalFactory};
