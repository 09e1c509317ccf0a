//! Core identifier types for the build engine.
//!
//! These types provide type-safe identifiers for builds, artifact sources,
//! and the worker containers that leaf steps run in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Name under which an artifact source is registered for the build.
///
/// Derived from the plan node's `name` field; must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceName(String);

/// Database identifier of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(i64);

/// Unique identifier for one execution of a build (one `resume`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl SourceName {
    /// Create a new SourceName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (invalid as a registry key).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SourceName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl BuildId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for BuildId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of container a leaf step runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Get,
    Put,
    Task,
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerType::Get => write!(f, "get"),
            ContainerType::Put => write!(f, "put"),
            ContainerType::Task => write!(f, "task"),
        }
    }
}

/// Identifies the workload a leaf step represents, for the worker runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentifier {
    pub build_id: BuildId,
    pub container_type: ContainerType,
    pub name: String,
}

/// Arbitrary key/value parameters passed through to resources and tasks.
pub type Params = HashMap<String, serde_json::Value>;

/// A resource version, as reported by a resource's check/put.
pub type Version = HashMap<String, String>;

/// Exit status of a containerized process.
pub type ExitStatus = i32;

/// A named piece of metadata attached to a fetched or produced version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// Version information produced by a Get or Put step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
}

/// The build being executed, as the storage layer describes it.
///
/// The engine treats this as an opaque label plus an integer id; leaf
/// factories use it to tag workloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildModel {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub job_name: String,
}
