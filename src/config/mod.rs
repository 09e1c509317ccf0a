//! Plan file loading.
//!
//! The CLI reads build plans from YAML or JSON files. Parsing the plan
//! tree itself is serde's job ([`Plan`]); this module only handles the
//! file envelope around it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::plan::Plan;

/// Errors that can occur when loading a plan file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension does not identify a supported format.
    #[error("unsupported plan file extension: '{0}' (expected yaml, yml, or json)")]
    UnsupportedExtension(String),
}

/// A plan file: minimal build metadata plus the plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    /// Display name for the build.
    #[serde(default = "default_build_name")]
    pub name: String,
    /// The plan to execute.
    pub plan: Plan,
}

fn default_build_name() -> String {
    "build".to_string()
}

/// Load a plan file, choosing the parser by file extension.
pub fn load_plan_file(path: impl AsRef<Path>) -> Result<PlanFile, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
        Some("json") => Ok(serde_json::from_str(&contents)?),
        other => Err(ConfigError::UnsupportedExtension(
            other.unwrap_or("").to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::StepPlan;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_yaml_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "plan.yaml",
            r#"
name: smoke
plan:
  do:
    - get:
        name: repo
    - task:
        name: unit
        config:
          run:
            path: make
            args: [test]
"#,
        );

        let file = load_plan_file(&path).unwrap();

        assert_eq!(file.name, "smoke");
        match &file.plan.step {
            StepPlan::Do(steps) => assert_eq!(steps.len(), 2),
            other => panic!("expected Do, got {:?}", other),
        }
    }

    #[test]
    fn test_load_json_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "plan.json",
            r#"{"plan": {"task": {"name": "unit"}}}"#,
        );

        let file = load_plan_file(&path).unwrap();

        assert_eq!(file.name, "build");
        assert!(matches!(file.plan.step, StepPlan::Task(_)));
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "plan.toml", "name = \"x\"");

        let err = load_plan_file(&path).unwrap_err();

        assert!(matches!(err, ConfigError::UnsupportedExtension(_)));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "plan.yaml", "plan: [unclosed");

        let err = load_plan_file(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = load_plan_file("/does/not/exist.yaml").unwrap_err();

        assert!(matches!(err, ConfigError::Io(_)));
    }
}
