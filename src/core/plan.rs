//! The declarative build plan tree.
//!
//! A [`Plan`] is a recursive tagged tree: each node is exactly one step
//! kind (leaf or combinator) plus an optional [`Location`] telemetry
//! modifier. Plans are produced by the pipeline layer, serialized as JSON
//! or YAML, and interpreted by the engine into a runnable step tree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::{Params, Version};

/// Telemetry position of a plan node, forwarded to delegates.
///
/// The engine never inspects a location; it only routes it to the
/// delegate acquired for the leaf at that position. `hook` tags nodes
/// that live inside a success/failure/ensure branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub id: u32,
    pub parent_id: u32,
    pub parallel_group: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

/// One node of the build plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(flatten)]
    pub step: StepPlan,
}

impl Plan {
    pub fn new(step: StepPlan) -> Self {
        Self {
            location: None,
            step,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl From<StepPlan> for Plan {
    fn from(step: StepPlan) -> Self {
        Self::new(step)
    }
}

/// The step kind of a plan node.
///
/// Exactly one kind per node; unknown tags are rejected during
/// deserialization. Combinator kinds carry their sub-plans recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPlan {
    /// Fetch a resource version into a named artifact source.
    Get(GetPlan),
    /// Push artifacts to a resource, producing a version.
    Put(PutPlan),
    /// Fetch the version produced by the preceding Put.
    DependentGet(GetPlan),
    /// Run a task workload.
    Task(TaskPlan),
    /// Run sub-plans in parallel; all must finish.
    Aggregate(Vec<Plan>),
    /// Run sub-plans sequentially, stopping at the first error.
    Do(Vec<Plan>),
    /// Run `next` only if `step` completed cleanly with success.
    OnSuccess(HookPlan),
    /// Run `next` only if `step` completed cleanly without success.
    OnFailure(HookPlan),
    /// Always run `next` after `step`, whatever happened.
    Ensure(HookPlan),
    /// Run the sub-plan but report success regardless of its outcome.
    Try(Box<Plan>),
    /// Impose a deadline on the sub-plan.
    Timeout(TimeoutPlan),
    /// Run the sub-plan only when the predecessor's outcome matches.
    Conditional(ConditionalPlan),
    /// Re-run the sub-plan until it succeeds or attempts are exhausted.
    Retry(RetryPlan),
}

/// A guarded step and the hook that may follow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookPlan {
    pub step: Box<Plan>,
    pub next: Box<Plan>,
}

/// Sub-plan with a deadline, e.g. `"50ms"`, `"10s"`, `"1h30m"`.
///
/// The duration grammar is parsed when the step runs, not when the plan
/// is loaded; a malformed duration fails the step at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPlan {
    pub duration: String,
    pub step: Box<Plan>,
}

/// Predecessor outcomes under which a conditional sub-plan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalPlan {
    pub conditions: Vec<Condition>,
    pub step: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPlan {
    pub attempts: u32,
    pub step: Box<Plan>,
}

/// Plan fields for Get and DependentGet leaves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: Params,
    pub params: Params,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    pub tags: Vec<String>,
}

/// Plan fields for Put leaves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: Params,
    pub params: Params,
    pub tags: Vec<String>,
}

/// Plan fields for Task leaves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPlan {
    pub name: String,
    pub privileged: bool,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<TaskConfig>,
}

/// The workload description of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub platform: String,
    pub image: String,
    pub run: TaskRunConfig,
    pub params: HashMap<String, String>,
    pub inputs: Vec<TaskInputConfig>,
}

/// The process a task executes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRunConfig {
    pub path: String,
    pub args: Vec<String>,
}

/// A named artifact the task expects to be streamed into its workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskInputConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_plan(name: &str) -> Plan {
        Plan::new(StepPlan::Get(GetPlan {
            name: name.to_string(),
            resource: name.to_string(),
            ..GetPlan::default()
        }))
    }

    fn task_plan(name: &str) -> Plan {
        Plan::new(StepPlan::Task(TaskPlan {
            name: name.to_string(),
            config: Some(TaskConfig::default()),
            ..TaskPlan::default()
        }))
    }

    #[test]
    fn test_plan_json_round_trip() {
        let plan = Plan::new(StepPlan::OnSuccess(HookPlan {
            step: Box::new(get_plan("some-input")),
            next: Box::new(task_plan("some-task")),
        }));

        let json = serde_json::to_string(&plan).unwrap();
        let parsed: Plan = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_plan_yaml_round_trip() {
        let plan = Plan::new(StepPlan::Aggregate(vec![
            task_plan("a"),
            Plan::new(StepPlan::OnFailure(HookPlan {
                step: Box::new(get_plan("in")),
                next: Box::new(task_plan("b")),
            })),
        ]));

        let yaml = serde_yaml::to_string(&plan).unwrap();
        let parsed: Plan = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_plan_deserializes_external_tag() {
        let json = r#"{"get": {"name": "some-input", "resource": "repo"}}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();

        match plan.step {
            StepPlan::Get(get) => {
                assert_eq!(get.name, "some-input");
                assert_eq!(get.resource, "repo");
            }
            other => panic!("expected Get, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_step_tag_is_rejected() {
        let json = r#"{"frobnicate": {"name": "x"}}"#;
        let result: Result<Plan, _> = serde_json::from_str(json);

        assert!(result.is_err());
    }

    #[test]
    fn test_location_hook_tag_round_trips() {
        let plan = get_plan("cleanup-input").with_location(Location {
            id: 3,
            parent_id: 1,
            parallel_group: 0,
            hook: Some("success".to_string()),
        });

        let json = serde_json::to_string(&plan).unwrap();
        let parsed: Plan = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.location.as_ref().and_then(|l| l.hook.as_deref()),
            Some("success")
        );
    }

    #[test]
    fn test_timeout_plan_keeps_duration_text() {
        let json = r#"{"timeout": {"duration": "1h30m", "step": {"task": {"name": "t"}}}}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();

        match plan.step {
            StepPlan::Timeout(t) => assert_eq!(t.duration, "1h30m"),
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_conditional_conditions_parse_lowercase() {
        let json = r#"{"conditional": {"conditions": ["success", "failure"], "step": {"task": {"name": "t"}}}}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();

        match plan.step {
            StepPlan::Conditional(c) => {
                assert_eq!(c.conditions, vec![Condition::Success, Condition::Failure]);
            }
            other => panic!("expected Conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_hook_tree_round_trips() {
        // Shape: ensure { on_success { get, task }, task }
        let plan = Plan::new(StepPlan::Ensure(HookPlan {
            step: Box::new(Plan::new(StepPlan::OnSuccess(HookPlan {
                step: Box::new(get_plan("in")),
                next: Box::new(task_plan("t")),
            }))),
            next: Box::new(task_plan("cleanup")),
        }));

        let json = serde_json::to_string(&plan).unwrap();
        let parsed: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plan);
    }
}
