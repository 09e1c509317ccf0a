//! Shared plan-building helpers for integration tests.
#![allow(dead_code)]

use crank::{
    GetPlan, HookPlan, Plan, PutPlan, StepPlan, TaskConfig, TaskInputConfig, TaskPlan,
    TaskRunConfig, TimeoutPlan,
};

pub fn get_plan(name: &str) -> Plan {
    Plan::new(StepPlan::Get(GetPlan {
        name: name.to_string(),
        resource: name.to_string(),
        ..GetPlan::default()
    }))
}

/// A get whose local source is a directory path.
pub fn dir_get_plan(name: &str, path: &str) -> Plan {
    let mut plan = GetPlan {
        name: name.to_string(),
        resource: name.to_string(),
        ..GetPlan::default()
    };
    plan.source
        .insert("path".to_string(), serde_json::json!(path));
    Plan::new(StepPlan::Get(plan))
}

pub fn task_plan(name: &str) -> Plan {
    Plan::new(StepPlan::Task(TaskPlan {
        name: name.to_string(),
        config: Some(TaskConfig::default()),
        ..TaskPlan::default()
    }))
}

/// A task running `sh -c <script>` with artifact inputs.
pub fn shell_task_plan(name: &str, script: &str, inputs: &[&str]) -> Plan {
    Plan::new(StepPlan::Task(TaskPlan {
        name: name.to_string(),
        config: Some(TaskConfig {
            run: TaskRunConfig {
                path: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
            },
            inputs: inputs
                .iter()
                .map(|input| TaskInputConfig {
                    name: input.to_string(),
                    path: None,
                })
                .collect(),
            ..TaskConfig::default()
        }),
        ..TaskPlan::default()
    }))
}

/// A put whose local destination is a directory path.
pub fn dir_put_plan(name: &str, path: &str) -> Plan {
    let mut plan = PutPlan {
        name: name.to_string(),
        resource: name.to_string(),
        ..PutPlan::default()
    };
    plan.source
        .insert("path".to_string(), serde_json::json!(path));
    Plan::new(StepPlan::Put(plan))
}

pub fn on_success(step: Plan, next: Plan) -> Plan {
    Plan::new(StepPlan::OnSuccess(HookPlan {
        step: Box::new(step),
        next: Box::new(next),
    }))
}

pub fn on_failure(step: Plan, next: Plan) -> Plan {
    Plan::new(StepPlan::OnFailure(HookPlan {
        step: Box::new(step),
        next: Box::new(next),
    }))
}

pub fn ensure(step: Plan, next: Plan) -> Plan {
    Plan::new(StepPlan::Ensure(HookPlan {
        step: Box::new(step),
        next: Box::new(next),
    }))
}

pub fn do_plan(steps: Vec<Plan>) -> Plan {
    Plan::new(StepPlan::Do(steps))
}

pub fn aggregate(steps: Vec<Plan>) -> Plan {
    Plan::new(StepPlan::Aggregate(steps))
}

pub fn timeout(step: Plan, duration: &str) -> Plan {
    Plan::new(StepPlan::Timeout(TimeoutPlan {
        duration: duration.to_string(),
        step: Box::new(step),
    }))
}
