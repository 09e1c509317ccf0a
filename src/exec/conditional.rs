//! The bind-time outcome gate.

use std::sync::Arc;

use crate::core::plan::Condition;

use super::identity::IdentityStep;
use super::registry::ArtifactRegistry;
use super::step::{BoxStep, Outcome, SharedFactory, StepFactory};

/// Binds its sub-factory only when the predecessor's outcome matches one
/// of the listed conditions; otherwise binds a no-op that succeeds.
///
/// The decision is made at bind time, so a conditional inside a compose
/// chain reacts to whatever the preceding step just reported.
pub struct Conditional {
    conditions: Vec<Condition>,
    step: SharedFactory,
}

impl Conditional {
    pub fn new(conditions: Vec<Condition>, step: SharedFactory) -> Self {
        Self { conditions, step }
    }

    fn matches(&self, prev: &Outcome) -> bool {
        let succeeded = prev.is_success();
        self.conditions.iter().any(|condition| match condition {
            Condition::Success => succeeded,
            Condition::Failure => !succeeded,
        })
    }
}

impl StepFactory for Conditional {
    fn bind(&self, prev: &Outcome, registry: &Arc<ArtifactRegistry>) -> BoxStep {
        if self.matches(prev) {
            self.step.bind(prev, registry)
        } else {
            Box::new(IdentityStep)
        }
    }
}
