//! The in-process leaf factory.

use std::sync::Arc;

use crate::core::plan::{GetPlan, PutPlan, TaskPlan};
use crate::core::types::{SourceName, WorkerIdentifier};
use crate::exec::{Factory, ResourceDelegate, SharedFactory, TaskDelegate};

use super::resource::{LocalDependentGetFactory, LocalGetFactory, LocalPutFactory};
use super::task::LocalTaskFactory;

/// A [`Factory`] that runs every leaf on the local machine: tasks as
/// processes, gets and puts as directory reads and writes.
///
/// This is the demo and test collaborator; a production deployment
/// provides a factory speaking to its worker runtime instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFactory;

impl LocalFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Factory for LocalFactory {
    fn get(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        delegate: Arc<dyn ResourceDelegate>,
        plan: GetPlan,
    ) -> SharedFactory {
        Arc::new(LocalGetFactory {
            name,
            id,
            delegate,
            plan,
        })
    }

    fn put(
        &self,
        id: WorkerIdentifier,
        delegate: Arc<dyn ResourceDelegate>,
        plan: PutPlan,
    ) -> SharedFactory {
        Arc::new(LocalPutFactory { id, delegate, plan })
    }

    fn task(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        delegate: Arc<dyn TaskDelegate>,
        plan: TaskPlan,
    ) -> SharedFactory {
        Arc::new(LocalTaskFactory {
            name,
            id,
            delegate,
            plan,
        })
    }

    fn dependent_get(
        &self,
        name: SourceName,
        id: WorkerIdentifier,
        delegate: Arc<dyn ResourceDelegate>,
        plan: GetPlan,
    ) -> SharedFactory {
        Arc::new(LocalDependentGetFactory {
            name,
            id,
            delegate,
            plan,
        })
    }
}
