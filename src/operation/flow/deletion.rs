use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Flow;
use super::stage;
use crate::error::Result;
use crate::model::{Policy, Resource};
use crate::operation::execution::ExecutionManager;
use crate::operation::scheduler::Scheduler;

/// Deletes on the destination the resources an event reported as deleted
/// on the source
pub struct DeletionFlow {
    execution_id: i64,
    policy: Policy,
    resources: Vec<Resource>,
    store: Arc<dyn ExecutionManager>,
    scheduler: Arc<dyn Scheduler>,
}

impl DeletionFlow {
    pub fn new(
        execution_id: i64,
        policy: Policy,
        resources: Vec<Resource>,
        store: Arc<dyn ExecutionManager>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            execution_id,
            policy,
            resources,
            store,
            scheduler,
        }
    }
}

#[async_trait]
impl Flow for DeletionFlow {
    async fn run(&self) -> Result<usize> {
        let store = self.store.as_ref();

        let resources: Vec<Resource> = self
            .resources
            .iter()
            .map(|resource| {
                let mut res = resource.clone();
                res.registry = self.policy.src_registry.clone();
                res
            })
            .collect();

        let resources = stage::filter_resources(resources, &self.policy.filters)?;
        if resources.is_empty() {
            stage::mark_execution_succeeded(store, self.execution_id, "no resources need to be deleted").await?;
            info!("no resources need to be deleted for the execution {}", self.execution_id);
            return Ok(0);
        }

        let src_resources = stage::assemble_source_resources(&resources, &self.policy);
        let dst_resources = stage::assemble_destination_resources(&resources, &self.policy);

        let mut items = stage::preprocess(self.scheduler.as_ref(), &src_resources, &dst_resources, &self.policy)?;
        stage::create_and_schedule(self.scheduler.as_ref(), store, self.execution_id, &mut items).await
    }
}
