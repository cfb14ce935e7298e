use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Flow;
use super::stage;
use crate::adapter::{Adapter, AdapterRegistry};
use crate::error::Result;
use crate::model::{Policy, Resource};
use crate::operation::execution::ExecutionManager;
use crate::operation::scheduler::{ScheduleItem, Scheduler};

/// Copies the resources selected by a policy to its destination
pub struct CopyFlow {
    execution_id: i64,
    policy: Policy,
    resources: Option<Vec<Resource>>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<dyn ExecutionManager>,
    scheduler: Arc<dyn Scheduler>,
    health_check: bool,
    dry_run: bool,
}

impl CopyFlow {
    pub fn new(
        execution_id: i64,
        policy: Policy,
        adapters: Arc<AdapterRegistry>,
        store: Arc<dyn ExecutionManager>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            execution_id,
            policy,
            resources: None,
            adapters,
            store,
            scheduler,
            health_check: false,
            dry_run: false,
        }
    }

    /// Replicate these resources instead of listing the source registry
    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_health_check(mut self, health_check: bool) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn discover(&self, src_adapter: &dyn Adapter) -> Result<Vec<Resource>> {
        let candidates = match &self.resources {
            Some(resources) => resources.clone(),
            None => stage::fetch_resources(src_adapter, &self.policy).await?,
        };
        stage::filter_resources(candidates, &self.policy.filters)
    }

    /// Items the flow would submit, without touching the destination or the
    /// store
    pub async fn plan(&self) -> Result<Vec<ScheduleItem>> {
        let (src_adapter, _) = stage::initialize(&self.adapters, &self.policy)?;
        let resources = self.discover(src_adapter.as_ref()).await?;
        let src_resources = stage::assemble_source_resources(&resources, &self.policy);
        let dst_resources = stage::assemble_destination_resources(&resources, &self.policy);
        stage::preprocess(self.scheduler.as_ref(), &src_resources, &dst_resources, &self.policy)
    }
}

#[async_trait]
impl Flow for CopyFlow {
    async fn run(&self) -> Result<usize> {
        let store = self.store.as_ref();
        let (src_adapter, dst_adapter) = stage::initialize(&self.adapters, &self.policy)?;

        let resources = self.discover(src_adapter.as_ref()).await?;

        if stage::is_execution_stopped(store, self.execution_id).await? {
            info!("the execution {} is stopped, stop the flow", self.execution_id);
            return Ok(0);
        }

        if resources.is_empty() {
            stage::mark_execution_succeeded(store, self.execution_id, "no resources need to be replicated").await?;
            info!("no resources need to be replicated for the execution {}", self.execution_id);
            return Ok(0);
        }

        let src_resources = stage::assemble_source_resources(&resources, &self.policy);
        let dst_resources = stage::assemble_destination_resources(&resources, &self.policy);

        if self.dry_run {
            let items = stage::preprocess(self.scheduler.as_ref(), &src_resources, &dst_resources, &self.policy)?;
            let text = format!("dry run, {} resources would be replicated", items.len());
            stage::mark_execution_succeeded(store, self.execution_id, &text).await?;
            info!("{} for the execution {}", text, self.execution_id);
            return Ok(0);
        }

        if self.health_check {
            stage::check_health(dst_adapter.as_ref()).await?;
        }
        stage::prepare_for_push(dst_adapter.as_ref(), &dst_resources).await?;

        let mut items = stage::preprocess(self.scheduler.as_ref(), &src_resources, &dst_resources, &self.policy)?;
        stage::create_and_schedule(self.scheduler.as_ref(), store, self.execution_id, &mut items).await
    }
}
