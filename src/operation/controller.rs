//! Entry point the host uses to run and inspect replications

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::execution::ExecutionManager;
use super::flow::{CopyFlow, DeletionFlow, Flow, stage};
use super::scheduler::{ScheduleItem, Scheduler};
use crate::adapter::AdapterRegistry;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::job::JobStatusChange;
use crate::model::{
    Execution, ExecutionQuery, ExecutionStatus, ExecutionUpdate, Policy, Resource, Task, TaskQuery, TaskStatus,
    TriggerType,
};

pub struct ReplicationController {
    config: ReplicationConfig,
    adapters: Arc<AdapterRegistry>,
    store: Arc<dyn ExecutionManager>,
    scheduler: Arc<dyn Scheduler>,
}

impl ReplicationController {
    pub fn new(
        config: ReplicationConfig,
        adapters: Arc<AdapterRegistry>,
        store: Arc<dyn ExecutionManager>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config,
            adapters,
            store,
            scheduler,
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Start a replication of the policy and return the execution ID.
    ///
    /// An invalid or disabled policy is rejected before any record is
    /// created. Any other failure of the flow is recorded on the execution,
    /// which is then returned normally. Resources carried by an event replace
    /// the discovery on the source; deleted ones run the deletion flow.
    pub async fn start_replication(
        &self,
        policy: &Policy,
        resources: Option<Vec<Resource>>,
        trigger: TriggerType,
        dry_run: bool,
    ) -> Result<i64> {
        if !policy.enabled {
            return Err(ReplicationError::Configuration(format!(
                "the policy {} is disabled",
                policy.name
            )));
        }
        policy.validate()?;
        let policy = self.complete_policy(policy);

        let execution_id = self
            .store
            .create_execution(Execution::new(policy.id, trigger, dry_run))
            .await?;
        info!(
            "execution {} created for policy {} ({} trigger)",
            execution_id, policy.name, trigger
        );

        let deletion = resources
            .as_ref()
            .is_some_and(|r| !r.is_empty() && r.iter().all(|res| res.deleted));
        let flow: Box<dyn Flow> = match resources {
            Some(resources) if deletion => Box::new(DeletionFlow::new(
                execution_id,
                policy,
                resources,
                self.store.clone(),
                self.scheduler.clone(),
            )),
            resources => {
                let mut flow = CopyFlow::new(
                    execution_id,
                    policy,
                    self.adapters.clone(),
                    self.store.clone(),
                    self.scheduler.clone(),
                )
                .with_health_check(self.config.health_check_before_push)
                .with_dry_run(dry_run);
                if let Some(resources) = resources {
                    flow = flow.with_resources(resources);
                }
                Box::new(flow)
            }
        };

        match flow.run().await {
            Ok(0) => self.finish_without_tasks(execution_id).await?,
            Ok(n) => info!("{} tasks of execution {} submitted", n, execution_id),
            Err(e) => {
                error!("the execution {} failed: {}", execution_id, e);
                self.fail_undispatched_tasks(execution_id, &e.to_string()).await?;
                self.store
                    .update_execution(
                        execution_id,
                        ExecutionUpdate {
                            status: ExecutionStatus::Failed,
                            status_text: e.to_string(),
                            end_time: Some(Utc::now()),
                        },
                    )
                    .await?;
            }
        }
        Ok(execution_id)
    }

    async fn finish_without_tasks(&self, execution_id: i64) -> Result<()> {
        let Some(execution) = self.store.get_execution(execution_id).await? else {
            return Ok(());
        };
        if execution.status.is_terminal() {
            return Ok(());
        }
        self.store
            .update_execution(
                execution_id,
                ExecutionUpdate {
                    status: ExecutionStatus::Succeeded,
                    status_text: String::new(),
                    end_time: Some(execution.start_time),
                },
            )
            .await
    }

    /// Tasks persisted by a flow that aborted before submitting them would
    /// otherwise keep the execution in progress
    async fn fail_undispatched_tasks(&self, execution_id: i64, reason: &str) -> Result<()> {
        let tasks = self.store.list_tasks(&TaskQuery::for_execution(execution_id)).await?;
        for task in tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Initialized && t.job_id.is_none())
        {
            if self
                .store
                .update_task_status(task.id, TaskStatus::Failed, task.status_revision)
                .await?
            {
                self.store
                    .append_task_log(task.id, &format!("not submitted: {}", reason))
                    .await?;
            }
        }
        Ok(())
    }

    /// Items a policy would replicate right now, without creating any record
    pub async fn plan_replication(&self, policy: &Policy) -> Result<Vec<ScheduleItem>> {
        policy.validate()?;
        let policy = self.complete_policy(policy);
        CopyFlow::new(
            0,
            policy,
            self.adapters.clone(),
            self.store.clone(),
            self.scheduler.clone(),
        )
        .with_dry_run(true)
        .plan()
        .await
    }

    /// Ask the job service to stop every running task of the execution.
    /// Tasks whose job is not known yet are stopped for good here, and a job
    /// submitted for one of them afterwards is cancelled on arrival.
    pub async fn stop_replication(&self, execution_id: i64) -> Result<()> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| ReplicationError::NotFound(format!("execution {}", execution_id)))?;

        let tasks = self.store.list_tasks(&TaskQuery::for_execution(execution_id)).await?;
        if tasks.is_empty() {
            if !execution.status.is_terminal() {
                self.store
                    .update_execution(
                        execution_id,
                        ExecutionUpdate {
                            status: ExecutionStatus::Stopped,
                            status_text: "stopped by user".to_string(),
                            end_time: Some(Utc::now()),
                        },
                    )
                    .await?;
            }
            return Ok(());
        }

        for task in tasks.iter().filter(|t| t.status.is_running()) {
            match &task.job_id {
                Some(job_id) => {
                    if let Err(e) = self.scheduler.stop(job_id).await {
                        warn!("failed to stop job {} of task {}: {}", job_id, task.id, e);
                    }
                }
                None => stage::stop_undispatched_task(self.store.as_ref(), self.scheduler.as_ref(), task.id).await?,
            }
        }
        info!("stop requested for execution {}", execution_id);
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: i64) -> Result<Option<Execution>> {
        self.store.get_execution(execution_id).await
    }

    pub async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        self.store.list_executions(query).await
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.store.get_task(task_id).await
    }

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        self.store.list_tasks(query).await
    }

    pub async fn get_task_log(&self, task_id: i64) -> Result<Option<String>> {
        self.store.get_task_log(task_id).await
    }

    /// Apply a job status callback to its task. The task is looked up by
    /// the ID its hook carries, or else by job ID. Stale callbacks and
    /// callbacks from a job the task no longer runs are ignored and reported
    /// as `false`.
    pub async fn handle_status_change(&self, change: &JobStatusChange) -> Result<bool> {
        let task = match change.task_id {
            Some(task_id) => self
                .store
                .get_task(task_id)
                .await?
                .ok_or_else(|| ReplicationError::NotFound(format!("task {}", task_id)))?,
            None => self
                .store
                .list_tasks(&TaskQuery::for_job(&change.job_id))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ReplicationError::NotFound(format!("task of job {}", change.job_id)))?,
        };
        if let Some(running) = task.job_id.as_deref().filter(|job_id| *job_id != change.job_id) {
            warn!(
                "task {} runs job {}, ignoring status of job {}",
                task.id, running, change.job_id
            );
            return Ok(false);
        }

        let status = change.status.task_status();
        let applied = self
            .store
            .update_task_status(task.id, status, change.revision)
            .await?;
        if applied {
            debug!(
                "task {} is {} at revision {}",
                task.id, status, change.revision
            );
            self.store
                .append_task_log(task.id, &format!("job {} reported {}", change.job_id, change.status))
                .await?;
        } else {
            debug!(
                "stale status {} (revision {}) for task {} ignored",
                status, change.revision, task.id
            );
        }
        Ok(applied)
    }

    /// Purge the executions of a deleted policy. Refused while one of them
    /// is still running.
    pub async fn remove_policy_executions(&self, policy_id: i64) -> Result<usize> {
        let executions = self
            .store
            .list_executions(&ExecutionQuery {
                policy_id: Some(policy_id),
                ..Default::default()
            })
            .await?;
        if let Some(running) = executions.iter().find(|e| !e.status.is_terminal()) {
            return Err(ReplicationError::Validation(format!(
                "the execution {} of policy {} is still running",
                running.id, policy_id
            )));
        }
        let removed = self.store.remove_executions(policy_id).await?;
        info!("{} executions of policy {} removed", removed, policy_id);
        Ok(removed)
    }

    /// The policy with its local side filled from the configuration
    fn complete_policy(&self, policy: &Policy) -> Policy {
        let mut policy = policy.clone();
        for registry in [&mut policy.src_registry, &mut policy.dest_registry] {
            if registry.as_ref().is_none_or(|r| r.is_local()) {
                *registry = Some(self.config.local_registry());
            }
        }
        policy
    }
}
