//! Building blocks of the replication flows

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, AdapterRegistry};
use crate::error::{ReplicationError, Result};
use crate::model::{
    ExecutionStatus, ExecutionUpdate, FINAL_REVISION, Filter, FilterType, HealthStatus, Operation, Policy, Registry, Resource,
    ResourceType, Task, TaskStatus,
};
use crate::operation::execution::ExecutionManager;
use crate::operation::scheduler::{ScheduleItem, Scheduler};

pub use crate::filter::filter_resources;

/// Adapters for the source and destination registries of a policy
pub fn initialize(
    adapters: &AdapterRegistry,
    policy: &Policy,
) -> Result<(Box<dyn Adapter>, Box<dyn Adapter>)> {
    let src = registry_of(policy.src_registry.as_ref(), "source")?;
    let dst = registry_of(policy.dest_registry.as_ref(), "destination")?;

    let src_adapter = adapters.create(src)?;
    debug!("adapter for source registry {} initialized", src.url);
    let dst_adapter = adapters.create(dst)?;
    debug!("adapter for destination registry {} initialized", dst.url);
    Ok((src_adapter, dst_adapter))
}

fn registry_of<'a>(registry: Option<&'a Registry>, side: &str) -> Result<&'a Registry> {
    registry.ok_or_else(|| ReplicationError::Configuration(format!("the {} registry of the policy is not set", side)))
}

/// Discover candidate resources on the source registry. Resource type
/// filters decide which kinds are listed; every other filter is handed to
/// the adapter, which may or may not evaluate it.
pub async fn fetch_resources(adapter: &dyn Adapter, policy: &Policy) -> Result<Vec<Resource>> {
    let mut resource_types = Vec::new();
    let mut filters: Vec<Filter> = Vec::new();
    for filter in &policy.filters {
        if filter.filter_type == FilterType::Resource {
            resource_types.push(filter.resource_type()?);
        } else {
            filters.push(filter.clone());
        }
    }
    if resource_types.is_empty() {
        resource_types = adapter.info().await?.supported_resource_types;
    }

    let mut resources = Vec::new();
    for resource_type in resource_types {
        let fetched = match resource_type {
            ResourceType::Image => {
                let registry = adapter.as_image_registry().ok_or_else(|| {
                    ReplicationError::Configuration("the adapter doesn't implement the image registry interface".to_string())
                })?;
                registry.fetch_images(&filters).await?
            }
            ResourceType::Chart => {
                let registry = adapter.as_chart_registry().ok_or_else(|| {
                    ReplicationError::Configuration("the adapter doesn't implement the chart registry interface".to_string())
                })?;
                registry.fetch_charts(&filters).await?
            }
        };
        debug!("fetched {} {} resources", fetched.len(), resource_type);
        resources.extend(fetched);
    }

    info!("fetch resources from the source registry completed");
    Ok(resources)
}

/// Rewrite a repository path into the destination namespace. Only the last
/// path segment is kept below the new namespace.
pub fn replace_namespace(repository: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        return repository.to_string();
    }
    let last = repository.rsplit('/').next().unwrap_or(repository);
    format!("{}/{}", namespace, last)
}

/// Copies of the resources bound to the policy's source registry
pub fn assemble_source_resources(resources: &[Resource], policy: &Policy) -> Vec<Resource> {
    resources
        .iter()
        .map(|resource| {
            let mut res = resource.clone();
            res.registry = policy.src_registry.clone();
            res
        })
        .collect()
}

/// Copies of the resources as they will exist on the destination registry
pub fn assemble_destination_resources(resources: &[Resource], policy: &Policy) -> Vec<Resource> {
    resources
        .iter()
        .map(|resource| {
            let mut res = resource.clone();
            res.registry = policy.dest_registry.clone();
            if let Some(namespace) = policy.dest_namespace() {
                res.metadata.repository.name = replace_namespace(resource.repository_name(), namespace);
            }
            res.override_existing = policy.override_existing;
            res
        })
        .collect()
}

/// Fails unless the destination registry reports itself healthy
pub async fn check_health(adapter: &dyn Adapter) -> Result<()> {
    match adapter.health_check().await? {
        HealthStatus::Healthy => Ok(()),
        HealthStatus::Unhealthy => Err(ReplicationError::Registry(
            "the destination registry is unhealthy".to_string(),
        )),
    }
}

pub async fn prepare_for_push(adapter: &dyn Adapter, resources: &[Resource]) -> Result<()> {
    adapter.prepare_for_push(resources).await?;
    info!("prepare for pushing resources completed");
    Ok(())
}

pub fn preprocess(
    scheduler: &dyn Scheduler,
    src_resources: &[Resource],
    dst_resources: &[Resource],
    policy: &Policy,
) -> Result<Vec<ScheduleItem>> {
    let items = scheduler.preprocess(src_resources, dst_resources, policy.dest_namespace())?;
    info!("schedule items generated: {}", items.len());
    Ok(items)
}

/// Persist one task per item and record its ID on the item. The first
/// failure aborts; tasks already created are kept.
pub async fn create_tasks(
    store: &dyn ExecutionManager,
    execution_id: i64,
    items: &mut [ScheduleItem],
) -> Result<()> {
    for item in items.iter_mut() {
        let operation = if item.dst_resource.deleted {
            Operation::Deletion
        } else {
            Operation::Copy
        };
        let task = Task::new(
            execution_id,
            item.src_resource.resource_type,
            item.src_resource.display_name(),
            item.dst_resource.display_name(),
            operation,
        );
        item.task_id = store.create_task(task).await?;
        debug!("task {} created for {}", item.task_id, item.src_resource.display_name());
    }
    info!("tasks created for execution {}", execution_id);
    Ok(())
}

/// Persist the items as tasks and dispatch them, checking for a stop before
/// each step. Tasks created by an execution stopped in between are ended
/// without being submitted.
pub async fn create_and_schedule(
    scheduler: &dyn Scheduler,
    store: &dyn ExecutionManager,
    execution_id: i64,
    items: &mut [ScheduleItem],
) -> Result<usize> {
    if is_execution_stopped(store, execution_id).await? {
        info!("the execution {} is stopped, no task created", execution_id);
        return Ok(0);
    }
    create_tasks(store, execution_id, items).await?;

    if is_execution_stopped(store, execution_id).await? {
        info!("the execution {} is stopped, no task submitted", execution_id);
        stop_tasks(store, scheduler, items).await?;
        return Ok(0);
    }
    schedule(scheduler, store, items).await
}

/// Dispatch the items concurrently. Each job ID is recorded as soon as its
/// submission returns, so callbacks for early jobs find their task while
/// other submissions are still pending. Returns how many were submitted;
/// every item failing is an error.
pub async fn schedule(
    scheduler: &dyn Scheduler,
    store: &dyn ExecutionManager,
    items: &[ScheduleItem],
) -> Result<usize> {
    let outcomes = join_all(items.iter().map(|item| dispatch(scheduler, store, item))).await;

    let mut submitted = 0;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome? {
            Dispatch::Submitted => submitted += 1,
            Dispatch::Failed => failed += 1,
            Dispatch::Skipped => {}
        }
    }

    if failed > 0 && failed == items.len() {
        return Err(ReplicationError::Submission("all tasks are failed".to_string()));
    }
    info!("{} of {} tasks submitted", submitted, items.len());
    Ok(submitted)
}

enum Dispatch {
    Submitted,
    Failed,
    Skipped,
}

async fn dispatch(scheduler: &dyn Scheduler, store: &dyn ExecutionManager, item: &ScheduleItem) -> Result<Dispatch> {
    if is_task_stopped(store, item.task_id).await? {
        debug!("task {} was stopped before submission", item.task_id);
        return Ok(Dispatch::Skipped);
    }

    match scheduler.submit(item).await {
        Ok(job_id) => {
            let task = store.update_task_job_id(item.task_id, &job_id).await?;
            store
                .append_task_log(item.task_id, &format!("submitted as job {}", job_id))
                .await?;
            debug!("task {} submitted as job {}", item.task_id, job_id);
            if task.status == TaskStatus::Stopped {
                cancel_job(scheduler, item.task_id, &job_id).await;
            }
            Ok(Dispatch::Submitted)
        }
        Err(e) => {
            warn!("failed to schedule task {}: {}", item.task_id, e);
            mark_task_failed(store, item.task_id, &e.to_string()).await?;
            Ok(Dispatch::Failed)
        }
    }
}

async fn is_task_stopped(store: &dyn ExecutionManager, task_id: i64) -> Result<bool> {
    Ok(store
        .get_task(task_id)
        .await?
        .is_some_and(|t| t.status == TaskStatus::Stopped))
}

async fn cancel_job(scheduler: &dyn Scheduler, task_id: i64, job_id: &str) {
    match scheduler.stop(job_id).await {
        Ok(()) => info!("job {} of stopped task {} cancelled", job_id, task_id),
        Err(e) => warn!("failed to cancel job {} of stopped task {}: {}", job_id, task_id, e),
    }
}

/// End a task whose job is not known yet. The stop is written at
/// [`FINAL_REVISION`] so no job callback can revive the task. A job ID
/// recorded in the meantime gets cancelled here; one recorded afterwards is
/// cancelled by the dispatch that records it.
pub async fn stop_undispatched_task(
    store: &dyn ExecutionManager,
    scheduler: &dyn Scheduler,
    task_id: i64,
) -> Result<()> {
    store.update_task_status(task_id, TaskStatus::Stopped, FINAL_REVISION).await?;
    store.append_task_log(task_id, "stopped before its job was submitted").await?;
    if let Some(job_id) = store.get_task(task_id).await?.and_then(|t| t.job_id) {
        cancel_job(scheduler, task_id, &job_id).await;
    }
    Ok(())
}

/// Stop every task created for the items, used when the execution was
/// stopped between task creation and dispatch
async fn stop_tasks(store: &dyn ExecutionManager, scheduler: &dyn Scheduler, items: &[ScheduleItem]) -> Result<()> {
    for item in items {
        stop_undispatched_task(store, scheduler, item.task_id).await?;
    }
    info!("{} tasks stopped before dispatch", items.len());
    Ok(())
}

async fn mark_task_failed(store: &dyn ExecutionManager, task_id: i64, reason: &str) -> Result<()> {
    // at the current revision so a later callback still wins
    let revision = store
        .get_task(task_id)
        .await?
        .map(|t| t.status_revision)
        .unwrap_or_default();
    store.update_task_status(task_id, TaskStatus::Failed, revision).await?;
    store.append_task_log(task_id, &format!("submission failed: {}", reason)).await
}

/// Whether the execution was stopped while the flow was running
pub async fn is_execution_stopped(store: &dyn ExecutionManager, execution_id: i64) -> Result<bool> {
    let execution = store
        .get_execution(execution_id)
        .await?
        .ok_or_else(|| ReplicationError::NotFound(format!("execution {}", execution_id)))?;
    Ok(execution.status == ExecutionStatus::Stopped)
}

/// Close an execution that produced no task. It ends when it started.
pub async fn mark_execution_succeeded(store: &dyn ExecutionManager, execution_id: i64, text: &str) -> Result<()> {
    let start_time = store
        .get_execution(execution_id)
        .await?
        .map(|e| e.start_time)
        .unwrap_or_else(Utc::now);
    store
        .update_execution(
            execution_id,
            ExecutionUpdate {
                status: ExecutionStatus::Succeeded,
                status_text: text.to_string(),
                end_time: Some(start_time),
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegistryType;

    #[test]
    fn test_replace_namespace() {
        assert_eq!(replace_namespace("c", ""), "c");
        assert_eq!(replace_namespace("c", "n"), "n/c");
        assert_eq!(replace_namespace("b/c", "n"), "n/c");
        assert_eq!(replace_namespace("a/b/c", "n"), "n/c");
        assert_eq!(replace_namespace("a/b/c", ""), "a/b/c");
    }

    fn policy() -> Policy {
        let src = Registry::new(1, "src", RegistryType::DockerRegistry, "https://src.example.com");
        let dst = Registry::new(0, "Local", RegistryType::Harbor, "https://harbor.example.com");
        Policy::new("mirror")
            .with_registries(Some(src), Some(dst))
            .with_dest_namespace("test")
            .with_override(true)
    }

    #[test]
    fn test_assemble_source_resources() {
        let resources = vec![Resource::image("library/hello-world", &["latest"])];
        let assembled = assemble_source_resources(&resources, &policy());
        assert_eq!(assembled[0].registry.as_ref().unwrap().id, 1);
        assert!(resources[0].registry.is_none());
    }

    #[test]
    fn test_assemble_destination_resources() {
        let resources = vec![Resource::image("library/hello-world", &["latest"])];
        let assembled = assemble_destination_resources(&resources, &policy());
        assert_eq!(assembled[0].repository_name(), "test/hello-world");
        assert!(assembled[0].override_existing);
        assert_eq!(assembled[0].registry.as_ref().unwrap().id, 0);
        assert_eq!(resources[0].repository_name(), "library/hello-world");
    }

    #[test]
    fn test_assemble_destination_without_namespace_keeps_name() {
        let policy = Policy {
            dest_namespace: String::new(),
            override_existing: false,
            ..policy()
        };
        let mut resource = Resource::image("library/hello-world", &["latest"]);
        resource.override_existing = true;
        let assembled = assemble_destination_resources(&[resource], &policy);
        assert_eq!(assembled[0].repository_name(), "library/hello-world");
        assert!(!assembled[0].override_existing);
    }
}
