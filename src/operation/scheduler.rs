//! Pairing of source and destination resources, and job dispatch

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use super::flow::stage::replace_namespace;
use crate::error::{ReplicationError, Result};
use crate::job::{JobDescriptor, JobKind, TaskRunner};
use crate::model::{Resource, ResourceType};

/// One source to destination transfer
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleItem {
    pub src_resource: Resource,
    pub dst_resource: Resource,
    /// Set once the task row is persisted
    pub task_id: i64,
}

/// Outcome of submitting one item: the job ID, or why submission failed
#[derive(Debug)]
pub struct ScheduleResult {
    pub task_id: i64,
    pub outcome: Result<String>,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Pair every source resource with its destination counterpart
    fn preprocess(
        &self,
        src_resources: &[Resource],
        dst_resources: &[Resource],
        dest_namespace: Option<&str>,
    ) -> Result<Vec<ScheduleItem>>;

    /// Submit the job of one item and return the ID the job service gave it
    async fn submit(&self, item: &ScheduleItem) -> Result<String>;

    /// Submit one job per item, concurrently, and report the outcomes once
    /// all are known. Failures are reported per item.
    async fn schedule(&self, items: &[ScheduleItem]) -> Vec<ScheduleResult> {
        let outcomes = join_all(items.iter().map(|item| self.submit(item))).await;
        items
            .iter()
            .zip(outcomes)
            .map(|(item, outcome)| {
                match &outcome {
                    Ok(job_id) => debug!("task {} submitted as job {}", item.task_id, job_id),
                    Err(e) => warn!("failed to submit task {}: {}", item.task_id, e),
                }
                ScheduleResult {
                    task_id: item.task_id,
                    outcome,
                }
            })
            .collect()
    }

    /// Cancel a submitted job
    async fn stop(&self, job_id: &str) -> Result<()>;
}

/// Pair resources by type and repository name after namespace mapping.
/// Destinations sharing a key are consumed in input order.
pub fn pair_resources(
    src_resources: &[Resource],
    dst_resources: &[Resource],
    dest_namespace: Option<&str>,
) -> Result<Vec<ScheduleItem>> {
    let mut destinations: HashMap<(ResourceType, String), VecDeque<&Resource>> = HashMap::new();
    for dst in dst_resources {
        destinations
            .entry((dst.resource_type, dst.repository_name().to_string()))
            .or_default()
            .push_back(dst);
    }

    let namespace = dest_namespace.unwrap_or_default();
    src_resources
        .iter()
        .map(|src| {
            let key = (src.resource_type, replace_namespace(src.repository_name(), namespace));
            let dst = destinations
                .get_mut(&key)
                .and_then(|queue| queue.pop_front())
                .ok_or_else(|| {
                    ReplicationError::Pairing(format!(
                        "no destination resource for {} {} (expected {})",
                        src.resource_type,
                        src.repository_name(),
                        key.1
                    ))
                })?;
            Ok(ScheduleItem {
                src_resource: src.clone(),
                dst_resource: dst.clone(),
                task_id: 0,
            })
        })
        .collect()
}

/// Scheduler submitting jobs to a [`TaskRunner`]
pub struct DefaultScheduler {
    runner: Arc<dyn TaskRunner>,
    core_url: String,
}

impl DefaultScheduler {
    pub fn new(runner: Arc<dyn TaskRunner>, core_url: &str) -> Self {
        Self {
            runner,
            core_url: core_url.trim_end_matches('/').to_string(),
        }
    }

    /// Callback URL the job service reports task progress to
    pub fn status_hook(&self, task_id: i64) -> String {
        format!(
            "{}/service/notifications/jobs/replication/task/{}",
            self.core_url, task_id
        )
    }
}

#[async_trait]
impl Scheduler for DefaultScheduler {
    fn preprocess(
        &self,
        src_resources: &[Resource],
        dst_resources: &[Resource],
        dest_namespace: Option<&str>,
    ) -> Result<Vec<ScheduleItem>> {
        pair_resources(src_resources, dst_resources, dest_namespace)
    }

    async fn submit(&self, item: &ScheduleItem) -> Result<String> {
        let kind = if item.dst_resource.deleted {
            JobKind::Delete
        } else {
            JobKind::Transfer
        };
        let job = JobDescriptor::for_resources(
            kind,
            &item.src_resource,
            &item.dst_resource,
            &self.status_hook(item.task_id),
        )?;
        self.runner.submit(&job).await
    }

    async fn stop(&self, job_id: &str) -> Result<()> {
        self.runner.cancel(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JOB_NAME_DELETE, JOB_NAME_TRANSFER};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        jobs: Mutex<Vec<JobDescriptor>>,
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn submit(&self, job: &JobDescriptor) -> Result<String> {
            let mut jobs = self.jobs.lock();
            if job.status_hook.ends_with("/task/2") {
                return Err(ReplicationError::Submission("queue full".to_string()));
            }
            jobs.push(job.clone());
            Ok(format!("job-{}", jobs.len()))
        }

        async fn cancel(&self, _job_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn mapped(resource: &Resource, namespace: &str) -> Resource {
        let mut dst = resource.clone();
        dst.metadata.repository.name = replace_namespace(resource.repository_name(), namespace);
        dst
    }

    #[test]
    fn test_pairing_by_identity_not_position() {
        let src = vec![
            Resource::image("library/nginx", &["1.25"]),
            Resource::image("library/redis", &["7"]),
            Resource::chart("library/redis", &["1.0"]),
        ];
        let mut dst: Vec<Resource> = src.iter().map(|r| mapped(r, "mirror")).collect();
        dst.reverse();

        let items = pair_resources(&src, &dst, Some("mirror")).unwrap();
        assert_eq!(items.len(), 3);
        for item in &items {
            assert_eq!(item.src_resource.resource_type, item.dst_resource.resource_type);
            assert_eq!(
                item.dst_resource.repository_name(),
                replace_namespace(item.src_resource.repository_name(), "mirror")
            );
        }
    }

    #[test]
    fn test_duplicates_consumed_in_order() {
        let src = vec![
            Resource::image("a/app", &["1"]),
            Resource::image("b/app", &["2"]),
        ];
        let dst: Vec<Resource> = src.iter().map(|r| mapped(r, "n")).collect();
        let items = pair_resources(&src, &dst, Some("n")).unwrap();
        assert_eq!(items[0].dst_resource.metadata.vtags, vec!["1".to_string()]);
        assert_eq!(items[1].dst_resource.metadata.vtags, vec!["2".to_string()]);
    }

    #[test]
    fn test_missing_counterpart_is_pairing_error() {
        let src = vec![Resource::image("library/nginx", &["1.25"])];
        let dst = vec![Resource::image("library/redis", &["7"])];
        let err = pair_resources(&src, &dst, None).unwrap_err();
        assert!(matches!(err, ReplicationError::Pairing(_)));
    }

    #[tokio::test]
    async fn test_schedule_reports_per_item() {
        let runner = Arc::new(RecordingRunner::default());
        let scheduler = DefaultScheduler::new(runner.clone(), "https://core.example.com/");

        let src = Resource::image("library/nginx", &["1.25"]);
        let mut deleted = src.clone();
        deleted.deleted = true;
        let items = vec![
            ScheduleItem {
                src_resource: src.clone(),
                dst_resource: src.clone(),
                task_id: 1,
            },
            ScheduleItem {
                src_resource: src.clone(),
                dst_resource: src.clone(),
                task_id: 2,
            },
            ScheduleItem {
                src_resource: src.clone(),
                dst_resource: deleted,
                task_id: 3,
            },
        ];

        let results = scheduler.schedule(&items).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].outcome.is_ok());
        assert!(matches!(results[1].outcome, Err(ReplicationError::Submission(_))));
        assert_eq!(results[2].task_id, 3);
        assert!(results[2].outcome.is_ok());
        assert!(scheduler.submit(&items[1]).await.is_err());

        let jobs = runner.jobs.lock();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert!(names.contains(&JOB_NAME_TRANSFER));
        assert!(names.contains(&JOB_NAME_DELETE));
        assert!(
            jobs.iter()
                .any(|j| j.status_hook == "https://core.example.com/service/notifications/jobs/replication/task/1")
        );
    }
}
