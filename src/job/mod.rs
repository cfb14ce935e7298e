//! Task-execution collaborator
//!
//! Transfers run in an external job service. The engine hands it one job per
//! task and learns about progress through status callbacks that carry a
//! monotonically increasing revision.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReplicationError, Result};
use crate::model::{Resource, TaskStatus};

pub use client::JobServiceClient;

pub const JOB_NAME_TRANSFER: &str = "IMAGE_TRANSFER";
pub const JOB_NAME_DELETE: &str = "IMAGE_DELETE";
pub const JOB_KIND_GENERIC: &str = "Generic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Transfer,
    Delete,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Transfer => JOB_NAME_TRANSFER,
            JobKind::Delete => JOB_NAME_DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(rename = "kind")]
    pub job_kind: String,
    #[serde(default)]
    pub is_unique: bool,
}

/// Job submitted to the job service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub parameters: Map<String, Value>,
    pub metadata: JobMetadata,
    pub status_hook: String,
}

impl JobDescriptor {
    /// Job moving (or deleting) `dst` from `src`. The resources travel as
    /// JSON strings so the worker decodes them with the same model.
    pub fn for_resources(kind: JobKind, src: &Resource, dst: &Resource, status_hook: &str) -> Result<Self> {
        let parameters = Map::from_iter([
            ("src_resource".to_string(), Value::String(serde_json::to_string(src)?)),
            ("dst_resource".to_string(), Value::String(serde_json::to_string(dst)?)),
        ]);
        Ok(Self {
            name: kind.name().to_string(),
            parameters,
            metadata: JobMetadata {
                job_kind: JOB_KIND_GENERIC.to_string(),
                is_unique: false,
            },
            status_hook: status_hook.to_string(),
        })
    }
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Submit a job, returning the ID the job service assigned to it
    async fn submit(&self, job: &JobDescriptor) -> Result<String>;

    /// Ask the job service to stop a job. Best effort.
    async fn cancel(&self, job_id: &str) -> Result<()>;
}

/// Job states reported by the job service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Stopped,
    Error,
    Success,
}

impl JobStatus {
    pub fn task_status(&self) -> TaskStatus {
        match self {
            JobStatus::Pending | JobStatus::Scheduled => TaskStatus::Pending,
            JobStatus::Running => TaskStatus::InProgress,
            JobStatus::Stopped => TaskStatus::Stopped,
            JobStatus::Error => TaskStatus::Failed,
            JobStatus::Success => TaskStatus::Succeeded,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Scheduled => "Scheduled",
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Error => "Error",
            JobStatus::Success => "Success",
        };
        f.write_str(name)
    }
}

impl FromStr for JobStatus {
    type Err = ReplicationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Scheduled" => Ok(JobStatus::Scheduled),
            "Running" => Ok(JobStatus::Running),
            "Stopped" => Ok(JobStatus::Stopped),
            "Error" => Ok(JobStatus::Error),
            "Success" => Ok(JobStatus::Success),
            other => Err(ReplicationError::Parse(format!("unknown job status: {}", other))),
        }
    }
}

/// Status callback delivered by the job service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusChange {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub revision: i64,
    /// Task named by the status hook the callback arrived on. Resolves the
    /// task even before its job ID is recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
}

impl JobStatusChange {
    pub fn new(job_id: &str, status: JobStatus, revision: i64) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            revision,
            task_id: None,
        }
    }

    /// Bind the change to the task of the hook URL it was posted to
    pub fn for_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }
}
