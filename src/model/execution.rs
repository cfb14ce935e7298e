//! Execution and task records kept by the persistent store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::policy::TriggerType;
use super::resource::ResourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Created, no task dispatched yet
    Pending,
    InProgress,
    Stopped,
    Failed,
    Succeeded,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Stopped | ExecutionStatus::Failed | ExecutionStatus::Succeeded
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::InProgress => "InProgress",
            ExecutionStatus::Stopped => "Stopped",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Succeeded => "Succeeded",
        };
        f.write_str(name)
    }
}

/// Revision written when the engine ends a task itself, e.g. on a stop that
/// reaches it before its job is known. No job callback outranks it.
pub const FINAL_REVISION: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Initialized,
    Pending,
    InProgress,
    Succeeded,
    Stopped,
    Failed,
}

impl TaskStatus {
    /// Ordering used by the revision guard: at an equal revision only a
    /// strictly higher code may overwrite the stored status
    pub fn code(&self) -> i32 {
        match self {
            TaskStatus::Initialized => 0,
            TaskStatus::Pending => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Succeeded | TaskStatus::Stopped | TaskStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.code() == 3
    }

    pub fn is_running(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Initialized => "Initialized",
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Stopped => "Stopped",
            TaskStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub policy_id: i64,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub status_text: String,
    pub total: usize,
    pub failed: usize,
    pub succeed: usize,
    pub in_progress: usize,
    pub stopped: usize,
    pub trigger: TriggerType,
    pub dry_run: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(policy_id: i64, trigger: TriggerType, dry_run: bool) -> Self {
        Self {
            id: 0,
            policy_id,
            status: ExecutionStatus::Pending,
            status_text: String::new(),
            total: 0,
            failed: 0,
            succeed: 0,
            in_progress: 0,
            stopped: 0,
            trigger,
            dry_run,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

/// Fields the orchestrator may write on an execution that has no tasks
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub status_text: String,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionQuery {
    pub policy_id: Option<i64>,
    pub trigger: Option<TriggerType>,
    pub status: Option<ExecutionStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub execution_id: i64,
    pub resource_type: ResourceType,
    pub src_resource: String,
    pub dst_resource: String,
    pub operation: Operation,
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: TaskStatus,
    pub status_code: i32,
    pub status_revision: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        execution_id: i64,
        resource_type: ResourceType,
        src_resource: String,
        dst_resource: String,
        operation: Operation,
    ) -> Self {
        Self {
            id: 0,
            execution_id,
            resource_type,
            src_resource,
            dst_resource,
            operation,
            job_id: None,
            status: TaskStatus::Initialized,
            status_code: TaskStatus::Initialized.code(),
            status_revision: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub execution_id: Option<i64>,
    pub job_id: Option<String>,
    pub statuses: Vec<TaskStatus>,
}

impl TaskQuery {
    pub fn for_execution(execution_id: i64) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Default::default()
        }
    }

    pub fn for_job(job_id: &str) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.execution_id.is_none_or(|id| task.execution_id == id)
            && self
                .job_id
                .as_deref()
                .is_none_or(|job_id| task.job_id.as_deref() == Some(job_id))
            && (self.statuses.is_empty() || self.statuses.contains(&task.status))
    }
}
