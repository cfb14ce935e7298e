//! Persistent store of executions and tasks

pub mod memory;
pub mod status;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Execution, ExecutionQuery, ExecutionUpdate, Task, TaskQuery, TaskStatus};

pub use memory::InMemoryExecutionManager;
pub use status::{TaskCounts, derive_execution_status, resolve_execution};

#[async_trait]
pub trait ExecutionManager: Send + Sync {
    /// Persist a new execution and return its ID
    async fn create_execution(&self, execution: Execution) -> Result<i64>;

    async fn update_execution(&self, id: i64, update: ExecutionUpdate) -> Result<()>;

    async fn get_execution(&self, id: i64) -> Result<Option<Execution>>;

    /// Executions matching the query, most recent first
    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>>;

    /// Remove the executions of a policy together with their tasks
    async fn remove_executions(&self, policy_id: i64) -> Result<usize>;

    async fn create_task(&self, task: Task) -> Result<i64>;

    async fn get_task(&self, id: i64) -> Result<Option<Task>>;

    /// Record the job running the task and return the task as stored
    /// afterwards, so the caller sees a stop that raced the submission
    async fn update_task_job_id(&self, task_id: i64, job_id: &str) -> Result<Task>;

    /// Apply a status only if `revision` is newer than the stored one, or
    /// equal with a higher status code. The check and the write are atomic.
    /// Returns whether the status was applied.
    async fn update_task_status(&self, task_id: i64, status: TaskStatus, revision: i64) -> Result<bool>;

    /// Tasks matching the query, in creation order
    async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>>;

    async fn append_task_log(&self, task_id: i64, line: &str) -> Result<()>;

    async fn get_task_log(&self, task_id: i64) -> Result<Option<String>>;
}
