//! In-memory store, used by the CLI and by tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use super::ExecutionManager;
use super::status::resolve_execution;
use crate::error::{ReplicationError, Result};
use crate::model::{Execution, ExecutionQuery, ExecutionUpdate, Task, TaskQuery, TaskStatus};

#[derive(Default)]
struct State {
    executions: BTreeMap<i64, Execution>,
    tasks: BTreeMap<i64, Task>,
    logs: HashMap<i64, Vec<String>>,
    next_execution_id: i64,
    next_task_id: i64,
}

impl State {
    fn tasks_of(&self, execution_id: i64) -> Vec<Task> {
        self.tasks
            .values()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect()
    }

    fn resolved(&self, execution: &Execution) -> Execution {
        resolve_execution(execution.clone(), &self.tasks_of(execution.id))
    }
}

/// Store keeping every record behind one mutex. Execution statuses are
/// derived from the tasks on read.
#[derive(Default)]
pub struct InMemoryExecutionManager {
    state: Mutex<State>,
}

impl InMemoryExecutionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionManager for InMemoryExecutionManager {
    async fn create_execution(&self, mut execution: Execution) -> Result<i64> {
        let mut state = self.state.lock();
        state.next_execution_id += 1;
        execution.id = state.next_execution_id;
        let id = execution.id;
        state.executions.insert(id, execution);
        Ok(id)
    }

    async fn update_execution(&self, id: i64, update: ExecutionUpdate) -> Result<()> {
        let mut state = self.state.lock();
        let execution = state
            .executions
            .get_mut(&id)
            .ok_or_else(|| ReplicationError::NotFound(format!("execution {}", id)))?;
        execution.status = update.status;
        execution.status_text = update.status_text;
        execution.end_time = update.end_time;
        Ok(())
    }

    async fn get_execution(&self, id: i64) -> Result<Option<Execution>> {
        let state = self.state.lock();
        Ok(state.executions.get(&id).map(|e| state.resolved(e)))
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        let state = self.state.lock();
        Ok(state
            .executions
            .values()
            .rev()
            .filter(|e| query.policy_id.is_none_or(|id| e.policy_id == id))
            .filter(|e| query.trigger.is_none_or(|trigger| e.trigger == trigger))
            .map(|e| state.resolved(e))
            .filter(|e| query.status.is_none_or(|status| e.status == status))
            .collect())
    }

    async fn remove_executions(&self, policy_id: i64) -> Result<usize> {
        let mut state = self.state.lock();
        let ids: Vec<i64> = state
            .executions
            .values()
            .filter(|e| e.policy_id == policy_id)
            .map(|e| e.id)
            .collect();

        for id in &ids {
            state.executions.remove(id);
        }
        let task_ids: Vec<i64> = state
            .tasks
            .values()
            .filter(|t| ids.contains(&t.execution_id))
            .map(|t| t.id)
            .collect();
        for task_id in task_ids {
            state.tasks.remove(&task_id);
            state.logs.remove(&task_id);
        }
        Ok(ids.len())
    }

    async fn create_task(&self, mut task: Task) -> Result<i64> {
        let mut state = self.state.lock();
        if !state.executions.contains_key(&task.execution_id) {
            return Err(ReplicationError::Storage(format!(
                "execution {} does not exist",
                task.execution_id
            )));
        }
        state.next_task_id += 1;
        task.id = state.next_task_id;
        let id = task.id;
        state.tasks.insert(id, task);
        Ok(id)
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        Ok(self.state.lock().tasks.get(&id).cloned())
    }

    async fn update_task_job_id(&self, task_id: i64, job_id: &str) -> Result<Task> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| ReplicationError::NotFound(format!("task {}", task_id)))?;
        task.job_id = Some(job_id.to_string());
        Ok(task.clone())
    }

    async fn update_task_status(&self, task_id: i64, status: TaskStatus, revision: i64) -> Result<bool> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| ReplicationError::NotFound(format!("task {}", task_id)))?;

        let newer = revision > task.status_revision
            || (revision == task.status_revision && status.code() > task.status_code);
        if !newer {
            trace!(
                "ignoring status {} (revision {}) for task {} at revision {}",
                status, revision, task_id, task.status_revision
            );
            return Ok(false);
        }

        task.status = status;
        task.status_code = status.code();
        task.status_revision = revision;
        if status.is_terminal() {
            task.end_time = Some(Utc::now());
        }
        Ok(true)
    }

    async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        Ok(self
            .state
            .lock()
            .tasks
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect())
    }

    async fn append_task_log(&self, task_id: i64, line: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.tasks.contains_key(&task_id) {
            return Err(ReplicationError::NotFound(format!("task {}", task_id)));
        }
        let stamped = format!("{} {}", Utc::now().to_rfc3339(), line);
        state.logs.entry(task_id).or_default().push(stamped);
        Ok(())
    }

    async fn get_task_log(&self, task_id: i64) -> Result<Option<String>> {
        Ok(self.state.lock().logs.get(&task_id).map(|lines| lines.join("\n")))
    }
}
