//! Execution status derived from task statuses
//!
//! Priority: InProgress > Stopped > Failed > Succeeded. Tasks that have not
//! reached a terminal state yet (initialized, pending, running) all count as
//! in progress.

use crate::model::{Execution, ExecutionStatus, Task, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub in_progress: usize,
    pub stopped: usize,
    pub failed: usize,
    pub succeed: usize,
}

impl TaskCounts {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut counts = TaskCounts::default();
        for status in statuses {
            counts.total += 1;
            match status {
                TaskStatus::Initialized | TaskStatus::Pending | TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Stopped => counts.stopped += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Succeeded => counts.succeed += 1,
            }
        }
        counts
    }

    pub fn status(&self) -> ExecutionStatus {
        if self.in_progress > 0 {
            ExecutionStatus::InProgress
        } else if self.stopped > 0 {
            ExecutionStatus::Stopped
        } else if self.failed > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        }
    }
}

/// Status of an execution made of tasks with the given statuses. No task at
/// all means there was nothing to do, which is a success.
pub fn derive_execution_status<I>(statuses: I) -> ExecutionStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    TaskCounts::from_statuses(statuses).status()
}

/// Fill the counters and status of a stored execution from its tasks.
/// Without tasks the stored outcome is kept.
pub fn resolve_execution(mut execution: Execution, tasks: &[Task]) -> Execution {
    if tasks.is_empty() {
        if execution.status == ExecutionStatus::Succeeded && execution.end_time.is_none() {
            execution.end_time = Some(execution.start_time);
        }
        return execution;
    }

    let counts = TaskCounts::from_statuses(tasks.iter().map(|t| t.status));
    execution.total = counts.total;
    execution.in_progress = counts.in_progress;
    execution.stopped = counts.stopped;
    execution.failed = counts.failed;
    execution.succeed = counts.succeed;
    execution.status = if stopped_before_dispatch(&execution, tasks) {
        ExecutionStatus::Stopped
    } else {
        counts.status()
    };

    execution.end_time = if execution.status.is_terminal() {
        tasks
            .iter()
            .filter_map(|t| t.end_time)
            .max()
            .or(execution.end_time)
            .or(Some(execution.start_time))
    } else {
        None
    };
    execution
}

/// A stop recorded while the execution had no task holds as long as none
/// of the tasks written afterwards has reached the job service
fn stopped_before_dispatch(execution: &Execution, tasks: &[Task]) -> bool {
    execution.status == ExecutionStatus::Stopped
        && tasks
            .iter()
            .all(|t| t.status.is_terminal() || (t.status == TaskStatus::Initialized && t.job_id.is_none()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Operation, ResourceType, TriggerType};

    fn task(status: TaskStatus) -> Task {
        let mut task = Task::new(
            1,
            ResourceType::Image,
            "library/nginx:[latest]".to_string(),
            "mirror/nginx:[latest]".to_string(),
            Operation::Copy,
        );
        task.status = status;
        task.status_code = status.code();
        if status.is_terminal() {
            task.end_time = Some(task.start_time);
        }
        task
    }

    #[test]
    fn test_no_tasks_is_success() {
        assert_eq!(derive_execution_status(Vec::new()), ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_in_progress_wins() {
        let statuses = [
            TaskStatus::Failed,
            TaskStatus::Stopped,
            TaskStatus::InProgress,
            TaskStatus::Succeeded,
        ];
        assert_eq!(derive_execution_status(statuses), ExecutionStatus::InProgress);
        assert_eq!(
            derive_execution_status([TaskStatus::Succeeded, TaskStatus::Initialized]),
            ExecutionStatus::InProgress
        );
    }

    #[test]
    fn test_stopped_beats_failed() {
        let statuses = [TaskStatus::Failed, TaskStatus::Stopped, TaskStatus::Succeeded];
        assert_eq!(derive_execution_status(statuses), ExecutionStatus::Stopped);
        assert_eq!(
            derive_execution_status([TaskStatus::Succeeded, TaskStatus::Failed]),
            ExecutionStatus::Failed
        );
        assert_eq!(
            derive_execution_status([TaskStatus::Succeeded, TaskStatus::Succeeded]),
            ExecutionStatus::Succeeded
        );
    }

    #[test]
    fn test_resolve_without_tasks_keeps_stored_outcome() {
        let mut execution = Execution::new(1, TriggerType::Manual, false);
        execution.status = ExecutionStatus::Succeeded;
        let resolved = resolve_execution(execution.clone(), &[]);
        assert_eq!(resolved.status, ExecutionStatus::Succeeded);
        assert_eq!(resolved.end_time, Some(resolved.start_time));

        execution.status = ExecutionStatus::Failed;
        execution.status_text = "connection refused".to_string();
        let resolved = resolve_execution(execution, &[]);
        assert_eq!(resolved.status, ExecutionStatus::Failed);
        assert_eq!(resolved.total, 0);
    }

    #[test]
    fn test_resolve_fills_counters() {
        let execution = Execution::new(1, TriggerType::Manual, false);
        let tasks = vec![
            task(TaskStatus::Succeeded),
            task(TaskStatus::Failed),
            task(TaskStatus::Pending),
        ];
        let resolved = resolve_execution(execution.clone(), &tasks);
        assert_eq!(resolved.status, ExecutionStatus::InProgress);
        assert_eq!(resolved.total, 3);
        assert_eq!(resolved.succeed, 1);
        assert_eq!(resolved.failed, 1);
        assert_eq!(resolved.in_progress, 1);
        assert!(resolved.end_time.is_none());

        let tasks = vec![task(TaskStatus::Succeeded), task(TaskStatus::Failed)];
        let resolved = resolve_execution(execution, &tasks);
        assert_eq!(resolved.status, ExecutionStatus::Failed);
        assert!(resolved.end_time.is_some());
    }

    #[test]
    fn test_stop_before_tasks_holds_until_dispatch() {
        let mut execution = Execution::new(1, TriggerType::Manual, false);
        execution.status = ExecutionStatus::Stopped;

        let resolved = resolve_execution(execution.clone(), &[task(TaskStatus::Initialized)]);
        assert_eq!(resolved.status, ExecutionStatus::Stopped);
        assert_eq!(resolved.in_progress, 1);

        let mut dispatched = task(TaskStatus::Initialized);
        dispatched.job_id = Some("job-1".to_string());
        let resolved = resolve_execution(execution, &[dispatched]);
        assert_eq!(resolved.status, ExecutionStatus::InProgress);
    }
}
