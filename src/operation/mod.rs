//! Replication operations: flows, scheduling, and execution bookkeeping

pub mod controller;
pub mod execution;
pub mod flow;
pub mod scheduler;

pub use controller::ReplicationController;
pub use execution::{ExecutionManager, InMemoryExecutionManager};
pub use scheduler::{DefaultScheduler, ScheduleItem, ScheduleResult, Scheduler};
