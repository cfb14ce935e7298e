//! Registry Replicator Library
//!
//! Policy-driven replication of images and charts between container
//! registries: adapters for the registry families, resource filtering,
//! execution bookkeeping, and job dispatch to a task-execution service.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod job;
pub mod model;
pub mod operation;
pub mod output;

pub use adapter::{Adapter, AdapterRegistry};
pub use config::ReplicationConfig;
pub use error::{ReplicationError, Result};
pub use event::{Event, EventHandler, EventType};
pub use operation::ReplicationController;
pub use output::OutputManager;
