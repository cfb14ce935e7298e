//! Replication flows
//!
//! A flow sequences the stages of one execution. The copy flow discovers
//! resources on the source registry (or takes the ones carried by an event)
//! and transfers them; the deletion flow propagates deletions reported by
//! events.

pub mod copy;
pub mod deletion;
pub mod stage;

use async_trait::async_trait;

use crate::error::Result;

pub use copy::CopyFlow;
pub use deletion::DeletionFlow;

#[async_trait]
pub trait Flow: Send + Sync {
    /// Run the flow and return the number of submitted tasks
    async fn run(&self) -> Result<usize>;
}
