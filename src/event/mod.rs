//! Event-based triggers
//!
//! Pushes to and deletions from the local registry start replications for
//! the event-based policies that select the affected resource.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::filter::filter_resources;
use crate::model::{Policy, Resource, TriggerType};
use crate::operation::ReplicationController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Push,
    Delete,
}

/// A change to one resource of the local registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub resource: Resource,
}

impl Event {
    pub fn push(resource: Resource) -> Self {
        Self {
            event_type: EventType::Push,
            resource,
        }
    }

    pub fn delete(mut resource: Resource) -> Self {
        resource.deleted = true;
        Self {
            event_type: EventType::Delete,
            resource,
        }
    }
}

pub struct EventHandler {
    controller: Arc<ReplicationController>,
}

impl EventHandler {
    pub fn new(controller: Arc<ReplicationController>) -> Self {
        Self { controller }
    }

    /// Policies the event should trigger, in input order
    pub fn matching_policies<'a>(&self, event: &Event, policies: &'a [Policy]) -> Vec<&'a Policy> {
        policies
            .iter()
            .filter(|policy| {
                policy.enabled
                    && policy.trigger_type() == TriggerType::EventBased
                    && policy.is_source_local()
                    && (event.event_type == EventType::Push || policy.deletion)
            })
            .filter(|policy| match filter_resources(vec![event.resource.clone()], &policy.filters) {
                Ok(selected) => !selected.is_empty(),
                Err(e) => {
                    error!("failed to evaluate the filters of policy {}: {}", policy.name, e);
                    false
                }
            })
            .collect()
    }

    /// Start a replication for every policy the event matches and return
    /// the created execution IDs. A policy that cannot start is logged and
    /// skipped.
    pub async fn handle(&self, event: &Event, policies: &[Policy]) -> Result<Vec<i64>> {
        let mut resource = event.resource.clone();
        resource.deleted = event.event_type == EventType::Delete;

        let mut executions = Vec::new();
        for policy in self.matching_policies(event, policies) {
            match self
                .controller
                .start_replication(policy, Some(vec![resource.clone()]), TriggerType::EventBased, false)
                .await
            {
                Ok(id) => {
                    info!(
                        "{:?} event on {} started execution {} of policy {}",
                        event.event_type,
                        resource.display_name(),
                        id,
                        policy.name
                    );
                    executions.push(id);
                }
                Err(e) => error!("failed to start the replication of policy {}: {}", policy.name, e),
            }
        }

        if executions.is_empty() {
            debug!("no policy matched the event on {}", resource.display_name());
        }
        Ok(executions)
    }
}
