//! Data model shared by the adapters, the filter evaluator and the orchestrator

pub mod execution;
pub mod policy;
pub mod registry;
pub mod resource;

pub use execution::{
    Execution, ExecutionQuery, ExecutionStatus, ExecutionUpdate, FINAL_REVISION, Operation, Task, TaskQuery,
    TaskStatus,
};
pub use policy::{Filter, FilterType, FilterValue, Policy, Trigger, TriggerSettings, TriggerType};
pub use registry::{
    Credential, CredentialType, FilterStyle, FilterStyleType, HealthStatus, LOCAL_REGISTRY_NAME, Registry,
    RegistryInfo, RegistryType,
};
pub use resource::{Repository, Resource, ResourceMetadata, ResourceType};
