#![allow(dead_code)]

pub mod stub;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use registry_replicator::adapter::{Adapter, AdapterRegistry, ImageRegistry, Manifest};
use registry_replicator::config::ReplicationConfig;
use registry_replicator::error::{ReplicationError, Result};
use registry_replicator::job::{JobDescriptor, TaskRunner};
use registry_replicator::model::{
    Filter, FilterStyle, FilterType, HealthStatus, Policy, Registry, RegistryInfo, RegistryType, Resource,
    ResourceType, Trigger, TriggerType,
};
use registry_replicator::operation::execution::ExecutionManager;
use registry_replicator::operation::{DefaultScheduler, InMemoryExecutionManager, ReplicationController};

/// Holds a call until the test releases it, so work can be interleaved with
/// a flow that is still running
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }

    /// Wait until a call is held at the gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// Registry contents and call records shared by every adapter built for it
#[derive(Default)]
pub struct FakeRegistry {
    pub images: Mutex<Vec<Resource>>,
    pub fetch_error: Mutex<Option<ReplicationError>>,
    pub prepared: Mutex<Vec<Resource>>,
    pub unhealthy: AtomicBool,
    pub prepare_gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeRegistry {
    pub fn with_images(images: Vec<Resource>) -> Arc<Self> {
        let registry = Self::default();
        *registry.images.lock() = images;
        Arc::new(registry)
    }

    pub fn prepared_names(&self) -> Vec<String> {
        self.prepared
            .lock()
            .iter()
            .map(|r| r.repository_name().to_string())
            .collect()
    }
}

pub struct FakeAdapter {
    registry_type: RegistryType,
    state: Arc<FakeRegistry>,
}

#[async_trait]
impl Adapter for FakeAdapter {
    async fn info(&self) -> Result<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: self.registry_type,
            description: "fake".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: vec![
                FilterStyle::text(FilterType::Name),
                FilterStyle::text(FilterType::Tag),
            ],
            supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled, TriggerType::EventBased],
        })
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let gate = self.state.prepare_gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.state.prepared.lock().extend(resources.iter().cloned());
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if self.state.unhealthy.load(Ordering::SeqCst) {
            Ok(HealthStatus::Unhealthy)
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        Some(self)
    }
}

#[async_trait]
impl ImageRegistry for FakeAdapter {
    async fn fetch_images(&self, _filters: &[Filter]) -> Result<Vec<Resource>> {
        if let Some(err) = self.state.fetch_error.lock().clone() {
            return Err(err);
        }
        Ok(self.state.images.lock().clone())
    }

    async fn manifest_exist(&self, _repository: &str, _reference: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn pull_manifest(&self, repository: &str, reference: &str, _accepted: &[&str]) -> Result<Manifest> {
        Err(ReplicationError::NotFound(format!("{}:{}", repository, reference)))
    }

    async fn push_manifest(&self, _repository: &str, _reference: &str, _media_type: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn delete_manifest(&self, _repository: &str, _reference: &str) -> Result<()> {
        Ok(())
    }

    async fn blob_exist(&self, _repository: &str, _digest: &str) -> Result<bool> {
        Ok(false)
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        Err(ReplicationError::NotFound(format!("{}@{}", repository, digest)))
    }

    async fn push_blob(&self, _repository: &str, _digest: &str, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Job service stand-in. Jobs whose destination mentions `broken` are
/// rejected, and a job whose destination contains the held name waits at
/// its gate before it is accepted.
#[derive(Default)]
pub struct FakeRunner {
    pub submitted: Mutex<Vec<JobDescriptor>>,
    pub cancelled: Mutex<Vec<String>>,
    held: Mutex<Option<(String, Arc<Gate>)>>,
}

impl FakeRunner {
    pub fn job_names(&self) -> Vec<String> {
        self.submitted.lock().iter().map(|j| j.name.clone()).collect()
    }

    /// Hold submissions of jobs for destinations containing `name`
    pub fn hold(&self, name: &str) -> Arc<Gate> {
        let gate = Gate::new();
        *self.held.lock() = Some((name.to_string(), gate.clone()));
        gate
    }
}

#[async_trait]
impl TaskRunner for FakeRunner {
    async fn submit(&self, job: &JobDescriptor) -> Result<String> {
        let dst = job
            .parameters
            .get("dst_resource")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if dst.contains("broken") {
            return Err(ReplicationError::Submission("job service rejected the job".to_string()));
        }
        let gate = self
            .held
            .lock()
            .as_ref()
            .filter(|(name, _)| dst.contains(name.as_str()))
            .map(|(_, gate)| gate.clone());
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut submitted = self.submitted.lock();
        submitted.push(job.clone());
        Ok(format!("job-{}", submitted.len()))
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        self.cancelled.lock().push(job_id.to_string());
        Ok(())
    }
}

/// Controller wired to fakes: the local registry (harbor, ID 0) and one
/// remote docker registry (ID 1)
pub struct Harness {
    pub controller: Arc<ReplicationController>,
    pub store: Arc<InMemoryExecutionManager>,
    pub runner: Arc<FakeRunner>,
    pub local: Arc<FakeRegistry>,
    pub remote: Arc<FakeRegistry>,
}

impl Harness {
    pub fn new(local: Arc<FakeRegistry>, remote: Arc<FakeRegistry>) -> Self {
        Self::with_config(ReplicationConfig::default(), local, remote)
    }

    pub fn with_config(config: ReplicationConfig, local: Arc<FakeRegistry>, remote: Arc<FakeRegistry>) -> Self {
        let mut adapters = AdapterRegistry::new();
        for (registry_type, state) in [
            (RegistryType::Harbor, local.clone()),
            (RegistryType::DockerRegistry, remote.clone()),
        ] {
            adapters
                .register(
                    registry_type,
                    Box::new(move |_: &Registry| -> Result<Box<dyn Adapter>> {
                        Ok(Box::new(FakeAdapter {
                            registry_type,
                            state: state.clone(),
                        }))
                    }),
                )
                .unwrap();
        }

        let store = Arc::new(InMemoryExecutionManager::new());
        let runner = Arc::new(FakeRunner::default());
        let dyn_store: Arc<dyn ExecutionManager> = store.clone();
        let scheduler = Arc::new(DefaultScheduler::new(runner.clone(), &config.core_url));
        let controller = Arc::new(ReplicationController::new(
            config,
            Arc::new(adapters),
            dyn_store,
            scheduler,
        ));

        Self {
            controller,
            store,
            runner,
            local,
            remote,
        }
    }
}

pub fn remote_registry() -> Registry {
    Registry::new(1, "docker-hub-mirror", RegistryType::DockerRegistry, "https://registry.example.com")
}

/// Push policy from the local registry to the remote one
pub fn push_policy(name: &str) -> Policy {
    let mut policy = Policy::new(name)
        .with_registries(None, Some(remote_registry()))
        .with_trigger(Trigger::manual());
    policy.id = 7;
    policy
}

pub fn nginx() -> Resource {
    Resource::image("library/nginx", &["1.25", "latest"])
}

pub fn redis() -> Resource {
    Resource::image("library/redis", &["7.2"])
}
