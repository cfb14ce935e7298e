//! Registry adapters
//!
//! An [`Adapter`] wraps one remote registry. Every adapter reports its
//! capabilities, prepares namespaces before a push and can be probed for
//! health. Data-plane access is split by resource type: adapters that serve
//! images expose [`ImageRegistry`], adapters that serve charts expose
//! [`ChartRegistry`]. Callers discover the capabilities at runtime through
//! `as_image_registry` / `as_chart_registry`.
//!
//! Adapters are built by [`AdapterFactory`] implementations looked up by
//! registry type in an [`AdapterRegistry`].

pub mod auth;
pub mod harbor;
pub mod http;
pub mod huawei;
pub mod native;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::model::{Filter, HealthStatus, Registry, RegistryInfo, RegistryType, Resource};

pub use http::USER_AGENT_REPLICATION;

pub const MEDIA_TYPE_DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Manifest media types requested when none are given
pub const DEFAULT_MANIFEST_MEDIA_TYPES: [&str; 4] = [
    MEDIA_TYPE_DOCKER_MANIFEST_V2,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_OCI_INDEX,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub media_type: String,
    pub digest: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Capabilities of the registry: resource types, filters, triggers
    async fn info(&self) -> Result<RegistryInfo>;

    /// Make sure the namespaces the resources will be pushed into exist
    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()>;

    async fn health_check(&self) -> Result<HealthStatus>;

    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        None
    }

    fn as_chart_registry(&self) -> Option<&dyn ChartRegistry> {
        None
    }
}

/// Image data plane of a registry
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// List image resources, applying the filters the registry can evaluate
    async fn fetch_images(&self, filters: &[Filter]) -> Result<Vec<Resource>>;

    /// Digest of the manifest if it exists
    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<String>>;

    async fn pull_manifest(&self, repository: &str, reference: &str, accepted_media_types: &[&str])
    -> Result<Manifest>;

    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: &[u8])
    -> Result<()>;

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()>;

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool>;

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>>;

    async fn push_blob(&self, repository: &str, digest: &str, data: Vec<u8>) -> Result<()>;
}

/// Chart data plane of a registry
#[async_trait]
pub trait ChartRegistry: Send + Sync {
    async fn fetch_charts(&self, filters: &[Filter]) -> Result<Vec<Resource>>;

    async fn chart_exist(&self, name: &str, version: &str) -> Result<bool>;

    async fn download_chart(&self, name: &str, version: &str) -> Result<Vec<u8>>;

    async fn upload_chart(&self, name: &str, version: &str, chart: Vec<u8>) -> Result<()>;

    async fn delete_chart(&self, name: &str, version: &str) -> Result<()>;
}

/// Builds an adapter for one registry
pub trait AdapterFactory: Send + Sync {
    fn create(&self, registry: &Registry) -> Result<Box<dyn Adapter>>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&Registry) -> Result<Box<dyn Adapter>> + Send + Sync,
{
    fn create(&self, registry: &Registry) -> Result<Box<dyn Adapter>> {
        self(registry)
    }
}

/// Adapter factories keyed by registry type
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<RegistryType, Box<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters
    pub fn with_defaults(config: &ReplicationConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout);
        let mut registry = Self::new();
        registry.factories.insert(
            RegistryType::DockerRegistry,
            Box::new(native::NativeAdapterFactory::new(timeout)),
        );
        registry.factories.insert(
            RegistryType::Harbor,
            Box::new(harbor::HarborAdapterFactory::new(timeout, &config.loopback_core_url)),
        );
        registry.factories.insert(
            RegistryType::Huawei,
            Box::new(huawei::HuaweiAdapterFactory::new(timeout)),
        );
        registry
    }

    /// Register a factory; each registry type can be registered once
    pub fn register(&mut self, registry_type: RegistryType, factory: Box<dyn AdapterFactory>) -> Result<()> {
        if self.factories.contains_key(&registry_type) {
            return Err(ReplicationError::Configuration(format!(
                "adapter factory for {} already registered",
                registry_type
            )));
        }
        debug!("registered adapter factory for {}", registry_type);
        self.factories.insert(registry_type, factory);
        Ok(())
    }

    pub fn create(&self, registry: &Registry) -> Result<Box<dyn Adapter>> {
        let factory = self.factories.get(&registry.registry_type).ok_or_else(|| {
            ReplicationError::Configuration(format!(
                "no adapter factory registered for {}",
                registry.registry_type
            ))
        })?;
        factory.create(registry)
    }

    /// Registered types, sorted by name
    pub fn types(&self) -> Vec<RegistryType> {
        let mut types: Vec<RegistryType> = self.factories.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
