//! Adapter for Huawei Cloud SWR
//!
//! SWR speaks the Distribution API for image data. Namespaces are managed
//! through its `dockyard` API and must exist before the first push.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use super::auth::Authorizer;
use super::http::{HttpClient, ensure_success};
use super::native::NativeAdapter;
use super::{Adapter, AdapterFactory, ImageRegistry};
use crate::error::{ReplicationError, Result};
use crate::model::{HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SwrNamespaceList {
    #[serde(default)]
    namespaces: Vec<SwrNamespace>,
}

#[derive(Debug, Deserialize)]
struct SwrNamespace {
    #[serde(default)]
    id: i64,
    name: String,
    #[serde(default)]
    creator_name: String,
    #[serde(default)]
    auth: i64,
    #[serde(default)]
    user_count: i64,
    #[serde(default)]
    image_count: i64,
}

impl From<SwrNamespace> for Namespace {
    fn from(ns: SwrNamespace) -> Self {
        let metadata = Map::from_iter([
            ("id".to_string(), Value::from(ns.id)),
            ("creator_name".to_string(), Value::from(ns.creator_name)),
            ("auth".to_string(), Value::from(ns.auth)),
            ("user_count".to_string(), Value::from(ns.user_count)),
            ("image_count".to_string(), Value::from(ns.image_count)),
        ]);
        Namespace { name: ns.name, metadata }
    }
}

#[derive(Debug, Serialize)]
struct CreateNamespace<'a> {
    namespace: &'a str,
}

pub struct HuaweiAdapter {
    registry: Registry,
    client: HttpClient,
    native: NativeAdapter,
}

impl HuaweiAdapter {
    pub fn new(registry: &Registry, timeout: Duration) -> Result<Self> {
        // the dockyard API only accepts basic credentials
        let authorizer = match Authorizer::for_registry(registry) {
            Authorizer::Secret(_) => Authorizer::Anonymous,
            other => other,
        };
        let client = HttpClient::builder()
            .with_authorizer(authorizer)
            .with_insecure(registry.insecure)
            .with_timeout(timeout)
            .build()?;

        Ok(Self {
            registry: registry.clone(),
            client,
            native: NativeAdapter::new(registry, timeout)?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.registry.url, path)
    }

    /// Visible namespaces whose name contains `name`
    pub async fn list_namespaces(&self, name: &str) -> Result<Vec<Namespace>> {
        let url = self.url("/dockyard/v2/visible/namespaces");
        let response = self
            .client
            .execute(|c| c.get(&url).header(CONTENT_TYPE, JSON_CONTENT_TYPE), "namespace listing")
            .await?;
        let list: SwrNamespaceList = response
            .json()
            .await
            .map_err(|e| ReplicationError::Registry(format!("Failed to parse namespace list: {}", e)))?;

        let needle = name.replace(' ', "");
        Ok(list
            .namespaces
            .into_iter()
            .filter(|ns| ns.name.contains(&needle))
            .map(Namespace::from)
            .collect())
    }

    /// The namespace, or None when SWR does not know it
    pub async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let url = self.url(&format!("/dockyard/v2/namespaces/{}", name));
        let response = self
            .client
            .send(|c| c.get(&url).header(CONTENT_TYPE, JSON_CONTENT_TYPE), "namespace lookup")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, "namespace lookup").await?;
        let namespace: SwrNamespace = response
            .json()
            .await
            .map_err(|e| ReplicationError::Registry(format!("Failed to parse namespace: {}", e)))?;
        Ok(Some(namespace.into()))
    }

    pub async fn create_namespace(&self, name: &str) -> Result<()> {
        let url = self.url("/dockyard/v2/namespaces");
        let body = serde_json::to_vec(&CreateNamespace { namespace: name })?;
        let result = self
            .client
            .execute(
                |c| c.post(&url).header(CONTENT_TYPE, JSON_CONTENT_TYPE).body(body.clone()),
                "namespace creation",
            )
            .await;
        match result {
            Ok(_) => debug!("namespace {} created", name),
            Err(e) if e.is_conflict() => debug!("namespace {} already exists", name),
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for HuaweiAdapter {
    async fn info(&self) -> Result<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: RegistryType::Huawei,
            description: "Adapter for SWR -- The image registry of Huawei Cloud".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: Vec::new(),
            supported_triggers: Vec::new(),
        })
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut missing = BTreeSet::new();
        for resource in resources {
            let namespace = resource.metadata.repository.namespace();
            if namespace.is_empty() {
                return Err(ReplicationError::Configuration(
                    "the name of the namespace cannot be empty".to_string(),
                ));
            }
            if missing.contains(namespace) {
                continue;
            }
            match self.get_namespace(namespace).await? {
                Some(ns) if ns.name == namespace => continue,
                _ => {
                    missing.insert(namespace.to_string());
                }
            }
        }

        for namespace in &missing {
            self.create_namespace(namespace).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }

    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        self.native.as_image_registry()
    }
}

pub struct HuaweiAdapterFactory {
    timeout: Duration,
}

impl HuaweiAdapterFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl AdapterFactory for HuaweiAdapterFactory {
    fn create(&self, registry: &Registry) -> Result<Box<dyn Adapter>> {
        Ok(Box::new(HuaweiAdapter::new(registry, self.timeout)?))
    }
}
