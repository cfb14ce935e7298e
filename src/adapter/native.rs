//! Adapter for plain Docker Distribution (v2 API) registries

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::http::{HttpClient, ensure_success, next_page};
use super::{Adapter, AdapterFactory, DEFAULT_MANIFEST_MEDIA_TYPES, ImageRegistry, Manifest};
use crate::error::{ReplicationError, Result};
use crate::filter::pattern::Pattern;
use crate::filter::{filter_resources, filters_of};
use crate::model::{
    Filter, FilterStyle, FilterType, HealthStatus, Registry, RegistryInfo, RegistryType, Resource, ResourceType,
    TriggerType,
};

const CATALOG_PAGE_SIZE: usize = 1000;
const TAG_LIST_CONCURRENCY: usize = 8;
const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub struct NativeAdapter {
    registry: Registry,
    client: HttpClient,
}

impl NativeAdapter {
    pub fn new(registry: &Registry, timeout: Duration) -> Result<Self> {
        let client = HttpClient::for_registry(registry, timeout)?;
        Ok(Self::with_client(registry, client))
    }

    pub fn with_client(registry: &Registry, client: HttpClient) -> Self {
        Self {
            registry: registry.clone(),
            client,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.registry.url, path)
    }

    /// Every repository in the registry catalog
    pub async fn catalog(&self) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(url::Url::parse(&self.url(&format!("/v2/_catalog?n={}", CATALOG_PAGE_SIZE)))?);

        while let Some(current) = next.take() {
            let response = self
                .client
                .execute(|c| c.get(current.clone()), "catalog listing")
                .await?;
            let link = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let page: CatalogPage = response
                .json()
                .await
                .map_err(|e| ReplicationError::Registry(format!("Failed to parse catalog: {}", e)))?;
            repositories.extend(page.repositories);

            next = next_page(&current, link.as_deref(), &mut visited)?;
        }

        debug!("catalog of {} lists {} repositories", self.registry.url, repositories.len());
        Ok(repositories)
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let list: TagList = self
            .client
            .get_json(&self.url(&format!("/v2/{}/tags/list", repository)))
            .await?;
        Ok(list.tags.unwrap_or_default())
    }

    /// Repositories selected by the name filters. A single literal name skips
    /// the catalog walk.
    async fn candidate_repositories(&self, name_filters: &[Filter]) -> Result<Vec<String>> {
        let patterns = name_filters
            .iter()
            .map(|f| Pattern::new(f.value.as_text().unwrap_or_default()))
            .collect::<Result<Vec<_>>>()?;

        if let [pattern] = patterns.as_slice() {
            if pattern.is_literal() {
                return Ok(vec![pattern.as_str().to_string()]);
            }
        }

        Ok(self
            .catalog()
            .await?
            .into_iter()
            .filter(|name| patterns.iter().all(|p| p.matches(name)))
            .collect())
    }

    async fn fetch_repository(&self, repository: String, tag_filters: &[Filter]) -> Result<Option<Resource>> {
        let tags = match self.list_tags(&repository).await {
            Ok(tags) => tags,
            Err(e) if e.is_not_found() => {
                debug!("repository {} not found, skipping", repository);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if tags.is_empty() {
            return Ok(None);
        }

        let mut resource = Resource::image(&repository, &[]);
        resource.metadata.vtags = tags;
        resource.registry = Some(self.registry.clone());
        Ok(filter_resources(vec![resource], tag_filters)?.pop())
    }

    /// Resolve a tag to the digest of its manifest
    async fn resolve_digest(&self, repository: &str, reference: &str) -> Result<String> {
        if reference.contains(':') {
            return Ok(reference.to_string());
        }
        match self.manifest_exist(repository, reference).await? {
            Some(digest) if !digest.is_empty() => Ok(digest),
            Some(_) => Err(ReplicationError::Registry(format!(
                "registry returned no digest for {}:{}",
                repository, reference
            ))),
            None => Err(ReplicationError::NotFound(format!("{}:{}", repository, reference))),
        }
    }

    fn resolve_location(&self, location: &str) -> Result<url::Url> {
        let base = url::Url::parse(&self.registry.url)?;
        Ok(base.join(location)?)
    }
}

#[async_trait]
impl Adapter for NativeAdapter {
    async fn info(&self) -> Result<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: RegistryType::DockerRegistry,
            description: "Docker Distribution registry".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: vec![FilterStyle::text(FilterType::Name), FilterStyle::text(FilterType::Tag)],
            supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled],
        })
    }

    async fn prepare_for_push(&self, _resources: &[Resource]) -> Result<()> {
        // repositories are created by the first push
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = self.url("/v2/");
        match self.client.inner().get(&url).send().await {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED => {
                Ok(HealthStatus::Healthy)
            }
            Ok(response) => {
                warn!("{} answered {} to health probe", url, response.status());
                Ok(HealthStatus::Unhealthy)
            }
            Err(e) => {
                warn!("health probe of {} failed: {}", url, e);
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        Some(self)
    }
}

#[async_trait]
impl ImageRegistry for NativeAdapter {
    async fn fetch_images(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let name_filters = filters_of(filters, &[FilterType::Name]);
        let tag_filters = filters_of(filters, &[FilterType::Tag]);

        let repositories = self.candidate_repositories(&name_filters).await?;
        let resources: Vec<Option<Resource>> = stream::iter(repositories)
            .map(|repository| self.fetch_repository(repository, &tag_filters))
            .buffered(TAG_LIST_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(resources.into_iter().flatten().collect())
    }

    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<String>> {
        let url = self.url(&format!("/v2/{}/manifests/{}", repository, reference));
        let accept = DEFAULT_MANIFEST_MEDIA_TYPES.join(", ");
        let response = self
            .client
            .send(|c| c.head(&url).header(ACCEPT, accept.as_str()), "manifest check")
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, "manifest check").await?;
        let digest = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(Some(digest))
    }

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted_media_types: &[&str],
    ) -> Result<Manifest> {
        let url = self.url(&format!("/v2/{}/manifests/{}", repository, reference));
        let accept = if accepted_media_types.is_empty() {
            DEFAULT_MANIFEST_MEDIA_TYPES.join(", ")
        } else {
            accepted_media_types.join(", ")
        };
        let response = self
            .client
            .execute(|c| c.get(&url).header(ACCEPT, accept.as_str()), "manifest pull")
            .await?;

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let digest = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let payload = response.bytes().await?.to_vec();
        let digest = digest.unwrap_or_else(|| sha256_digest(&payload));

        Ok(Manifest {
            media_type,
            digest,
            payload,
        })
    }

    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: &[u8]) -> Result<()> {
        let url = self.url(&format!("/v2/{}/manifests/{}", repository, reference));
        self.client
            .execute(
                |c| c.put(&url).header(CONTENT_TYPE, media_type).body(payload.to_vec()),
                "manifest push",
            )
            .await?;
        debug!("pushed manifest {}:{}", repository, reference);
        Ok(())
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let digest = self.resolve_digest(repository, reference).await?;
        self.client
            .delete(&self.url(&format!("/v2/{}/manifests/{}", repository, digest)))
            .await?;
        debug!("deleted manifest {}@{}", repository, digest);
        Ok(())
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        let url = self.url(&format!("/v2/{}/blobs/{}", repository, digest));
        let response = self.client.send(|c| c.head(&url), "blob check").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response, "blob check").await?;
        Ok(true)
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("/v2/{}/blobs/{}", repository, digest));
        let response = self.client.execute(|c| c.get(&url), "blob pull").await?;
        let data = response.bytes().await?.to_vec();
        verify_digest(&data, digest)?;
        Ok(data)
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: Vec<u8>) -> Result<()> {
        let start_url = self.url(&format!("/v2/{}/blobs/uploads/", repository));
        let response = self
            .client
            .execute(|c| c.post(&start_url), "blob upload start")
            .await?;

        let location = response
            .headers()
            .get(LOCATION)
            .ok_or_else(|| ReplicationError::Registry("Missing Location header in upload response".to_string()))?
            .to_str()
            .map_err(|e| ReplicationError::Registry(format!("Invalid Location header: {}", e)))?;
        let mut upload_url = self.resolve_location(location)?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        self.client
            .execute(
                |c| {
                    c.put(upload_url.clone())
                        .header(CONTENT_TYPE, "application/octet-stream")
                        .body(data.clone())
                },
                "blob upload",
            )
            .await?;
        debug!("pushed blob {} to {}", digest, repository);
        Ok(())
    }
}

pub struct NativeAdapterFactory {
    timeout: Duration,
}

impl NativeAdapterFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl AdapterFactory for NativeAdapterFactory {
    fn create(&self, registry: &Registry) -> Result<Box<dyn super::Adapter>> {
        Ok(Box::new(NativeAdapter::new(registry, self.timeout)?))
    }
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Check downloaded content against its digest. Algorithms other than
/// sha256 are not verified.
pub fn verify_digest(data: &[u8], digest: &str) -> Result<()> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        debug!("skipping verification of {}", digest);
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ReplicationError::Registry(format!(
            "digest mismatch: expected sha256:{}, got sha256:{}",
            expected, actual
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_digest() {
        let data = b"hello";
        let digest = sha256_digest(data);
        assert_eq!(
            digest,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(verify_digest(data, &digest).is_ok());
        assert!(verify_digest(b"other", &digest).is_err());
        assert!(verify_digest(data, "sha512:abc").is_ok());
    }

    #[tokio::test]
    async fn test_info_advertises_images_only() {
        let registry = Registry::new(1, "hub", RegistryType::DockerRegistry, "https://hub.example.com");
        let adapter = NativeAdapter::new(&registry, Duration::from_secs(5)).unwrap();
        let info = adapter.info().await.unwrap();
        assert!(info.supports_resource_type(ResourceType::Image));
        assert!(!info.supports_resource_type(ResourceType::Chart));
        assert!(adapter.as_image_registry().is_some());
        assert!(adapter.as_chart_registry().is_none());
    }

    #[test]
    fn test_resolve_relative_location() {
        let registry = Registry::new(1, "hub", RegistryType::DockerRegistry, "https://hub.example.com");
        let adapter = NativeAdapter::new(&registry, Duration::from_secs(5)).unwrap();
        let url = adapter
            .resolve_location("/v2/library/nginx/blobs/uploads/abc?_state=x")
            .unwrap();
        assert_eq!(url.as_str(), "https://hub.example.com/v2/library/nginx/blobs/uploads/abc?_state=x");
    }
}
