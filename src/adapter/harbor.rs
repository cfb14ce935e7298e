//! Adapter for Harbor registries
//!
//! Images travel over the Distribution API through an embedded
//! [`NativeAdapter`]; projects, repositories, labels and charts go through
//! Harbor's own REST API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::http::HttpClient;
use super::native::NativeAdapter;
use super::{Adapter, AdapterFactory, ChartRegistry, ImageRegistry, Manifest};
use crate::error::{ReplicationError, Result};
use crate::filter::filters_of;
use crate::filter::pattern::Pattern;
use crate::model::{
    Filter, FilterStyle, FilterType, HealthStatus, LOCAL_REGISTRY_NAME, Registry, RegistryInfo, RegistryType,
    Resource, ResourceType, TriggerType,
};

const PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
struct SystemInfo {
    #[serde(default)]
    with_chartmuseum: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Project {
    project_id: i64,
    name: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ProjectRequest<'a> {
    project_name: &'a str,
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct HarborRepository {
    name: String,
}

#[derive(Debug, Deserialize)]
struct HarborTag {
    name: String,
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct ChartSummary {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChartVersion {
    version: String,
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct ChartVersionDetail {
    metadata: ChartVersionMetadata,
}

#[derive(Debug, Deserialize)]
struct ChartVersionMetadata {
    #[serde(default)]
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Health {
    status: String,
}

/// Name, tag and label selectors pushed down into the Harbor listing
struct Selection {
    names: Vec<Pattern>,
    tags: Vec<Pattern>,
    labels: Vec<Vec<String>>,
}

impl Selection {
    fn from_filters(filters: &[Filter]) -> Result<Self> {
        let patterns = |kind| {
            filters_of(filters, &[kind])
                .iter()
                .map(|f| Pattern::new(f.value.as_text().unwrap_or_default()))
                .collect::<Result<Vec<_>>>()
        };
        Ok(Self {
            names: patterns(FilterType::Name)?,
            tags: patterns(FilterType::Tag)?,
            labels: filters_of(filters, &[FilterType::Label])
                .iter()
                .map(|f| f.value.as_list().into_iter().map(str::to_string).collect())
                .collect(),
        })
    }

    fn name_selected(&self, name: &str) -> bool {
        self.names.iter().all(|p| p.matches(name))
    }

    fn version_selected(&self, version: &str) -> bool {
        self.tags.iter().all(|p| p.matches(version))
    }

    /// Labels belong to the whole resource, so they are checked against the
    /// labels of all its versions
    fn labels_selected(&self, labels: &[String]) -> bool {
        self.labels
            .iter()
            .all(|wanted| wanted.iter().all(|w| labels.contains(w)))
    }

    /// Project to query when every name filter pins the same literal project
    fn literal_project(&self) -> Option<&str> {
        let mut projects = self.names.iter().map(|p| {
            let (project, _) = p.as_str().split_once('/')?;
            Pattern::new(project).ok().filter(|pp| pp.is_literal()).map(|_| project)
        });
        let first = projects.next()??;
        projects.all(|p| p == Some(first)).then_some(first)
    }
}

pub struct HarborAdapter {
    registry: Registry,
    url: String,
    client: HttpClient,
    native: NativeAdapter,
}

impl HarborAdapter {
    pub fn new(registry: &Registry, timeout: Duration, loopback_core_url: &str) -> Result<Self> {
        let url = if registry.registry_type == RegistryType::Harbor && registry.name == LOCAL_REGISTRY_NAME {
            loopback_core_url.trim_end_matches('/').to_string()
        } else {
            registry.url.clone()
        };

        let mut target = registry.clone();
        target.url = url.clone();
        let client = HttpClient::for_registry(&target, timeout)?;
        let native = NativeAdapter::with_client(&target, client.clone());

        Ok(Self {
            registry: registry.clone(),
            url,
            client,
            native,
        })
    }

    /// Base URL requests are sent to
    pub fn url(&self) -> &str {
        &self.url
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    async fn projects(&self, name: Option<&str>) -> Result<Vec<Project>> {
        let mut url = url::Url::parse(&self.api("/api/projects"))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(name) = name {
                query.append_pair("name", name);
            }
            query
                .append_pair("page", "1")
                .append_pair("page_size", &PAGE_SIZE.to_string());
        }
        let projects: Vec<Project> = self.client.get_and_iterate_pagination(url.as_str()).await?;
        // the name query is a fuzzy match
        Ok(match name {
            Some(name) => projects.into_iter().filter(|p| p.name == name).collect(),
            None => projects,
        })
    }

    async fn repositories(&self, project_id: i64) -> Result<Vec<HarborRepository>> {
        self.client
            .get_and_iterate_pagination(&self.api(&format!(
                "/api/repositories?project_id={}&page=1&page_size={}",
                project_id, PAGE_SIZE
            )))
            .await
    }

    async fn selected_projects(&self, selection: &Selection) -> Result<Vec<Project>> {
        let projects = self.projects(selection.literal_project()).await?;
        debug!("{} projects to inspect on {}", projects.len(), self.url);
        Ok(projects)
    }

    fn build_resource(&self, resource_type: ResourceType, name: &str, project: &Project, vtags: Vec<String>, labels: Vec<String>) -> Resource {
        let mut resource = Resource::new(resource_type, name, &[]);
        resource.metadata.vtags = vtags;
        resource.metadata.labels = labels;
        resource.metadata.repository.metadata = project.metadata.clone();
        resource.registry = Some(self.registry.clone());
        resource
    }

    fn chart_url(&self, name: &str) -> Result<String> {
        let (project, chart) = split_chart_name(name)?;
        Ok(self.api(&format!("/api/chartrepo/{}/charts/{}", project, chart)))
    }
}

#[async_trait]
impl Adapter for HarborAdapter {
    async fn info(&self) -> Result<RegistryInfo> {
        let mut info = RegistryInfo {
            registry_type: RegistryType::Harbor,
            description: "Harbor registry".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: vec![FilterStyle::text(FilterType::Name), FilterStyle::text(FilterType::Tag)],
            supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled],
        };

        let system: SystemInfo = self.client.get_json(&self.api("/api/systeminfo")).await?;
        if system.with_chartmuseum {
            info.supported_resource_types.push(ResourceType::Chart);
        }

        // older releases have no label API
        match self.client.get_json::<Vec<Label>>(&self.api("/api/labels?scope=g")).await {
            Ok(labels) => info.supported_resource_filters.push(FilterStyle::list(
                FilterType::Label,
                labels.into_iter().map(|l| l.name).collect(),
            )),
            Err(e) if e.is_not_found() => debug!("{} has no label API", self.url),
            Err(e) => return Err(e),
        }

        Ok(info)
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut projects: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for resource in resources {
            let name = resource.repository_name();
            if name.is_empty() {
                return Err(ReplicationError::Configuration(
                    "the name of the repository cannot be empty".to_string(),
                ));
            }
            let project = resource.metadata.repository.namespace().to_string();
            let metadata = public_metadata(&resource.metadata.repository.metadata);
            let metadata = match projects.get(&project) {
                Some(existing) => merge_metadata(existing, &metadata),
                None => metadata,
            };
            projects.insert(project, metadata);
        }

        for (name, metadata) in projects {
            let request = ProjectRequest {
                project_name: &name,
                metadata,
            };
            match self.client.post_json(&self.api("/api/projects"), &request).await {
                Ok(()) => debug!("project {} created", name),
                Err(e) if e.is_conflict() => debug!("project {} already exists", name),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.get_json::<Health>(&self.api("/api/health")).await {
            Ok(health) if health.status == "healthy" => Ok(HealthStatus::Healthy),
            Ok(health) => {
                warn!("{} reports status {}", self.url, health.status);
                Ok(HealthStatus::Unhealthy)
            }
            Err(e) => {
                warn!("health check of {} failed: {}", self.url, e);
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn as_image_registry(&self) -> Option<&dyn ImageRegistry> {
        Some(self)
    }

    fn as_chart_registry(&self) -> Option<&dyn ChartRegistry> {
        Some(self)
    }
}

#[async_trait]
impl ImageRegistry for HarborAdapter {
    async fn fetch_images(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let selection = Selection::from_filters(filters)?;
        let mut resources = Vec::new();

        for project in self.selected_projects(&selection).await? {
            for repository in self.repositories(project.project_id).await? {
                if !selection.name_selected(&repository.name) {
                    continue;
                }
                let tags: Vec<HarborTag> = self
                    .client
                    .get_json(&self.api(&format!("/api/repositories/{}/tags?detail=true", repository.name)))
                    .await?;

                let Some((vtags, labels)) = select_versions(tags.into_iter().map(|t| (t.name, t.labels)), &selection) else {
                    continue;
                };
                resources.push(self.build_resource(ResourceType::Image, &repository.name, &project, vtags, labels));
            }
        }

        debug!("fetched {} image resources from {}", resources.len(), self.url);
        Ok(resources)
    }

    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<String>> {
        self.native.manifest_exist(repository, reference).await
    }

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted_media_types: &[&str],
    ) -> Result<Manifest> {
        self.native
            .pull_manifest(repository, reference, accepted_media_types)
            .await
    }

    async fn push_manifest(&self, repository: &str, reference: &str, media_type: &str, payload: &[u8]) -> Result<()> {
        self.native
            .push_manifest(repository, reference, media_type, payload)
            .await
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        self.native.delete_manifest(repository, reference).await
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        self.native.blob_exist(repository, digest).await
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        self.native.pull_blob(repository, digest).await
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: Vec<u8>) -> Result<()> {
        self.native.push_blob(repository, digest, data).await
    }
}

#[async_trait]
impl ChartRegistry for HarborAdapter {
    async fn fetch_charts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let selection = Selection::from_filters(filters)?;
        let mut resources = Vec::new();

        for project in self.selected_projects(&selection).await? {
            let charts: Vec<ChartSummary> = self
                .client
                .get_json(&self.api(&format!("/api/chartrepo/{}/charts", project.name)))
                .await?;

            for chart in charts {
                let name = format!("{}/{}", project.name, chart.name);
                if !selection.name_selected(&name) {
                    continue;
                }
                let versions: Vec<ChartVersion> = self.client.get_json(&self.chart_url(&name)?).await?;
                let Some((vtags, labels)) = select_versions(versions.into_iter().map(|v| (v.version, v.labels)), &selection) else {
                    continue;
                };
                resources.push(self.build_resource(ResourceType::Chart, &name, &project, vtags, labels));
            }
        }

        debug!("fetched {} chart resources from {}", resources.len(), self.url);
        Ok(resources)
    }

    async fn chart_exist(&self, name: &str, version: &str) -> Result<bool> {
        let url = format!("{}/{}", self.chart_url(name)?, version);
        match self.client.get_json::<Value>(&url).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn download_chart(&self, name: &str, version: &str) -> Result<Vec<u8>> {
        let (project, _) = split_chart_name(name)?;
        let detail: ChartVersionDetail = self
            .client
            .get_json(&format!("{}/{}", self.chart_url(name)?, version))
            .await?;
        let location = detail
            .metadata
            .urls
            .first()
            .ok_or_else(|| ReplicationError::Registry(format!("no download url for chart {}:{}", name, version)))?;

        let url = if location.starts_with("http://") || location.starts_with("https://") {
            location.clone()
        } else {
            self.api(&format!("/chartrepo/{}/{}", project, location))
        };
        let response = self.client.execute(|c| c.get(&url), "chart download").await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload_chart(&self, name: &str, version: &str, chart: Vec<u8>) -> Result<()> {
        let (project, chart_name) = split_chart_name(name)?;
        let url = self.api(&format!("/api/chartrepo/{}/charts", project));
        let file_name = format!("{}-{}.tgz", chart_name, version);

        self.client
            .execute(
                |c| {
                    let part = Part::bytes(chart.clone()).file_name(file_name.clone());
                    c.post(&url).multipart(Form::new().part("chart", part))
                },
                "chart upload",
            )
            .await?;
        debug!("uploaded chart {}:{}", name, version);
        Ok(())
    }

    async fn delete_chart(&self, name: &str, version: &str) -> Result<()> {
        self.client
            .delete(&format!("{}/{}", self.chart_url(name)?, version))
            .await
    }
}

pub struct HarborAdapterFactory {
    timeout: Duration,
    loopback_core_url: String,
}

impl HarborAdapterFactory {
    pub fn new(timeout: Duration, loopback_core_url: &str) -> Self {
        Self {
            timeout,
            loopback_core_url: loopback_core_url.to_string(),
        }
    }
}

impl AdapterFactory for HarborAdapterFactory {
    fn create(&self, registry: &Registry) -> Result<Box<dyn Adapter>> {
        Ok(Box::new(HarborAdapter::new(registry, self.timeout, &self.loopback_core_url)?))
    }
}

/// Versions passing the tag selectors and the labels of every version, or
/// `None` when the resource is not selected
fn select_versions(
    versions: impl Iterator<Item = (String, Vec<Label>)>,
    selection: &Selection,
) -> Option<(Vec<String>, Vec<String>)> {
    let mut vtags = Vec::new();
    let mut labels: Vec<String> = Vec::new();
    for (version, version_labels) in versions {
        for label in version_labels {
            if !labels.contains(&label.name) {
                labels.push(label.name);
            }
        }
        if selection.version_selected(&version) {
            vtags.push(version);
        }
    }
    (!vtags.is_empty() && selection.labels_selected(&labels)).then_some((vtags, labels))
}

fn split_chart_name(name: &str) -> Result<(&str, &str)> {
    match name.split_once('/') {
        Some((project, chart)) if !project.is_empty() && !chart.is_empty() && !chart.contains('/') => {
            Ok((project, chart))
        }
        _ => Err(ReplicationError::Validation(format!(
            "invalid chart name {}, expected <project>/<chart>",
            name
        ))),
    }
}

/// Only the `public` flag of a project is carried to the destination
fn public_metadata(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .get("public")
        .map(|public| Map::from_iter([("public".to_string(), public.clone())]))
        .unwrap_or_default()
}

/// A project shared by several resources is public only if all of them are
fn merge_metadata(a: &Map<String, Value>, b: &Map<String, Value>) -> Map<String, Value> {
    let public = parse_public(a) && parse_public(b);
    Map::from_iter([("public".to_string(), Value::String(public.to_string()))])
}

fn parse_public(metadata: &Map<String, Value>) -> bool {
    match metadata.get("public") {
        Some(Value::Bool(public)) => *public,
        Some(Value::String(public)) => public.parse().unwrap_or_else(|_| {
            warn!("failed to parse public flag {}", public);
            false
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_public_metadata_keeps_only_public() {
        let metadata = map(json!({"public": "true", "auto_scan": "true"}));
        assert_eq!(public_metadata(&metadata), map(json!({"public": "true"})));
        assert!(public_metadata(&Map::new()).is_empty());
    }

    #[test]
    fn test_merge_metadata() {
        let public = map(json!({"public": true}));
        let public_str = map(json!({"public": "true"}));
        let private = map(json!({"public": "false"}));
        assert_eq!(merge_metadata(&public, &public_str), map(json!({"public": "true"})));
        assert_eq!(merge_metadata(&public, &private), map(json!({"public": "false"})));
        assert_eq!(merge_metadata(&public, &Map::new()), map(json!({"public": "false"})));
    }

    #[test]
    fn test_split_chart_name() {
        assert_eq!(split_chart_name("library/harbor").unwrap(), ("library", "harbor"));
        assert!(split_chart_name("harbor").is_err());
        assert!(split_chart_name("a/b/c").is_err());
    }

    #[test]
    fn test_local_harbor_uses_loopback_url() {
        let local = Registry::new(0, LOCAL_REGISTRY_NAME, RegistryType::Harbor, "https://harbor.example.com");
        let adapter = HarborAdapter::new(&local, Duration::from_secs(5), "http://127.0.0.1:8080").unwrap();
        assert_eq!(adapter.url(), "http://127.0.0.1:8080");

        let remote = Registry::new(3, "dr", RegistryType::Harbor, "https://dr.example.com");
        let adapter = HarborAdapter::new(&remote, Duration::from_secs(5), "http://127.0.0.1:8080").unwrap();
        assert_eq!(adapter.url(), "https://dr.example.com");
    }

    #[test]
    fn test_selection_pushdown() {
        let filters = vec![
            Filter::name("library/*"),
            Filter::tag("v1.*"),
            Filter::label("prod"),
        ];
        let selection = Selection::from_filters(&filters).unwrap();
        assert_eq!(selection.literal_project(), Some("library"));
        assert!(selection.name_selected("library/nginx"));
        assert!(!selection.name_selected("infra/nginx"));

        assert!(selection.version_selected("v1.2"));
        assert!(!selection.version_selected("v2.0"));
        assert!(selection.labels_selected(&["dev".to_string(), "prod".to_string()]));
        assert!(!selection.labels_selected(&[]));

        let selection = Selection::from_filters(&[Filter::name("lib*/nginx")]).unwrap();
        assert_eq!(selection.literal_project(), None);
        let selection = Selection::from_filters(&[]).unwrap();
        assert_eq!(selection.literal_project(), None);
    }

    #[test]
    fn test_select_versions_unions_labels() {
        let selection = Selection::from_filters(&[Filter::tag("1.*")]).unwrap();
        let versions = vec![
            ("1.0".to_string(), vec![Label { name: "a".to_string() }]),
            ("1.1".to_string(), vec![Label { name: "a".to_string() }, Label { name: "b".to_string() }]),
            ("2.0".to_string(), vec![Label { name: "c".to_string() }]),
        ];
        let (vtags, labels) = select_versions(versions.clone().into_iter(), &selection).unwrap();
        assert_eq!(vtags, vec!["1.0", "1.1"]);
        assert_eq!(labels, vec!["a", "b", "c"]);

        // a label on an unselected version still selects the resource
        let selection = Selection::from_filters(&[Filter::tag("1.*"), Filter::label("c")]).unwrap();
        let (vtags, _) = select_versions(versions.clone().into_iter(), &selection).unwrap();
        assert_eq!(vtags, vec!["1.0", "1.1"]);

        let selection = Selection::from_filters(&[Filter::label("d")]).unwrap();
        assert!(select_versions(versions.clone().into_iter(), &selection).is_none());
        let selection = Selection::from_filters(&[Filter::tag("3.*")]).unwrap();
        assert!(select_versions(versions.into_iter(), &selection).is_none());
    }
}
