//! Replicable resources: a repository plus the tags selected from it

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::registry::Registry;
use crate::error::ReplicationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Chart,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Chart => "chart",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ResourceType::Image),
            "chart" => Ok(ResourceType::Chart),
            other => Err(ReplicationError::Configuration(format!(
                "invalid resource type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Repository {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            metadata: Map::new(),
        }
    }

    /// First path segment, which is the project/namespace on most registries
    pub fn namespace(&self) -> &str {
        self.name.split('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub repository: Repository,
    #[serde(default)]
    pub vtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub metadata: ResourceMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<Registry>,
    #[serde(default)]
    pub override_existing: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Resource {
    pub fn new(resource_type: ResourceType, repository: &str, vtags: &[&str]) -> Self {
        Self {
            resource_type,
            metadata: ResourceMetadata {
                repository: Repository::new(repository),
                vtags: vtags.iter().map(|t| t.to_string()).collect(),
                labels: Vec::new(),
            },
            registry: None,
            override_existing: false,
            deleted: false,
        }
    }

    pub fn image(repository: &str, vtags: &[&str]) -> Self {
        Self::new(ResourceType::Image, repository, vtags)
    }

    pub fn chart(repository: &str, vtags: &[&str]) -> Self {
        Self::new(ResourceType::Chart, repository, vtags)
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.metadata.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn repository_name(&self) -> &str {
        &self.metadata.repository.name
    }

    /// Display name used on task records, e.g. `library/nginx:[1.25,latest]`
    pub fn display_name(&self) -> String {
        let name = self.repository_name();
        let vtags = &self.metadata.vtags;
        if vtags.is_empty() {
            return name.to_string();
        }
        if vtags.len() <= 5 {
            return format!("{}:[{}]", name, vtags.join(","));
        }
        format!("{}:[{} ... {} in total]", name, vtags[..5].join(","), vtags.len())
    }
}
