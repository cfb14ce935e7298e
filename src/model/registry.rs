//! Registry coordinates and adapter capability descriptions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::policy::{FilterType, TriggerType};
use super::resource::ResourceType;
use crate::error::ReplicationError;

/// Name the host gives the registry it is running inside
pub const LOCAL_REGISTRY_NAME: &str = "Local";

/// Registry families an adapter can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegistryType {
    #[serde(rename = "harbor")]
    Harbor,
    #[serde(rename = "docker-registry")]
    DockerRegistry,
    #[serde(rename = "huawei-SWR")]
    Huawei,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Harbor => "harbor",
            RegistryType::DockerRegistry => "docker-registry",
            RegistryType::Huawei => "huawei-SWR",
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryType {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "harbor" => Ok(RegistryType::Harbor),
            "docker-registry" => Ok(RegistryType::DockerRegistry),
            "huawei-SWR" => Ok(RegistryType::Huawei),
            other => Err(ReplicationError::Configuration(format!(
                "unsupported registry type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Basic,
    Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub credential_type: CredentialType,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub access_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub insecure: bool,
}

impl Registry {
    pub fn new(id: i64, name: &str, registry_type: RegistryType, url: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: String::new(),
            registry_type,
            url: url.trim_end_matches('/').to_string(),
            credential: None,
            insecure: false,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// The registry the orchestrator itself runs in is always stored with ID 0
    pub fn is_local(&self) -> bool {
        self.id == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStyleType {
    Input,
    Radio,
    List,
}

/// How a filter is presented for a registry, with the allowed values if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStyle {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub style: FilterStyleType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl FilterStyle {
    pub fn text(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            style: FilterStyleType::Input,
            values: Vec::new(),
        }
    }

    pub fn list(filter_type: FilterType, values: Vec<String>) -> Self {
        Self {
            filter_type,
            style: FilterStyleType::List,
            values,
        }
    }
}

/// Capabilities advertised by an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    #[serde(default)]
    pub description: String,
    pub supported_resource_types: Vec<ResourceType>,
    pub supported_resource_filters: Vec<FilterStyle>,
    pub supported_triggers: Vec<TriggerType>,
}

impl RegistryInfo {
    pub fn supports_resource_type(&self, resource_type: ResourceType) -> bool {
        self.supported_resource_types.contains(&resource_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "healthy")]
    Healthy,
    #[serde(rename = "unhealthy")]
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_type_round_trip_names() {
        for registry_type in [RegistryType::Harbor, RegistryType::DockerRegistry, RegistryType::Huawei] {
            assert_eq!(registry_type.as_str().parse::<RegistryType>().unwrap(), registry_type);
        }
        assert!("quay".parse::<RegistryType>().is_err());
    }

    #[test]
    fn test_registry_json_shape() {
        let json = r#"{
            "id": 3,
            "name": "swr",
            "type": "huawei-SWR",
            "url": "https://swr.cn-north-1.myhuaweicloud.com/",
            "credential": {"type": "basic", "access_key": "ak", "access_secret": "sk"}
        }"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.registry_type, RegistryType::Huawei);
        assert!(!registry.is_local());
        assert!(!registry.insecure);
        assert_eq!(registry.credential.unwrap().credential_type, CredentialType::Basic);
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let registry = Registry::new(0, LOCAL_REGISTRY_NAME, RegistryType::Harbor, "https://core.local/");
        assert_eq!(registry.url, "https://core.local");
        assert!(registry.is_local());
    }
}
