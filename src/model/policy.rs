//! Replication policies, their filters and triggers

use croner::Cron;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::registry::Registry;
use super::resource::ResourceType;
use crate::error::{ReplicationError, Result};
use crate::filter::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[serde(rename = "resource")]
    Resource,
    Name,
    Tag,
    Label,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterType::Resource => "resource",
            FilterType::Name => "name",
            FilterType::Tag => "tag",
            FilterType::Label => "label",
        };
        f.write_str(name)
    }
}

/// Filter values are plain strings except for label filters, which may list
/// several labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    List(Vec<String>),
}

impl FilterValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FilterValue::Text(value) => Some(value),
            FilterValue::List(_) => None,
        }
    }

    /// Values as a list; a text value is a list of one
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            FilterValue::Text(value) => vec![value.as_str()],
            FilterValue::List(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(filter_type: FilterType, value: impl Into<FilterValue>) -> Self {
        Self {
            filter_type,
            value: value.into(),
        }
    }

    pub fn resource(resource_type: ResourceType) -> Self {
        Self::new(FilterType::Resource, resource_type.as_str())
    }

    pub fn name(pattern: &str) -> Self {
        Self::new(FilterType::Name, pattern)
    }

    pub fn tag(pattern: &str) -> Self {
        Self::new(FilterType::Tag, pattern)
    }

    pub fn label(label: &str) -> Self {
        Self::new(FilterType::Label, label)
    }

    /// The resource type carried by a `resource` filter
    pub fn resource_type(&self) -> Result<ResourceType> {
        match self.value.as_text() {
            Some(value) => value.parse(),
            None => Err(ReplicationError::Configuration(
                "the value of resource filter must be a string".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.filter_type {
            FilterType::Resource => {
                self.resource_type()?;
            }
            FilterType::Name | FilterType::Tag => {
                let value = self.value.as_text().ok_or_else(|| {
                    ReplicationError::Configuration(format!(
                        "the value of {} filter must be a string",
                        self.filter_type
                    ))
                })?;
                if value.is_empty() {
                    return Err(ReplicationError::Configuration(format!(
                        "the value of {} filter cannot be empty",
                        self.filter_type
                    )));
                }
                Pattern::new(value)?;
            }
            FilterType::Label => {
                let labels = self.value.as_list();
                if labels.is_empty() || labels.iter().any(|l| l.is_empty()) {
                    return Err(ReplicationError::Configuration(
                        "the value of label filter cannot be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    EventBased,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::EventBased => "event_based",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(default)]
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<TriggerSettings>,
}

impl Trigger {
    pub fn manual() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            settings: None,
        }
    }

    pub fn event_based() -> Self {
        Self {
            trigger_type: TriggerType::EventBased,
            settings: None,
        }
    }

    pub fn scheduled(cron: &str) -> Self {
        Self {
            trigger_type: TriggerType::Scheduled,
            settings: Some(TriggerSettings {
                cron: cron.to_string(),
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trigger_type != TriggerType::Scheduled {
            return Ok(());
        }
        let cron = self
            .settings
            .as_ref()
            .map(|s| s.cron.trim())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ReplicationError::Configuration(
                    "the cron string cannot be empty when the trigger type is scheduled".to_string(),
                )
            })?;
        validate_cron(cron)
    }
}

/// Accepts classic 5-field expressions and 6-field expressions with seconds
pub fn validate_cron(cron: &str) -> Result<()> {
    let fields = cron.split_whitespace().count();
    if fields != 5 && fields != 6 {
        return Err(ReplicationError::Configuration(format!(
            "invalid cron string {}: expected 5 or 6 fields, got {}",
            cron, fields
        )));
    }
    Cron::new(cron)
        .with_seconds_optional()
        .parse()
        .map_err(|e| ReplicationError::Configuration(format!("invalid cron string {}: {}", cron, e)))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_registry: Option<Registry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_registry: Option<Registry>,
    #[serde(default)]
    pub dest_namespace: String,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub deletion: bool,
}

fn default_enabled() -> bool {
    true
}

impl Policy {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            src_registry: None,
            dest_registry: None,
            dest_namespace: String::new(),
            override_existing: false,
            filters: Vec::new(),
            trigger: None,
            enabled: true,
            deletion: false,
        }
    }

    pub fn with_registries(mut self, src: Option<Registry>, dest: Option<Registry>) -> Self {
        self.src_registry = src;
        self.dest_registry = dest;
        self
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_dest_namespace(mut self, namespace: &str) -> Self {
        self.dest_namespace = namespace.to_string();
        self
    }

    pub fn with_override(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }

    pub fn dest_namespace(&self) -> Option<&str> {
        Some(self.dest_namespace.as_str()).filter(|ns| !ns.is_empty())
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger
            .as_ref()
            .map(|t| t.trigger_type)
            .unwrap_or(TriggerType::Manual)
    }

    /// Whether the source side is the local registry (absent or ID 0)
    pub fn is_source_local(&self) -> bool {
        self.src_registry.as_ref().is_none_or(Registry::is_local)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ReplicationError::Configuration(
                "the policy name cannot be empty".to_string(),
            ));
        }

        match (&self.src_registry, &self.dest_registry) {
            (None, None) => {
                return Err(ReplicationError::Configuration(
                    "source registry and destination registry cannot both be empty".to_string(),
                ));
            }
            (Some(src), Some(dest)) if !src.is_local() && !dest.is_local() => {
                return Err(ReplicationError::Configuration(
                    "either the source registry or the destination registry must be the local registry"
                        .to_string(),
                ));
            }
            (Some(src), Some(dest)) if src.is_local() && dest.is_local() => {
                return Err(ReplicationError::Configuration(
                    "source registry and destination registry cannot both be the local registry"
                        .to_string(),
                ));
            }
            (None, Some(dest)) if dest.is_local() => {
                return Err(ReplicationError::Configuration(
                    "the policy must reference a remote registry".to_string(),
                ));
            }
            (Some(src), None) if src.is_local() => {
                return Err(ReplicationError::Configuration(
                    "the policy must reference a remote registry".to_string(),
                ));
            }
            _ => {}
        }

        for filter in &self.filters {
            filter.validate()?;
        }

        match &self.trigger {
            Some(trigger) => trigger.validate()?,
            None if self.filters.iter().any(|f| f.filter_type == FilterType::Resource) => {
                return Err(ReplicationError::Configuration(
                    "a trigger is required when the policy filters by resource type".to_string(),
                ));
            }
            None => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::registry::RegistryType;

    fn registry(id: i64) -> Registry {
        Registry::new(id, &format!("registry-{}", id), RegistryType::Harbor, "https://harbor.example.com")
    }

    fn base_policy() -> Policy {
        Policy::new("policy01").with_registries(Some(registry(0)), Some(registry(1)))
    }

    #[test]
    fn test_policy_validation_cases() {
        let cases: Vec<(Policy, bool)> = vec![
            // empty name
            (Policy::new(""), false),
            // no registries at all
            (Policy::new("policy01"), false),
            // both registries remote
            (
                Policy::new("policy01").with_registries(Some(registry(1)), Some(registry(2))),
                false,
            ),
            // bad resource filter value
            (
                base_policy()
                    .with_filters(vec![Filter::new(FilterType::Resource, "invalid_resource_type")])
                    .with_trigger(Trigger::manual()),
                false,
            ),
            // empty tag pattern
            (
                base_policy()
                    .with_filters(vec![Filter::resource(ResourceType::Image), Filter::tag("")])
                    .with_trigger(Trigger::manual()),
                false,
            ),
            // scheduled without settings
            (
                base_policy().with_filters(vec![Filter::name("library")]).with_trigger(Trigger {
                    trigger_type: TriggerType::Scheduled,
                    settings: None,
                }),
                false,
            ),
            // invalid cron
            (
                base_policy()
                    .with_filters(vec![Filter::resource(ResourceType::Image), Filter::name("library/**")])
                    .with_trigger(Trigger::scheduled("* * *")),
                false,
            ),
            // resource filter without a trigger
            (
                base_policy().with_filters(vec![Filter::resource(ResourceType::Image)]),
                false,
            ),
            // pass with seconds field
            (
                base_policy()
                    .with_filters(vec![Filter::resource(ResourceType::Image), Filter::name("library/**")])
                    .with_trigger(Trigger::scheduled("* * * * * *")),
                true,
            ),
            // pass with classic five fields
            (
                base_policy().with_trigger(Trigger::scheduled("0 2 * * *")),
                true,
            ),
            // pass without filters or trigger
            (base_policy(), true),
            // remote source only, local side filled in by the host
            (Policy::new("policy01").with_registries(Some(registry(4)), None), true),
        ];

        for (i, (policy, pass)) in cases.into_iter().enumerate() {
            assert_eq!(policy.validate().is_ok(), pass, "case {} failed: {:?}", i, policy.validate());
        }
    }

    #[test]
    fn test_unknown_filter_and_trigger_types_are_rejected() {
        let json = r#"{"name": "p", "filters": [{"type": "invalid_type", "value": "x"}]}"#;
        assert!(serde_json::from_str::<Policy>(json).is_err());

        let json = r#"{"name": "p", "trigger": {"type": "invalid_type"}}"#;
        assert!(serde_json::from_str::<Policy>(json).is_err());
    }

    #[test]
    fn test_policy_json_shape() {
        let json = r#"{
            "name": "sync-library",
            "src_registry": {"id": 0, "name": "Local", "type": "harbor", "url": "https://core.local"},
            "dest_registry": {"id": 2, "name": "hub", "type": "docker-registry", "url": "https://registry.example.com"},
            "dest_namespace": "mirror",
            "override": true,
            "filters": [
                {"type": "resource", "value": "image"},
                {"type": "name", "value": "library/**"},
                {"type": "label", "value": ["prod", "signed"]}
            ],
            "trigger": {"type": "scheduled", "settings": {"cron": "0 0 * * * *"}}
        }"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert!(policy.enabled);
        assert!(policy.override_existing);
        assert_eq!(policy.dest_namespace(), Some("mirror"));
        assert_eq!(policy.filters[2].value.as_list(), vec!["prod", "signed"]);
        assert_eq!(policy.trigger_type(), TriggerType::Scheduled);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_cron() {
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("0 30 2 * * 1").is_ok());
        assert!(validate_cron("* * *").is_err());
        assert!(validate_cron("61 * * * *").is_err());
    }
}
