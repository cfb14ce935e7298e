//! Configuration management for the replication engine

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::handlers::ValidationErrorHandler;
use crate::error::{ReplicationError, Result};
use crate::model::{Credential, CredentialType, LOCAL_REGISTRY_NAME, Registry, RegistryType};

pub const DEFAULT_LOOPBACK_CORE_URL: &str = "http://127.0.0.1:8080";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// External URL of the instance the engine runs in
    pub core_url: String,
    /// Address used instead of `core_url` when talking to the local instance
    pub loopback_core_url: String,
    /// Shared secret presented to the local instance and the job service
    pub core_secret: String,
    /// Base URL of the job service receiving transfer jobs
    pub jobservice_url: String,
    /// Request timeout for registry and job service calls, in seconds
    pub timeout: u64,
    /// Accept invalid certificates from the local instance
    pub insecure: bool,
    /// Probe the destination registry before pushing anything
    pub health_check_before_push: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            core_url: "http://core:8080".to_string(),
            loopback_core_url: DEFAULT_LOOPBACK_CORE_URL.to_string(),
            core_secret: String::new(),
            jobservice_url: "http://jobservice:8080".to_string(),
            timeout: 300,
            insecure: false,
            health_check_before_push: false,
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<()> {
        ValidationErrorHandler::validate_registry_url(&self.core_url)
            .map_err(|e| ReplicationError::Configuration(format!("core_url: {}", e)))?;
        ValidationErrorHandler::validate_registry_url(&self.loopback_core_url)
            .map_err(|e| ReplicationError::Configuration(format!("loopback_core_url: {}", e)))?;
        ValidationErrorHandler::validate_registry_url(&self.jobservice_url)
            .map_err(|e| ReplicationError::Configuration(format!("jobservice_url: {}", e)))?;
        ValidationErrorHandler::validate_timeout(self.timeout)
            .map_err(|e| ReplicationError::Configuration(e.to_string()))?;
        Ok(())
    }

    /// Create config from environment variables and defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("REPLICATOR_CORE_URL") {
            config.core_url = val;
        }
        if let Some(val) = lookup("REPLICATOR_LOOPBACK_CORE_URL") {
            config.loopback_core_url = val;
        }
        if let Some(val) = lookup("REPLICATOR_CORE_SECRET") {
            config.core_secret = val;
        }
        if let Some(val) = lookup("REPLICATOR_JOBSERVICE_URL") {
            config.jobservice_url = val;
        }
        if let Some(val) = lookup("REPLICATOR_TIMEOUT") {
            if let Ok(timeout) = val.parse() {
                config.timeout = timeout;
            }
        }
        if let Some(val) = lookup("REPLICATOR_INSECURE") {
            config.insecure = val.to_lowercase() == "true" || val == "1";
        }
        if let Some(val) = lookup("REPLICATOR_HEALTH_CHECK") {
            config.health_check_before_push = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Load a JSON configuration file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            ReplicationError::Configuration(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Merge with another config, preferring non-default values
    pub fn merge(mut self, other: &ReplicationConfig) -> Self {
        let default = ReplicationConfig::default();

        if other.core_url != default.core_url {
            self.core_url = other.core_url.clone();
        }
        if other.loopback_core_url != default.loopback_core_url {
            self.loopback_core_url = other.loopback_core_url.clone();
        }
        if other.core_secret != default.core_secret {
            self.core_secret = other.core_secret.clone();
        }
        if other.jobservice_url != default.jobservice_url {
            self.jobservice_url = other.jobservice_url.clone();
        }
        if other.timeout != default.timeout {
            self.timeout = other.timeout;
        }
        if other.insecure != default.insecure {
            self.insecure = other.insecure;
        }
        if other.health_check_before_push != default.health_check_before_push {
            self.health_check_before_push = other.health_check_before_push;
        }

        self
    }

    /// Coordinates of the instance the engine runs in, authenticated with the
    /// shared secret
    pub fn local_registry(&self) -> Registry {
        let mut registry = Registry::new(0, LOCAL_REGISTRY_NAME, RegistryType::Harbor, &self.core_url)
            .with_insecure(self.insecure);
        if !self.core_secret.is_empty() {
            registry = registry.with_credential(Credential {
                credential_type: CredentialType::Secret,
                access_key: String::new(),
                access_secret: self.core_secret.clone(),
            });
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        assert!(ReplicationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("REPLICATOR_CORE_URL", "https://harbor.example.com"),
            ("REPLICATOR_TIMEOUT", "60"),
            ("REPLICATOR_INSECURE", "1"),
            ("REPLICATOR_HEALTH_CHECK", "nope"),
        ]);
        let config = ReplicationConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.core_url, "https://harbor.example.com");
        assert_eq!(config.timeout, 60);
        assert!(config.insecure);
        assert!(!config.health_check_before_push);
        assert_eq!(config.loopback_core_url, DEFAULT_LOOPBACK_CORE_URL);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ReplicationConfig {
            jobservice_url: "jobservice:8080".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReplicationConfig {
            timeout: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_prefers_non_defaults() {
        let base = ReplicationConfig {
            core_secret: "s3cret".to_string(),
            ..Default::default()
        };
        let overrides = ReplicationConfig {
            timeout: 30,
            ..Default::default()
        };
        let merged = base.merge(&overrides);
        assert_eq!(merged.timeout, 30);
        assert_eq!(merged.core_secret, "s3cret");
    }

    #[test]
    fn test_local_registry_uses_secret() {
        let config = ReplicationConfig {
            core_secret: "s3cret".to_string(),
            ..Default::default()
        };
        let local = config.local_registry();
        assert!(local.is_local());
        assert_eq!(local.name, LOCAL_REGISTRY_NAME);
        assert_eq!(local.credential.unwrap().credential_type, CredentialType::Secret);
    }
}
