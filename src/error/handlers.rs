//! Standardized error handling patterns shared by the adapters and job client

use crate::error::{ReplicationError, Result};
use reqwest::StatusCode;

const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Turns non-success HTTP responses into replication errors
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle registry-related HTTP errors, keeping the status code for callers
    /// that tolerate specific statuses (409 on create, 404 on lookups)
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> ReplicationError {
        let message = match status.as_u16() {
            401 => format!("{} rejected the registry credential: {}", operation, error_text),
            403 => format!("{} is not permitted for the registry account: {}", operation, error_text),
            404 => format!("{} found nothing: {}", operation, error_text),
            409 => format!("{} conflicts with existing state: {}", operation, error_text),
            429 => format!("{} was throttled by the registry: {}", operation, error_text),
            500 => format!("{} hit a registry internal error: {}", operation, error_text),
            502 | 503 => format!("registry unreachable during {}: {}", operation, error_text),
            _ => format!("{} returned {}: {}", operation, status, error_text),
        };

        ReplicationError::Http {
            status: status.as_u16(),
            message,
        }
    }

    /// Token endpoint failures while answering a bearer challenge
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> ReplicationError {
        let message = match status.as_u16() {
            400 => format!("token service rejected the scope: {}", error_text),
            401 => "token service rejected the registry credential".to_string(),
            403 => "token service denied the requested scope".to_string(),
            404 => "token realm does not exist".to_string(),
            _ => format!("token request returned {}: {}", status, error_text),
        };

        ReplicationError::Auth(message)
    }

    /// Handle job service HTTP errors
    pub fn handle_job_error(status: StatusCode, error_text: &str, operation: &str) -> ReplicationError {
        let message = match status.as_u16() {
            400 => format!("Job service rejected {}: {}", operation, error_text),
            401 | 403 => format!("Job service refused credentials for {}: {}", operation, error_text),
            404 => format!("Job not found during {}: {}", operation, error_text),
            409 => format!("Job state conflict during {}: {}", operation, error_text),
            _ => format!("{} returned {}: {}", operation, status, error_text),
        };

        ReplicationError::Submission(message)
    }
}

/// Transport failures, before any HTTP status exists
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> ReplicationError {
        let kind = if error.is_timeout() {
            "timed out"
        } else if error.is_connect() {
            "could not connect"
        } else if error.to_string().contains("certificate") {
            "failed TLS verification (set insecure to skip it)"
        } else {
            "failed in transit"
        };
        ReplicationError::Network(format!("{} {}: {}", context, kind, error))
    }
}

/// Checks applied to configuration values
pub struct ValidationErrorHandler;

impl ValidationErrorHandler {
    /// Endpoint URLs must be absolute http(s) URLs
    pub fn validate_registry_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ReplicationError::Validation("endpoint URL is empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ReplicationError::Validation(format!(
                "endpoint {} needs an http:// or https:// scheme",
                url
            )));
        }
        url::Url::parse(url)?;
        Ok(())
    }

    /// Request timeout in seconds, at most one day
    pub fn validate_timeout(timeout: u64) -> Result<()> {
        match timeout {
            0 => Err(ReplicationError::Validation("request timeout must be positive".to_string())),
            t if t > MAX_TIMEOUT_SECS => Err(ReplicationError::Validation(format!(
                "request timeout {}s exceeds {}s",
                t, MAX_TIMEOUT_SECS
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_keeps_status() {
        let err = HttpErrorHandler::handle_registry_error(StatusCode::CONFLICT, "exists", "project creation");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("project creation"));

        let err = HttpErrorHandler::handle_registry_error(StatusCode::NOT_FOUND, "", "label listing");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validate_registry_url() {
        assert!(ValidationErrorHandler::validate_registry_url("https://harbor.example.com").is_ok());
        assert!(ValidationErrorHandler::validate_registry_url("").is_err());
        assert!(ValidationErrorHandler::validate_registry_url("harbor.example.com").is_err());
    }

    #[test]
    fn test_validate_timeout() {
        assert!(ValidationErrorHandler::validate_timeout(30).is_ok());
        assert!(ValidationErrorHandler::validate_timeout(0).is_err());
        assert!(ValidationErrorHandler::validate_timeout(90000).is_err());
    }
}
