//! Error types and handlers for replication operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Clone, Error)]
pub enum ReplicationError {
    /// Invalid policy, missing adapter factory, bad configuration value
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Network related errors (connection refused, timeouts, TLS)
    #[error("Network error: {0}")]
    Network(String),
    /// Non-success HTTP status returned by a remote endpoint
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    /// Registry protocol errors (unexpected payloads, missing headers)
    #[error("Registry error: {0}")]
    Registry(String),
    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),
    /// A source resource has no destination counterpart
    #[error("Pairing error: {0}")]
    Pairing(String),
    /// Job submission to the task-execution service failed
    #[error("Submission error: {0}")]
    Submission(String),
    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    /// Persistent store errors
    #[error("Storage error: {0}")]
    Storage(String),
    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),
    /// File IO errors
    #[error("IO error: {0}")]
    Io(String),
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ReplicationError {
    /// HTTP status code carried by the error, if it came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ReplicationError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicationError::NotFound(_)) || self.status_code() == Some(404)
    }

    /// Transport failures are fatal to a whole execution
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ReplicationError::Network(_) | ReplicationError::Http { .. } | ReplicationError::Auth(_)
        )
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        ReplicationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ReplicationError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ReplicationError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => ReplicationError::Network(err.to_string()),
        }
    }
}

impl From<url::ParseError> for ReplicationError {
    fn from(err: url::ParseError) -> Self {
        ReplicationError::Validation(err.to_string())
    }
}

impl From<regex::Error> for ReplicationError {
    fn from(err: regex::Error) -> Self {
        ReplicationError::Configuration(format!("invalid pattern: {}", err))
    }
}
