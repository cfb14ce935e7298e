//! HTTP client for the job service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::{JobDescriptor, TaskRunner};
use crate::adapter::auth::Authorizer;
use crate::adapter::http::HttpClient;
use crate::config::ReplicationConfig;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{ReplicationError, Result};

#[derive(Debug, Serialize)]
struct JobRequest<'a> {
    job: &'a JobDescriptor,
}

#[derive(Debug, Deserialize)]
struct JobStats {
    job: JobStatsInfo,
}

#[derive(Debug, Deserialize)]
struct JobStatsInfo {
    id: String,
}

pub struct JobServiceClient {
    url: String,
    client: HttpClient,
}

impl JobServiceClient {
    pub fn new(url: &str, secret: &str, timeout: Duration) -> Result<Self> {
        let authorizer = if secret.is_empty() {
            Authorizer::Anonymous
        } else {
            Authorizer::Secret(secret.to_string())
        };
        let client = HttpClient::builder()
            .with_authorizer(authorizer)
            .with_timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        Self::new(
            &config.jobservice_url,
            &config.core_secret,
            Duration::from_secs(config.timeout),
        )
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B, operation: &str) -> Result<String> {
        let response = self.client.send(|c| c.post(url).json(body), operation).await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HttpErrorHandler::handle_job_error(status, &text, operation));
        }
        Ok(text)
    }
}

#[async_trait]
impl TaskRunner for JobServiceClient {
    async fn submit(&self, job: &JobDescriptor) -> Result<String> {
        let url = format!("{}/api/v1/jobs", self.url);
        let body = self
            .post(&url, &JobRequest { job }, "job submission")
            .await
            .map_err(|e| match e {
                ReplicationError::Network(message) => ReplicationError::Submission(message),
                other => other,
            })?;
        let stats: JobStats = serde_json::from_str(&body)
            .map_err(|e| ReplicationError::Submission(format!("unexpected job service response: {}", e)))?;
        info!("submitted {} job {}", job.name, stats.job.id);
        Ok(stats.job.id)
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/api/v1/jobs/{}", self.url, job_id);
        self.post(&url, &json!({"action": "stop"}), "job stop").await?;
        debug!("stop requested for job {}", job_id);
        Ok(())
    }
}
