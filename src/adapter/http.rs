//! HTTP client shared by the registry adapters

use reqwest::header::LINK;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

use super::auth::{Authorizer, TokenCache, challenge_of};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{ReplicationError, Result};
use crate::model::Registry;

pub const USER_AGENT_REPLICATION: &str = "registry-replicator";

pub struct HttpClientBuilder {
    authorizer: Authorizer,
    insecure: bool,
    timeout: Option<Duration>,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self {
            authorizer: Authorizer::Anonymous,
            insecure: false,
            timeout: None,
        }
    }

    pub fn with_authorizer(mut self, authorizer: Authorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut builder = Client::builder().user_agent(USER_AGENT_REPLICATION);
        if self.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ReplicationError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpClient {
            client,
            authorizer: self.authorizer,
            tokens: TokenCache::default(),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    authorizer: Authorizer,
    tokens: TokenCache,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Client carrying the registry's credential and TLS setting
    pub fn for_registry(registry: &Registry, timeout: Duration) -> Result<Self> {
        Self::builder()
            .with_authorizer(Authorizer::for_registry(registry))
            .with_insecure(registry.insecure)
            .with_timeout(timeout)
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send a request, answering one Bearer challenge if the registry asks.
    /// Any status is returned to the caller.
    pub async fn send<F>(&self, build: F, operation: &str) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let request = self.decorate(build(&self.client));
        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;

        let Some(challenge) = challenge_of(&response) else {
            return Ok(response);
        };

        debug!("{} challenged by {}, requesting bearer token", operation, challenge.realm);
        let token = self
            .tokens
            .token_for(&self.client, &challenge, &self.authorizer)
            .await?;
        let retried = self
            .stamp(build(&self.client))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;
        if retried.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&challenge);
        }
        Ok(retried)
    }

    /// Like [`send`](Self::send) but turns non-success statuses into errors
    pub async fn execute<F>(&self, build: F, operation: &str) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send(build, operation).await?;
        ensure_success(response, operation).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        trace!("GET {}", url);
        let response = self.execute(|c| c.get(url), url).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ReplicationError::Registry(format!("Failed to parse response from {}: {}", url, e)))
    }

    /// Follow `Link: <...>; rel="next"` headers and concatenate every page
    pub async fn get_and_iterate_pagination<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(Url::parse(url)?);

        while let Some(current) = next.take() {
            trace!("GET {} (paginated)", current);
            let response = self.execute(|c| c.get(current.clone()), current.as_str()).await?;
            let link = response.headers().get(LINK).cloned();
            let body = response.text().await?;
            let page: Vec<T> = serde_json::from_str(&body).map_err(|e| {
                ReplicationError::Registry(format!("Failed to parse page from {}: {}", current, e))
            })?;
            items.extend(page);

            let link = link.as_ref().and_then(|v| v.to_str().ok());
            next = next_page(&current, link, &mut visited)?;
        }

        Ok(items)
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<()> {
        trace!("POST {}", url);
        self.execute(|c| c.post(url).json(body), url).await?;
        Ok(())
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        trace!("DELETE {}", url);
        self.execute(|c| c.delete(url), url).await?;
        Ok(())
    }

    fn stamp(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Request-Id", uuid::Uuid::new_v4().to_string())
    }

    fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        self.authorizer.apply(self.stamp(request))
    }
}

/// Map a non-success response to an error carrying its status
pub async fn ensure_success(response: Response, operation: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(HttpErrorHandler::handle_registry_error(status, &error_text, operation))
}

/// Extract the `rel="next"` target from a Link header
/// Resolve the next page of a paginated listing against the current one.
/// A link back to a page already read ends the walk.
pub fn next_page(current: &Url, link: Option<&str>, visited: &mut HashSet<Url>) -> Result<Option<Url>> {
    visited.insert(current.clone());
    let Some(href) = link.and_then(next_link) else {
        return Ok(None);
    };
    let next = current.join(&href)?;
    if visited.contains(&next) {
        warn!("pagination of {} links back to {}, stopping", current, next);
        return Ok(None);
    }
    Ok(Some(next))
}

pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim().replace(' ', "");
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        Some(target.trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_link() {
        let header = r#"</v2/_catalog?last=library%2Fnginx&n=100>; rel="next""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("/v2/_catalog?last=library%2Fnginx&n=100")
        );

        let header = r#"</api/projects?page=1>; rel="prev" , </api/projects?page=3>; rel="next""#;
        assert_eq!(next_link(header).as_deref(), Some("/api/projects?page=3"));

        assert!(next_link(r#"</api/projects?page=1>; rel="prev""#).is_none());
    }

    #[test]
    fn test_next_page_stops_on_revisited_link() {
        let mut visited = HashSet::new();
        let first = Url::parse("https://hub.example.com/v2/_catalog?n=2").unwrap();
        let second = next_page(&first, Some(r#"</v2/_catalog?last=b&n=2>; rel="next""#), &mut visited)
            .unwrap()
            .unwrap();
        assert_eq!(second.as_str(), "https://hub.example.com/v2/_catalog?last=b&n=2");

        // a page linking to itself
        assert!(next_page(&second, Some(r#"</v2/_catalog?last=b&n=2>; rel="next""#), &mut visited).unwrap().is_none());
        // a page linking back to an earlier one
        assert!(next_page(&second, Some(r#"</v2/_catalog?n=2>; rel="next""#), &mut visited).unwrap().is_none());
        assert!(next_page(&second, None, &mut visited).unwrap().is_none());
    }

    #[test]
    fn test_builder_creates_client() {
        let client = HttpClient::builder()
            .with_insecure(true)
            .with_timeout(Duration::from_secs(5))
            .build();
        assert!(client.is_ok());
    }
}
