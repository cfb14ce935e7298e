//! Authorization for registry requests
//!
//! Requests go out with the registry's static credential (basic or shared
//! secret). When the registry answers 401 with a Bearer challenge, a token is
//! requested from the advertised realm and the request is replayed once.

use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{ReplicationError, Result};
use crate::model::{CredentialType, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorizer {
    Anonymous,
    Basic { username: String, password: String },
    /// Shared secret understood by peers of the same platform
    Secret(String),
}

impl Authorizer {
    pub fn for_registry(registry: &Registry) -> Self {
        match &registry.credential {
            None => Authorizer::Anonymous,
            Some(credential) => match credential.credential_type {
                CredentialType::Secret => Authorizer::Secret(credential.access_secret.clone()),
                CredentialType::Basic => Authorizer::Basic {
                    username: credential.access_key.clone(),
                    password: credential.access_secret.clone(),
                },
            },
        }
    }

    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorizer::Anonymous => request,
            Authorizer::Basic { username, password } => request.basic_auth(username, Some(password)),
            Authorizer::Secret(secret) => match HeaderValue::from_str(&format!("Harbor-Secret {}", secret)) {
                Ok(value) => request.header(AUTHORIZATION, value),
                Err(_) => request,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."`
    pub fn parse(header: &str) -> Option<Self> {
        let params_str = header.strip_prefix("Bearer ")?;
        let mut params = HashMap::new();

        for param in split_params(params_str) {
            if let Some((key, value)) = param.split_once('=') {
                params.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
            }
        }

        let realm = params.remove("realm")?;
        Some(Self {
            realm,
            service: params.remove("service").unwrap_or_default(),
            scope: params.remove("scope"),
        })
    }

    fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.realm, self.service, self.scope.as_deref().unwrap_or(""))
    }
}

// Scopes contain commas (`repository:a:pull,push`), so only split outside quotes
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Per-client bearer token cache keyed by challenge
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    tokens: Arc<Mutex<HashMap<String, String>>>,
}

impl TokenCache {
    pub async fn token_for(
        &self,
        client: &Client,
        challenge: &AuthChallenge,
        authorizer: &Authorizer,
    ) -> Result<String> {
        let key = challenge.cache_key();
        if let Some(token) = self.tokens.lock().get(&key) {
            return Ok(token.clone());
        }

        let mut params = vec![("service", challenge.service.as_str())];
        if let Some(scope) = &challenge.scope {
            params.push(("scope", scope.as_str()));
        }
        let url = url::Url::parse_with_params(&challenge.realm, &params)?;
        debug!("requesting token from {}", url);

        let mut request = client.get(url);
        if let Authorizer::Basic { username, password } = authorizer {
            request = request.basic_auth(username, Some(password));
        }
        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &error_text));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ReplicationError::Parse(format!("Failed to parse token response: {}", e)))?;
        let token = token_response
            .token
            .or(token_response.access_token)
            .ok_or_else(|| ReplicationError::Auth("token response carries no token".to_string()))?;

        self.tokens.lock().insert(key, token.clone());
        Ok(token)
    }

    pub fn invalidate(&self, challenge: &AuthChallenge) {
        self.tokens.lock().remove(&challenge.cache_key());
    }
}

/// Bearer challenge carried by a 401 response, if any
pub fn challenge_of(response: &Response) -> Option<AuthChallenge> {
    if response.status() != StatusCode::UNAUTHORIZED {
        return None;
    }
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .and_then(AuthChallenge::parse)
}
