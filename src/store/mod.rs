//! Store REST client.
//!
//! Everything the sync engine needs from the Store goes through the
//! [`StoreService`] trait, a single `send` taking a method, a path relative to
//! the REST root (`/V1/...`, `/all/V1/...`, `/<storeview>/V1/...`), query
//! pairs and an optional JSON body. [`RestStoreClient`] is the `reqwest`
//! implementation; tests substitute a recording fake.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config;

pub mod api;
pub mod criteria;
pub mod model;

pub use criteria::{Condition, SearchCriteria};

const REST_PREFIX: &str = "rest/";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to reach the store: {0}")]
    Transport(String),
    #[error("store rejected the access token: {0}")]
    Unauthorized(String),
    #[error("rate limited by the store: {0}")]
    RateLimited(String),
    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// True when retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::RateLimited(_) => true,
            StoreError::Status { status, .. } => *status >= 500,
            StoreError::Unauthorized(_) | StoreError::Decode(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Status { status: 404, .. })
    }
}

/// One REST call against the Store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl StoreRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_criteria(mut self, criteria: &SearchCriteria) -> Self {
        self.query.extend(criteria.to_query());
        self
    }

    /// Whether the call changes Store state.
    pub fn is_mutation(&self) -> bool {
        self.method != Method::GET
    }
}

#[async_trait]
pub trait StoreService: Send + Sync {
    async fn send(&self, request: StoreRequest) -> Result<Value, StoreError>;
}

#[derive(Clone)]
pub struct RestStoreClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for RestStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestStoreClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestStoreClient {
    pub fn new(
        base_url: &str,
        token: String,
        timeout: Duration,
        verify_ssl: bool,
    ) -> Result<Self, StoreError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| StoreError::Transport(format!("invalid base url {base_url}: {e}")))?;
        let http = Client::builder()
            .user_agent("store-sync/0.1")
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &config::Store) -> Result<Self, StoreError> {
        Self::new(
            &cfg.base_url,
            cfg.access_token.clone(),
            Duration::from_secs(cfg.timeout_seconds),
            cfg.verify_ssl,
        )
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        let relative = format!("{}{}", REST_PREFIX, path.trim_start_matches('/'));
        self.base_url
            .join(&relative)
            .map_err(|e| StoreError::Transport(format!("invalid store path {path}: {e}")))
    }

    pub fn build_request(&self, request: &StoreRequest) -> Result<reqwest::Request, StoreError> {
        let endpoint = self.endpoint(&request.path)?;
        let mut builder = self
            .http
            .request(request.method.clone(), endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build store request: {e}")))
    }

    async fn execute(&self, request: StoreRequest) -> Result<Value, StoreError> {
        let built = self.build_request(&request)?;
        info!(method = %built.method(), url = %built.url(), "store request");
        if let Some(body) = &request.body {
            debug!(
                "store payload: {}",
                serde_json::to_string(body).unwrap_or_else(|_| format!("{:?}", body))
            );
        }

        let res = self
            .http
            .execute(built)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        info!(status = status.as_u16(), "store response");

        if status == StatusCode::UNAUTHORIZED {
            warn!("store rejected credentials: {}", text);
            return Err(StoreError::Unauthorized(error_message(&text)));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("rate limited by store: {}", text);
            return Err(StoreError::RateLimited(error_message(&text)));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), body = %text, "store error");
            return Err(StoreError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StoreService for RestStoreClient {
    async fn send(&self, request: StoreRequest) -> Result<Value, StoreError> {
        self.execute(request).await
    }
}

/// Render a Store error body (`{"message": "..%1..", "parameters": [..]}`)
/// into a readable sentence. Falls back to the raw body.
pub fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let Some(template) = value.get("message").and_then(Value::as_str) else {
        return body.trim().to_string();
    };
    let mut message = template.to_string();
    match value.get("parameters") {
        Some(Value::Array(params)) => {
            // Highest index first so %1 doesn't clobber %10.
            for (idx, param) in params.iter().enumerate().rev() {
                message = message.replace(&format!("%{}", idx + 1), &display_value(param));
            }
        }
        Some(Value::Object(params)) => {
            for (name, param) in params {
                message = message.replace(&format!("%{}", name), &display_value(param));
            }
        }
        _ => {}
    }
    message
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> RestStoreClient {
        RestStoreClient::new(
            "https://shop.example.com",
            "token".into(),
            Duration::from_secs(5),
            true,
        )
        .unwrap()
    }

    #[test]
    fn build_request_sets_headers_and_rest_prefix() {
        let request = StoreRequest::put("/all/V1/products/CHAIR", json!({ "product": {} }));
        let built = client().build_request(&request).unwrap();
        assert_eq!(built.method(), Method::PUT);
        assert_eq!(built.url().path(), "/rest/all/V1/products/CHAIR");
        assert_eq!(
            built
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            built
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn build_request_encodes_search_criteria() {
        let criteria = SearchCriteria::new()
            .filter("type_id", "configurable", Condition::Eq)
            .page(50, 2);
        let request = StoreRequest::get("/V1/products").with_criteria(&criteria);
        let built = client().build_request(&request).unwrap();
        let pairs: Vec<(String, String)> = built
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&(
            "searchCriteria[filterGroups][0][filters][0][field]".into(),
            "type_id".into()
        )));
        assert!(pairs.contains(&("searchCriteria[currentPage]".into(), "2".into())));
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", client());
        assert!(!rendered.contains("token\""));
        assert!(rendered.contains("shop.example.com"));
    }

    #[test]
    fn error_message_substitutes_parameters() {
        let body = r#"{"message":"The product with the SKU \"%1\" doesn't exist.","parameters":["CHAIR"]}"#;
        assert_eq!(error_message(body), "The product with the SKU \"CHAIR\" doesn't exist.");
        let body = r#"{"message":"Invalid %fieldName","parameters":{"fieldName":"price"}}"#;
        assert_eq!(error_message(body), "Invalid price");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Transport("x".into()).is_transient());
        assert!(StoreError::Status { status: 503, message: String::new() }.is_transient());
        assert!(!StoreError::Status { status: 400, message: String::new() }.is_transient());
        assert!(!StoreError::Unauthorized(String::new()).is_transient());
    }
}
