//! Fetch capability used by the resource loader, plus the allowlisted
//! `fetch()` exposed to micro-app scripts.
//!
//! Security model for script-side fetch:
//! - Only URLs matching allowed origins can be fetched
//! - Redirects only followed if they stay within the same origin
//!
//! The loader itself is not restricted: the host chose the app URL, and
//! every resource the document references is fetched as plain text.

use anyhow::anyhow;
use async_trait::async_trait;
use deno_core::{op2, OpState};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// Why a fetch did not produce text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {status}")]
    Status { status: u16 },
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("no resource registered for '{0}'")]
    NotFound(String),
    #[error("blocked: {0}")]
    Blocked(String),
}

/// Text fetch primitive consumed by the loader.
///
/// The loader runs on a single-threaded `LocalSet`, so implementations do
/// not need to be `Send`.
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP GET fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Option<Duration>,
}

impl HttpFetcher {
    pub fn new(timeout_ms: Option<u64>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .build()
            .map_err(|e| FetchError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout: timeout_ms.map(Duration::from_millis),
        })
    }
}

#[async_trait(?Send)]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                });
            }

            response
                .text()
                .await
                .map_err(|e| FetchError::Network(format!("failed to read body: {}", e)))
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| FetchError::Timeout(limit.as_millis() as u64))?,
            None => request.await,
        }
    }
}

/// In-memory fetcher serving registered documents and assets.
///
/// Used for offline fixtures and tests. Every requested URL is logged,
/// including misses.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: RefCell<HashMap<String, String>>,
    requests: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<String>) {
        self.resources.borrow_mut().insert(url.into(), body.into());
    }

    pub fn with(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(url, body);
        self
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Fetcher for MemoryFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        self.resources
            .borrow()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

// ============================================================================
// Script-side fetch
// ============================================================================

/// Origins micro-app scripts may reach through `fetch()`.
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    /// Allowed origins (e.g., "https://api.example.com")
    /// An origin is scheme + host + port
    pub allowed_origins: Vec<String>,
}

impl FetchConfig {
    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        self.allowed_origins.iter().any(|allowed| origin == *allowed)
    }
}

/// Request info passed from JS
#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Response info returned to JS
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub url: String,
    pub body: String,
}

#[op2(async)]
#[serde]
pub async fn op_fetch(
    state: Rc<RefCell<OpState>>,
    #[serde] request: FetchRequest,
) -> Result<FetchResponse, deno_core::error::AnyError> {
    let config = {
        let state_ref = state.borrow();
        state_ref.borrow::<FetchConfig>().clone()
    };

    script_fetch(request, config).await
}

fn parse_method(method: Option<&str>) -> Result<Method, anyhow::Error> {
    match method.unwrap_or("GET").to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "PATCH" => Ok(Method::PATCH),
        "HEAD" => Ok(Method::HEAD),
        other => Err(anyhow!("Unsupported HTTP method: {}", other)),
    }
}

async fn script_fetch(
    request: FetchRequest,
    config: FetchConfig,
) -> Result<FetchResponse, deno_core::error::AnyError> {
    let url = Url::parse(&request.url)
        .map_err(|e| anyhow!("Invalid URL '{}': {}", request.url, e))?;

    if !config.is_origin_allowed(&url) {
        tracing::warn!(url = %url, "script fetch blocked by origin allowlist");
        return Err(anyhow!(
            "Fetch blocked: origin '{}' is not in the allowlist",
            url.origin().ascii_serialization()
        ));
    }

    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

    let method = parse_method(request.method.as_deref())?;
    let mut builder = client.request(method, url.clone());
    if let Some(ref headers) = request.headers {
        for (key, value) in headers {
            builder = builder.header(key, value);
        }
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| anyhow!("Fetch failed: {}", e))?;
    let status = response.status();
    let final_url = response.url().clone();

    if status.is_redirection() {
        if let Some(location) = response.headers().get("location") {
            let location = location
                .to_str()
                .map_err(|_| anyhow!("Invalid redirect location"))?;
            let target = final_url
                .join(location)
                .map_err(|e| anyhow!("Invalid redirect URL: {}", e))?;

            if target.origin() != url.origin() {
                return Err(anyhow!(
                    "Fetch blocked: redirect to different origin '{}'",
                    target.origin().ascii_serialization()
                ));
            }

            let follow = FetchRequest {
                url: target.to_string(),
                method: Some("GET".to_string()),
                headers: request.headers.clone(),
                body: None,
            };
            return Box::pin(script_fetch(follow, config)).await;
        }
    }

    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

    Ok(FetchResponse {
        ok: status.is_success(),
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
        url: final_url.to_string(),
        body,
    })
}
