//! HTTP transport implementation.
//!
//! This module provides the JSON-over-HTTP transport for the sync engine.
//! The actual HTTP client is abstracted via a trait so the transport can run
//! over reqwest in the app and over an in-process server in tests.

use crate::device::DeviceId;
use crate::error::{EngineResult, SyncError};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use carelog_sync_protocol::{SyncPayload, SyncResult, Timestamp};
use chrono::SecondsFormat;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the per-installation device ID.
pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

/// HTTP method used by the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL including query string.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Returns the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations report "no response received" as [`SyncError::Network`]
/// or [`SyncError::Timeout`]; any received response, whatever its status,
/// is returned as `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse>;
}

/// Supplies the bearer token for outgoing requests.
///
/// Owned by the auth/session layer; the transport asks for a token on every
/// request so refreshed tokens are picked up without rebuilding it.
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, if the user is signed in.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed bearer token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// HTTP-based sync transport.
///
/// Uses JSON request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://api.example.com").
    base_url: String,
    /// Device ID sent with every request.
    device_id: DeviceId,
    /// HTTP client implementation.
    client: C,
    /// Bearer token source.
    tokens: Option<Arc<dyn TokenProvider>>,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, device_id: DeviceId, client: C) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            device_id,
            client,
            tokens: None,
            last_error: RwLock::new(None),
        }
    }

    /// Sets the bearer token source.
    pub fn with_token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            (DEVICE_ID_HEADER.to_string(), self.device_id.to_string()),
        ];
        if let Some(token) = self.tokens.as_ref().and_then(|t| t.bearer_token()) {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    async fn execute(&self, request: HttpRequest) -> EngineResult<Vec<u8>> {
        let result = match self.client.send(request).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => Err(SyncError::http(
                response.status,
                String::from_utf8_lossy(&response.body).into_owned(),
            )),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }
}

#[async_trait]
impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn push(&self, payload: &SyncPayload) -> EngineResult<SyncResult> {
        let mut headers = self.headers();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: format!("{}/sync/push", self.base_url),
            headers,
            body: Some(payload.encode()?),
        };

        let body = self.execute(request).await?;
        Ok(SyncResult::decode(&body)?)
    }

    async fn pull(&self, since: Option<Timestamp>) -> EngineResult<SyncPayload> {
        let url = match since {
            Some(since) => format!(
                "{}/sync/pull?since={}",
                self.base_url,
                since.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            None => format!("{}/sync/pull", self.base_url),
        };

        let request = HttpRequest {
            method: HttpMethod::Get,
            url,
            headers: self.headers(),
            body: None,
        };

        let body = self.execute(request).await?;
        Ok(SyncPayload::decode(&body)?)
    }
}

/// [`HttpClient`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::network(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::network(e.to_string())
    }
}
