//! HTTP transport with connection-retry semantics
//!
//! Connection failures are retried after sleeping the call's retry interval.
//! Any HTTP status, including 4xx/5xx, is handed back to the caller untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::error::ApiError;

/// Header carrying the worker's API key on every request
pub const AUTH_HEADER: &str = "api_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// A fully assembled request, relative to the judge API base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// How long to wait between attempts when the coordinator cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    freq_secs: u64,
}

impl RetryPolicy {
    /// Single attempt; used on shutdown paths
    pub const NEVER: RetryPolicy = RetryPolicy { freq_secs: 0 };

    pub fn every(freq_secs: u64) -> Self {
        Self { freq_secs }
    }

    /// Delay before the next attempt, or `None` when retrying is disabled
    pub fn delay(&self) -> Option<Duration> {
        (self.freq_secs > 0).then(|| Duration::from_secs(self.freq_secs))
    }
}

/// Single-attempt request execution
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        (**self).send(request).await
    }
}

/// `reqwest`-backed transport talking to the judge API
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(ApiResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Authenticated client applying the retry policy on top of a `Transport`
pub struct ApiClient<T: Transport> {
    transport: T,
    api_key: String,
    default_retry: RetryPolicy,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, api_key: &str, default_retry: RetryPolicy) -> Self {
        Self {
            transport,
            api_key: api_key.to_string(),
            default_retry,
        }
    }

    pub fn default_retry(&self) -> RetryPolicy {
        self.default_retry
    }

    pub async fn get(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        retry: RetryPolicy,
    ) -> Option<ApiResponse> {
        self.request(Method::Get, path, headers, None, retry).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
        retry: RetryPolicy,
    ) -> Option<ApiResponse> {
        self.request(Method::Post, path, &[], body, retry).await
    }

    /// Send a request, retrying on connection failure per `retry`.
    ///
    /// Returns `None` when the coordinator stayed unreachable and retrying is
    /// disabled, or when the request failed for a non-connection reason.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
        retry: RetryPolicy,
    ) -> Option<ApiResponse> {
        let request = self.build(method, path, headers, body);

        loop {
            match self.transport.send(&request).await {
                Ok(response) => return Some(response),
                Err(e) if e.is_connect() => match retry.delay() {
                    Some(delay) => {
                        warn!(
                            "Failed to connect to judge API ({} {}), retrying in {} seconds: {}",
                            method,
                            path,
                            delay.as_secs(),
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(
                            "Failed to connect to judge API ({} {}), not retrying: {}",
                            method, path, e
                        );
                        return None;
                    }
                },
                Err(e) => {
                    error!("Judge API request {} {} failed: {}", method, path, e);
                    return None;
                }
            }
        }
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ApiRequest {
        let mut merged: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(AUTH_HEADER))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        merged.push((AUTH_HEADER.to_string(), self.api_key.clone()));

        ApiRequest {
            method,
            path: path.to_string(),
            headers: merged,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedTransport;
    use tokio::time::Instant;

    fn client(transport: Arc<ScriptedTransport>) -> ApiClient<Arc<ScriptedTransport>> {
        ApiClient::new(transport, "secret", RetryPolicy::every(1))
    }

    #[tokio::test]
    async fn test_auth_header_attached_and_not_overridable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_empty(200);
        let client = client(transport.clone());

        let response = client
            .get(
                "/problems/1",
                &[("api_key", "forged"), ("If-Modified-Since", "10")],
                RetryPolicy::NEVER,
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header("api_key"), Some("secret"));
        assert_eq!(sent[0].header("If-Modified-Since"), Some("10"));
        let auth_count = sent[0]
            .headers
            .iter()
            .filter(|(name, _)| name == AUTH_HEADER)
            .count();
        assert_eq!(auth_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_connection_failures_until_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_connect();
        transport.fail_connect();
        transport.reply_empty(200);
        let client = ApiClient::new(transport.clone(), "secret", RetryPolicy::every(3));

        let started = Instant::now();
        let response = client.post("/jobs/claim", None, RetryPolicy::every(3)).await;

        assert_eq!(response.map(|r| r.status), Some(200));
        assert_eq!(transport.requests().len(), 3);
        // Two sleeps of three seconds each on the paused clock
        assert_eq!(started.elapsed().as_secs(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_returns_none_after_one_attempt() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_connect();
        transport.reply_empty(200);
        let client = client(transport.clone());

        let started = Instant::now();
        let response = client.post("/jobs/1/cancel", None, RetryPolicy::NEVER).await;

        assert!(response.is_none());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(started.elapsed().as_secs(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply_empty(500);
        transport.reply_empty(200);
        let client = client(transport.clone());

        let response = client.post("/jobs/claim", None, RetryPolicy::every(1)).await;

        assert_eq!(response.map(|r| r.status), Some(500));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_request_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail_request();
        transport.reply_empty(200);
        let client = client(transport.clone());

        assert!(client.get("/problems", &[], RetryPolicy::every(1)).await.is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_retry_policy_delay() {
        assert_eq!(RetryPolicy::NEVER.delay(), None);
        assert_eq!(RetryPolicy::every(0), RetryPolicy::NEVER);
        assert_eq!(RetryPolicy::every(2).delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_http_transport_trims_base_url() {
        let transport = HttpTransport::new("http://localhost:5000/");
        assert_eq!(transport.base_url, "http://localhost:5000");
    }
}
