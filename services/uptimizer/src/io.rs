//! HTTP client abstraction for testability

use std::time::Duration;

use async_trait::async_trait;

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure, classified so callers can tell a slow target
/// from an unreachable one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed")]
    Connect,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("{0}")]
    Other(String),
}

/// Abstraction over HTTP client for dependency injection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    /// Send a GET request with a per-request timeout
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, HttpError>;

    /// Send a GET request authenticated with a bearer token
    async fn get_bearer(
        &self,
        url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError>;
}

/// Production HTTP client using reqwest
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uptimizer/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| crate::UptimizerError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else if e.is_redirect() {
        HttpError::TooManyRedirects
    } else if e.is_connect() {
        HttpError::Connect
    } else {
        HttpError::Other(e.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, HttpError> {
        tracing::debug!("GET {} (timeout {:?})", url, timeout);
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        tracing::debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }

    async fn get_bearer(
        &self,
        url: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        tracing::debug!("GET {} with bearer token (timeout {:?})", url, timeout);
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        tracing::debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}
