//! HTTP connections used by the sync engine
//!
//! The engine never talks to the network directly: it asks a
//! [`ConnectionFactory`] for a connection to a fully built URL and performs a
//! single GET or POST on it. Authentication and transport concerns belong to
//! the factory.

use crate::core_log::sync::errors::{SyncError, SyncResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A connection to one URL
#[async_trait]
pub trait HttpConnection: Send + Sync {
    async fn get(&self) -> SyncResult<HttpResponse>;

    async fn post(&self, body: String) -> SyncResult<HttpResponse>;
}

/// Creates connections, handling authentication and transport details
pub trait ConnectionFactory: Send + Sync {
    fn create_connection(&self, url: &Url) -> SyncResult<Box<dyn HttpConnection>>;
}

/// Connection factory backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestConnectionFactory {
    client: reqwest::Client,
}

impl ReqwestConnectionFactory {
    /// Build a factory whose requests time out after `connect_timeout` while
    /// connecting and `read_timeout` overall
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ConnectionFactory for ReqwestConnectionFactory {
    fn create_connection(&self, url: &Url) -> SyncResult<Box<dyn HttpConnection>> {
        match url.scheme() {
            "http" | "https" => Ok(Box::new(ReqwestConnection {
                client: self.client.clone(),
                url: url.clone(),
            })),
            other => Err(SyncError::Configuration(format!("unsupported URL scheme '{}'", other))),
        }
    }
}

struct ReqwestConnection {
    client: reqwest::Client,
    url: Url,
}

impl ReqwestConnection {
    async fn finish(response: reqwest::Response) -> SyncResult<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpConnection for ReqwestConnection {
    async fn get(&self) -> SyncResult<HttpResponse> {
        trace!(url = %self.url, "GET");
        let response = self.client.get(self.url.clone()).send().await?;
        Self::finish(response).await
    }

    async fn post(&self, body: String) -> SyncResult<HttpResponse> {
        trace!(url = %self.url, bytes = body.len(), "POST");
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        Self::finish(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::ok("").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
        assert!(!HttpResponse::new(503, "").is_success());
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let factory =
            ReqwestConnectionFactory::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let url = Url::parse("ftp://example.com/auditlog/query").unwrap();
        assert!(matches!(factory.create_connection(&url), Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let factory =
            ReqwestConnectionFactory::new(Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/auditlog/query", port)).unwrap();
        let err = factory.create_connection(&url).unwrap().get().await.unwrap_err();
        assert!(matches!(err, SyncError::TransientNetwork(_)), "got {:?}", err);
    }
}
