//! HTTP transport for outbound batches

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use std::time::Duration;
use thiserror::Error;

/// Timeout applied to each delivery request
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Response descriptor returned by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for delivering a serialized payload
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `url`, with a bearer token unless `token` is empty
    async fn post(
        &self,
        url: &str,
        token: &str,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        token: &str,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError> {
        let request_error = |source: reqwest::Error| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request.body(body).send().await.map_err(request_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(request_error)?;

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_post_sends_bearer_token_and_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/endpoint")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Exact(r#"{"agent":"a1"}"#.to_string()))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .post(
                &format!("{}/endpoint", server.url()),
                "secret",
                br#"{"agent":"a1"}"#.to_vec(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "ok");
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_empty_token_sends_no_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/endpoint")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .post(&format!("{}/endpoint", server.url()), "", b"{}".to_vec())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/endpoint")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .post(&format!("{}/endpoint", server.url()), "bad", Vec::new())
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::with_timeout(Duration::from_secs(2)).unwrap();
        let result = transport
            .post(&format!("http://{}/endpoint", addr), "t", Vec::new())
            .await;

        assert!(matches!(result, Err(TransportError::Request { .. })));
    }
}
