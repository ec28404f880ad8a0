//! Prometheus HTTP API client

use super::{QueryClient, QueryError, QueryResponse};
use crate::models::QueryResult;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Upper bound on a single instant query, including the GET fallback
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

const QUERY_PATH: &str = "api/v1/query";

/// Response envelope shared by every Prometheus API endpoint
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    data: Option<QueryResult>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Instant-query client for a Prometheus-compatible server
///
/// Queries are sent as form-encoded POSTs; servers that reject POST with
/// 405 are retried once with GET.
pub struct PrometheusClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl PrometheusClient {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: &str) -> Result<Self, QueryError> {
        Self::with_timeout(base_url, QUERY_TIMEOUT)
    }

    /// Create a client with a custom per-query timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let mut endpoint = Url::parse(base_url)
            .map_err(|e| QueryError::Endpoint(format!("{}: {}", base_url, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(QueryError::Endpoint(format!(
                "{}: not a base URL",
                base_url
            )));
        }

        let path = format!("{}/{}", endpoint.path().trim_end_matches('/'), QUERY_PATH);
        endpoint.set_path(&path);

        let client = Client::builder().build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Full URL of the instant-query endpoint
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn execute(&self, query: &str) -> Result<QueryResponse, QueryError> {
        let params = [("query", query)];

        let mut response = self
            .client
            .post(self.endpoint.clone())
            .form(&params)
            .send()
            .await?;

        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            debug!(endpoint = %self.endpoint, "POST not allowed, retrying query with GET");
            response = self
                .client
                .get(self.endpoint.clone())
                .query(&params)
                .send()
                .await?;
        }

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        decode_response(status, &body)
    }
}

#[async_trait]
impl QueryClient for PrometheusClient {
    async fn query(&self, query: &str) -> Result<QueryResponse, QueryError> {
        tokio::time::timeout(self.timeout, self.execute(query))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))?
    }
}

/// Decode a query API body regardless of HTTP status
///
/// Prometheus reports query errors with 4xx/5xx statuses and an error
/// envelope, so the envelope decides the outcome, not the status code.
fn decode_response(status: u16, body: &[u8]) -> Result<QueryResponse, QueryError> {
    let envelope: ApiEnvelope =
        serde_json::from_slice(body).map_err(|e| QueryError::InvalidResponse {
            status,
            message: e.to_string(),
        })?;

    match envelope.status.as_str() {
        "success" => {
            let result = envelope.data.ok_or_else(|| QueryError::InvalidResponse {
                status,
                message: "missing data in successful response".to_string(),
            })?;
            Ok(QueryResponse {
                result,
                warnings: envelope.warnings,
            })
        }
        "error" => Err(QueryError::Api {
            error_type: envelope.error_type.unwrap_or_default(),
            message: envelope.error.unwrap_or_default(),
        }),
        other => Err(QueryError::InvalidResponse {
            status,
            message: format!("unknown response status {:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResultKind;
    use mockito::Matcher;

    const VECTOR_BODY: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                {"metric": {"__name__": "up", "job": "node"}, "value": [1700000000, "1"]},
                {"metric": {"__name__": "up", "job": "api"}, "value": [1700000000, "0"]}
            ]
        }
    }"#;

    #[test]
    fn test_endpoint_joins_base_path() {
        let client = PrometheusClient::new("http://prometheus:9090").unwrap();
        assert_eq!(client.endpoint(), "http://prometheus:9090/api/v1/query");

        let client = PrometheusClient::new("https://example.com/prom/").unwrap();
        assert_eq!(client.endpoint(), "https://example.com/prom/api/v1/query");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            PrometheusClient::new("not a url"),
            Err(QueryError::Endpoint(_))
        ));
        assert!(matches!(
            PrometheusClient::new("mailto:ops@example.com"),
            Err(QueryError::Endpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_vector_query_over_post() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/query")
            .match_body(Matcher::UrlEncoded("query".into(), r#"up{job=~".+"}"#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(VECTOR_BODY)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let response = client.query(r#"up{job=~".+"}"#).await.unwrap();

        mock.assert_async().await;
        assert!(response.warnings.is_empty());
        let QueryResult::Vector(samples) = response.result else {
            panic!("expected vector result");
        };
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric["job"], "node");
        assert_eq!(samples[1].point.value, 0.0);
    }

    #[tokio::test]
    async fn test_falls_back_to_get_on_405() {
        let mut server = mockito::Server::new_async().await;
        let post = server
            .mock("POST", "/api/v1/query")
            .with_status(405)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), "up".into()))
            .with_status(200)
            .with_body(VECTOR_BODY)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let response = client.query("up").await.unwrap();

        post.assert_async().await;
        get.assert_async().await;
        assert_eq!(response.result.kind(), ResultKind::Vector);
    }

    #[tokio::test]
    async fn test_warnings_are_returned() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/query")
            .with_status(200)
            .with_body(
                r#"{"status": "success", "warnings": ["partial response"],
                    "data": {"resultType": "scalar", "result": [1700000000, "2"]}}"#,
            )
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let response = client.query("scalar(up)").await.unwrap();

        assert_eq!(response.warnings, vec!["partial response".to_string()]);
        assert_eq!(response.result.kind(), ResultKind::Scalar);
    }

    #[tokio::test]
    async fn test_api_error_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/query")
            .with_status(400)
            .with_body(r#"{"status": "error", "errorType": "bad_data", "error": "parse error"}"#)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let err = client.query("up{").await.unwrap_err();

        match err {
            QueryError::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "bad_data");
                assert_eq!(message, "parse error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/query")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let err = client.query("up").await.unwrap_err();

        assert!(matches!(err, QueryError::InvalidResponse { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_query_times_out() {
        // Accept connections but never answer
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client =
            PrometheusClient::with_timeout(&format!("http://{}", addr), Duration::from_millis(100))
                .unwrap();
        let err = client.query("up").await.unwrap_err();

        assert!(matches!(err, QueryError::Timeout(d) if d == Duration::from_millis(100)));
    }

    #[test]
    fn test_success_without_data_is_invalid() {
        let err = decode_response(200, br#"{"status": "success"}"#).unwrap_err();
        assert!(matches!(err, QueryError::InvalidResponse { status: 200, .. }));
    }
}
