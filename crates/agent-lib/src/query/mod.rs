//! Time-series query client
//!
//! The scheduler only depends on the [`QueryClient`] trait; the Prometheus
//! HTTP API implementation lives in [`PrometheusClient`].

mod http;

pub use self::http::{PrometheusClient, QUERY_TIMEOUT};

use crate::models::QueryResult;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Successful query outcome
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub result: QueryResult,
    /// Advisory warnings reported by the server
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("query request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("query API error ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("unexpected query response (HTTP {status}): {message}")]
    InvalidResponse { status: u16, message: String },

    #[error("invalid query endpoint: {0}")]
    Endpoint(String),
}

/// Trait for instant-query implementations
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Evaluate `query` at the current server time
    async fn query(&self, query: &str) -> Result<QueryResponse, QueryError>;
}
