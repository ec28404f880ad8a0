//! Batch delivery
//!
//! The dispatcher serializes a [`MetricBatch`] and, depending on the
//! [`DispatchMode`], prints it or delivers it to the ingestion endpoint.
//! HTTP status codes are logged but never turned into errors.

mod transport;

pub use transport::{HttpTransport, Transport, TransportError, TransportResponse, DISPATCH_TIMEOUT};

use crate::config::GlobalConfig;
use crate::models::MetricBatch;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Machinist ingestion endpoint
pub const MACHINIST_ENDPOINT: &str = "https://gw.machinist.iij.jp/endpoint";

/// Whether batches are printed or delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Pretty-print to stdout, never touch the network
    DryRun,
    /// POST to the ingestion endpoint
    Live,
}

impl DispatchMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            DispatchMode::DryRun
        } else {
            DispatchMode::Live
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, DispatchMode::DryRun)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to serialize batch for agent {agent}: {reason}")]
    Serialize { agent: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What happened to a dispatched batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Printed,
    Delivered(TransportResponse),
}

/// Serializes batches and hands them to the transport
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    endpoint: String,
    token: String,
    mode: DispatchMode,
}

impl Dispatcher {
    /// Create a dispatcher targeting the Machinist endpoint
    pub fn new(transport: Arc<dyn Transport>, config: &GlobalConfig, mode: DispatchMode) -> Self {
        Self::with_endpoint(transport, MACHINIST_ENDPOINT, config, mode)
    }

    /// Create a dispatcher targeting a custom endpoint
    pub fn with_endpoint(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        config: &GlobalConfig,
        mode: DispatchMode,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            token: config.machinist_token.clone(),
            mode,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Print or deliver `batch`
    pub async fn dispatch(&self, batch: &MetricBatch) -> Result<DispatchOutcome, DispatchError> {
        match self.mode {
            DispatchMode::DryRun => {
                let rendered = render_pretty(batch)?;
                println!("{}", rendered);
                Ok(DispatchOutcome::Printed)
            }
            DispatchMode::Live => {
                let payload = encode(batch)?;
                debug!(
                    agent = %batch.agent,
                    bytes = payload.len(),
                    endpoint = %self.endpoint,
                    "Posting batch"
                );

                let response = self
                    .transport
                    .post(&self.endpoint, &self.token, payload)
                    .await?;

                info!(
                    agent = %batch.agent,
                    status = response.status,
                    success = response.is_success(),
                    body = %response.body,
                    "Batch dispatched"
                );

                Ok(DispatchOutcome::Delivered(response))
            }
        }
    }
}

/// Compact JSON payload sent over the wire
pub fn encode(batch: &MetricBatch) -> Result<Vec<u8>, DispatchError> {
    check_finite(batch)?;
    serde_json::to_vec(batch).map_err(|e| serialize_error(batch, e.to_string()))
}

/// Two-space indented JSON, as printed in dry-run mode
pub fn render_pretty(batch: &MetricBatch) -> Result<String, DispatchError> {
    check_finite(batch)?;
    serde_json::to_string_pretty(batch).map_err(|e| serialize_error(batch, e.to_string()))
}

// serde_json writes non-finite floats as null; the ingestion API would read
// that as a missing value, so reject them instead.
fn check_finite(batch: &MetricBatch) -> Result<(), DispatchError> {
    match batch
        .metrics
        .iter()
        .find(|metric| !metric.data_point.value.is_finite())
    {
        Some(metric) => Err(serialize_error(
            batch,
            format!(
                "unsupported value {} for metric {:?}",
                metric.data_point.value, metric.name
            ),
        )),
        None => Ok(()),
    }
}

fn serialize_error(batch: &MetricBatch, reason: String) -> DispatchError {
    DispatchError::Serialize {
        agent: batch.agent.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataPoint, MachinistMetric};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request instead of sending it
    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<(String, String, Vec<u8>)>>,
        status: u16,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn post(
            &self,
            url: &str,
            token: &str,
            body: Vec<u8>,
        ) -> Result<TransportResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), token.to_string(), body));
            Ok(TransportResponse {
                status: self.status,
                body: "{}".to_string(),
            })
        }
    }

    fn config() -> GlobalConfig {
        GlobalConfig::from_yaml("prometheus_url: http://p:9090\nmachinist_token: tok\n").unwrap()
    }

    fn batch(value: f64) -> MetricBatch {
        let mut batch = MetricBatch::new("a1");
        batch.metrics.push(MachinistMetric {
            name: "cpu".to_string(),
            namespace: Some("infra".to_string()),
            tags: [("pod".to_string(), "x".to_string())].into_iter().collect(),
            data_point: DataPoint {
                timestamp: None,
                value,
                meta: Default::default(),
            },
        });
        batch
    }

    #[test]
    fn test_encode_wire_format() {
        let payload = encode(&batch(3.5)).unwrap();
        let text = String::from_utf8(payload).unwrap();

        assert_eq!(
            text,
            r#"{"agent":"a1","metrics":[{"name":"cpu","namespace":"infra","tags":{"pod":"x"},"data_point":{"value":3.5,"meta":{}}}]}"#
        );
    }

    #[test]
    fn test_render_pretty_uses_two_space_indent() {
        let rendered = render_pretty(&MetricBatch::new("a1")).unwrap();
        assert_eq!(rendered, "{\n  \"agent\": \"a1\",\n  \"metrics\": []\n}");
    }

    #[test]
    fn test_non_finite_value_is_a_serialization_error() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                encode(&batch(value)),
                Err(DispatchError::Serialize { .. })
            ));
            assert!(render_pretty(&batch(value)).is_err());
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(transport.clone(), &config(), DispatchMode::DryRun);

        let outcome = dispatcher.dispatch(&batch(1.0)).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Printed);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_posts_payload_with_token() {
        let transport = Arc::new(RecordingTransport {
            status: 200,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(transport.clone(), &config(), DispatchMode::Live);

        let outcome = dispatcher.dispatch(&batch(1.0)).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::Delivered(ref r) if r.status == 200));
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, MACHINIST_ENDPOINT);
        assert_eq!(requests[0].1, "tok");
        assert_eq!(requests[0].2, encode(&batch(1.0)).unwrap());
    }

    #[tokio::test]
    async fn test_error_status_is_still_success() {
        let transport = Arc::new(RecordingTransport {
            status: 500,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(transport, &config(), DispatchMode::Live);

        let outcome = dispatcher.dispatch(&batch(1.0)).await;

        tokio_test::assert_ok!(outcome);
    }

    #[tokio::test]
    async fn test_serialization_error_skips_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(transport.clone(), &config(), DispatchMode::Live);

        let result = dispatcher.dispatch(&batch(f64::NAN)).await;

        tokio_test::assert_err!(result);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(DispatchMode::from_dry_run(true), DispatchMode::DryRun);
        assert_eq!(DispatchMode::from_dry_run(false), DispatchMode::Live);
        assert!(DispatchMode::DryRun.is_dry_run());
    }
}
