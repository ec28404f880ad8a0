//! Observability infrastructure for the forwarding agent
//!
//! Provides:
//! - Prometheus metrics (passes, forwarded samples, failures, latencies)
//! - Structured logging of agent lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info};

/// Histogram buckets for request latencies (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ForwarderMetricsInner> = OnceLock::new();

/// Pipeline stage an agent failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Query,
    Build,
    Dispatch,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Query => "query",
            FailureStage::Build => "build",
            FailureStage::Dispatch => "dispatch",
        }
    }
}

struct ForwarderMetricsInner {
    passes_total: IntCounter,
    samples_forwarded: IntCounterVec,
    agent_failures: IntCounterVec,
    query_latency_seconds: Histogram,
    dispatch_latency_seconds: Histogram,
    last_pass_timestamp_seconds: IntGauge,
}

impl ForwarderMetricsInner {
    fn new() -> Self {
        Self {
            passes_total: register_int_counter!(
                "machinist_agent_passes_total",
                "Number of completed passes over all configured agents"
            )
            .expect("Failed to register passes_total"),

            samples_forwarded: register_int_counter_vec!(
                "machinist_agent_samples_forwarded_total",
                "Number of samples mapped and dispatched, per agent",
                &["agent"]
            )
            .expect("Failed to register samples_forwarded_total"),

            agent_failures: register_int_counter_vec!(
                "machinist_agent_failures_total",
                "Number of abandoned agent cycles, per agent and pipeline stage",
                &["agent", "stage"]
            )
            .expect("Failed to register failures_total"),

            query_latency_seconds: register_histogram!(
                "machinist_agent_query_latency_seconds",
                "Time spent waiting for the query API",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register query_latency_seconds"),

            dispatch_latency_seconds: register_histogram!(
                "machinist_agent_dispatch_latency_seconds",
                "Time spent printing or delivering a batch",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register dispatch_latency_seconds"),

            last_pass_timestamp_seconds: register_int_gauge!(
                "machinist_agent_last_pass_timestamp_seconds",
                "Unix time at which the last pass completed"
            )
            .expect("Failed to register last_pass_timestamp_seconds"),
        }
    }
}

/// Forwarder metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct ForwarderMetrics {
    _private: (),
}

impl Default for ForwarderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwarderMetrics {
    /// Create a metrics handle (registers the global metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ForwarderMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ForwarderMetricsInner {
        GLOBAL_METRICS.get_or_init(ForwarderMetricsInner::new)
    }

    /// Record a completed pass
    pub fn record_pass(&self) {
        self.inner().passes_total.inc();
        self.inner()
            .last_pass_timestamp_seconds
            .set(chrono::Utc::now().timestamp());
    }

    pub fn add_samples_forwarded(&self, agent: &str, count: usize) {
        self.inner()
            .samples_forwarded
            .with_label_values(&[agent])
            .inc_by(count as u64);
    }

    pub fn inc_agent_failure(&self, agent: &str, stage: FailureStage) {
        self.inner()
            .agent_failures
            .with_label_values(&[agent, stage.as_str()])
            .inc();
    }

    pub fn observe_query_latency(&self, duration_secs: f64) {
        self.inner().query_latency_seconds.observe(duration_secs);
    }

    pub fn observe_dispatch_latency(&self, duration_secs: f64) {
        self.inner().dispatch_latency_seconds.observe(duration_secs);
    }

    pub fn passes_total(&self) -> u64 {
        self.inner().passes_total.get()
    }

    pub fn agent_failures(&self, agent: &str, stage: FailureStage) -> u64 {
        self.inner()
            .agent_failures
            .with_label_values(&[agent, stage.as_str()])
            .get()
    }

    pub fn samples_forwarded(&self, agent: &str) -> u64 {
        self.inner()
            .samples_forwarded
            .with_label_values(&[agent])
            .get()
    }
}

/// Structured logger for agent lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, agents: usize, interval_secs: f64, dry_run: bool) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            agents = agents,
            interval_secs = interval_secs,
            dry_run = dry_run,
            "Machinist agent started"
        );
    }

    /// Log a successfully forwarded agent cycle
    pub fn log_forwarded(&self, agent: &str, metrics: usize, elapsed_ms: u128) {
        info!(
            event = "agent_forwarded",
            instance = %self.instance,
            agent = %agent,
            metrics = metrics,
            elapsed_ms = elapsed_ms,
            "Forwarded agent metrics"
        );
    }

    /// Log an abandoned agent cycle
    pub fn log_agent_failed(&self, agent: &str, stage: FailureStage, error: &dyn std::fmt::Display) {
        error!(
            event = "agent_failed",
            instance = %self.instance,
            agent = %agent,
            stage = stage.as_str(),
            error = %error,
            "Agent cycle abandoned"
        );
    }

    /// Log the end of a pass over all agents
    pub fn log_pass_complete(&self, pass: u64, succeeded: usize, failed: usize, elapsed_ms: u128) {
        info!(
            event = "pass_complete",
            instance = %self.instance,
            pass = pass,
            succeeded = succeeded,
            failed = failed,
            elapsed_ms = elapsed_ms,
            "Pass complete"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Machinist agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarder_metrics_record() {
        let metrics = ForwarderMetrics::new();

        let before = metrics.passes_total();
        metrics.record_pass();
        assert!(metrics.passes_total() > before);

        metrics.add_samples_forwarded("observability-test", 3);
        metrics.add_samples_forwarded("observability-test", 2);
        assert_eq!(metrics.samples_forwarded("observability-test"), 5);

        metrics.inc_agent_failure("observability-test", FailureStage::Build);
        assert_eq!(
            metrics.agent_failures("observability-test", FailureStage::Build),
            1
        );

        metrics.observe_query_latency(0.01);
        metrics.observe_dispatch_latency(0.02);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("host-1");
        assert_eq!(logger.instance, "host-1");
    }

    #[test]
    fn test_failure_stage_labels() {
        assert_eq!(FailureStage::Query.as_str(), "query");
        assert_eq!(FailureStage::Build.as_str(), "build");
        assert_eq!(FailureStage::Dispatch.as_str(), "dispatch");
    }
}
