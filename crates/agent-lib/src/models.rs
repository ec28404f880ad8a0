//! Core data models for the forwarding agent
//!
//! Inbound types mirror the Prometheus HTTP query API; outbound types mirror
//! the Machinist ingestion payload.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Label carrying the metric name on every Prometheus series
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label set of a single series
pub type LabelSet = BTreeMap<String, String>;

/// A `[timestamp, "value"]` pair as returned by the query API
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "(f64, String)")]
pub struct SamplePair {
    pub timestamp: f64,
    pub value: f64,
}

impl TryFrom<(f64, String)> for SamplePair {
    type Error = String;

    fn try_from((timestamp, raw): (f64, String)) -> Result<Self, Self::Error> {
        let value = raw
            .parse::<f64>()
            .map_err(|e| format!("invalid sample value {:?}: {}", raw, e))?;
        Ok(Self { timestamp, value })
    }
}

/// A `[timestamp, "string"]` pair as returned for string results
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(f64, String)")]
pub struct StringPair {
    pub timestamp: f64,
    pub value: String,
}

impl From<(f64, String)> for StringPair {
    fn from((timestamp, value): (f64, String)) -> Self {
        Self { timestamp, value }
    }
}

/// One labeled sample of an instantaneous vector
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSample {
    pub metric: LabelSet,
    #[serde(rename = "value")]
    pub point: SamplePair,
}

impl RawSample {
    /// Metric name, or an empty string when the series carries no name label
    pub fn name(&self) -> &str {
        self.metric
            .get(METRIC_NAME_LABEL)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Vector entry as sent on the wire; native histograms carry `histogram`
/// instead of `value`
#[derive(Deserialize)]
struct VectorEntry {
    metric: LabelSet,
    #[serde(default)]
    value: Option<SamplePair>,
    #[serde(default)]
    histogram: Option<IgnoredAny>,
}

/// Decode a vector, dropping samples that carry no float value
fn deserialize_vector<'de, D>(deserializer: D) -> Result<Vec<RawSample>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<VectorEntry>::deserialize(deserializer)?;
    let samples = entries
        .into_iter()
        .filter_map(|entry| match entry.value {
            Some(point) => Some(RawSample {
                metric: entry.metric,
                point,
            }),
            None => {
                warn!(
                    metric = entry.metric.get(METRIC_NAME_LABEL).map(String::as_str).unwrap_or_default(),
                    histogram = entry.histogram.is_some(),
                    "Skipping sample without a float value"
                );
                None
            }
        })
        .collect();
    Ok(samples)
}

/// One series of a range (matrix) result
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeSeries {
    pub metric: LabelSet,
    #[serde(default)]
    pub values: Vec<SamplePair>,
}

/// Query result, tagged by shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Vector(#[serde(deserialize_with = "deserialize_vector")] Vec<RawSample>),
    Matrix(Vec<RangeSeries>),
    Scalar(SamplePair),
    String(StringPair),
}

impl QueryResult {
    /// Shape name as reported by the query API
    pub fn kind(&self) -> ResultKind {
        match self {
            QueryResult::Vector(_) => ResultKind::Vector,
            QueryResult::Matrix(_) => ResultKind::Matrix,
            QueryResult::Scalar(_) => ResultKind::Scalar,
            QueryResult::String(_) => ResultKind::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Vector,
    Matrix,
    Scalar,
    String,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::Vector => "vector",
            ResultKind::Matrix => "matrix",
            ResultKind::Scalar => "scalar",
            ResultKind::String => "string",
        };
        f.write_str(name)
    }
}

/// Data point of an outbound metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub value: f64,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// Normalized metric as accepted by the ingestion endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachinistMetric {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub data_point: DataPoint,
}

/// Outbound request: every metric produced for one agent in one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub agent: String,
    pub metrics: Vec<MachinistMetric>,
}

impl MetricBatch {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            metrics: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
