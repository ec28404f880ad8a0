//! Batch assembly for one agent

use crate::config::AgentRule;
use crate::mapper::map_sample;
use crate::models::{MetricBatch, QueryResult, ResultKind};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BatchError {
    /// Only instantaneous vectors can be forwarded
    #[error("unsupported query result type {0}, expected vector")]
    UnsupportedResult(ResultKind),
}

/// Build the outbound batch for `rule` from its query result
///
/// Metrics appear in the order the query returned the samples.
pub fn build_batch(rule: &AgentRule, result: &QueryResult) -> Result<MetricBatch, BatchError> {
    let samples = match result {
        QueryResult::Vector(samples) => samples,
        other => return Err(BatchError::UnsupportedResult(other.kind())),
    };

    let mut batch = MetricBatch::new(rule.agent_name.clone());
    batch.metrics = samples
        .iter()
        .map(|sample| map_sample(sample, rule))
        .collect();

    Ok(batch)
}
