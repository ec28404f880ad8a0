//! Sample mapping
//!
//! Turns one raw Prometheus sample into a Machinist metric according to an
//! agent's include lists and fixed overrides.

use crate::config::AgentRule;
use crate::models::{DataPoint, MachinistMetric, RawSample, METRIC_NAME_LABEL};
use std::collections::BTreeMap;

/// Map a raw sample to a normalized metric
///
/// Included labels are copied first, then the rule's fixed `tag`/`meta`
/// entries are applied so they win on key collisions. The name label is never
/// copied. Tag and meta maps are always allocated, even when nothing matches.
pub fn map_sample(sample: &RawSample, rule: &AgentRule) -> MachinistMetric {
    let mut tags = BTreeMap::new();
    let mut meta = BTreeMap::new();

    for (label, value) in &sample.metric {
        if label == METRIC_NAME_LABEL {
            continue;
        }
        if rule.tag_includes.iter().any(|include| include == label) {
            tags.insert(label.clone(), value.clone());
        }
        if rule.meta_includes.iter().any(|include| include == label) {
            meta.insert(label.clone(), value.clone());
        }
    }

    tags.extend(rule.tag.iter().map(|(k, v)| (k.clone(), v.clone())));
    meta.extend(rule.meta.iter().map(|(k, v)| (k.clone(), v.clone())));

    MachinistMetric {
        name: sample.name().to_string(),
        namespace: rule.effective_namespace().map(str::to_string),
        tags,
        data_point: DataPoint {
            timestamp: None,
            value: sample.point.value,
            meta,
        },
    }
}
