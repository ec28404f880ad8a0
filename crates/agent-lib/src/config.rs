//! Agent configuration
//!
//! The configuration file is YAML and is validated strictly: unknown fields
//! at any level are rejected when the file is loaded. It is read once at
//! startup and never mutated afterwards.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Polling interval used when the file leaves `interval` unset or zero
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted polling interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Environment variable that supplies the ingestion token when the file does not
pub const TOKEN_ENV_VAR: &str = "MACHINIST_TOKEN";

/// Errors raised while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Base URL of the Prometheus server
    pub prometheus_url: String,

    /// Bearer token for the ingestion endpoint
    #[serde(default)]
    pub machinist_token: String,

    /// Time between two passes over all agents
    #[serde(default, deserialize_with = "deserialize_interval")]
    pub interval: Duration,

    /// Per-agent query and labeling rules, in execution order
    #[serde(default)]
    pub agent_configs: Vec<AgentRule>,
}

/// Query and labeling rule for one agent
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentRule {
    pub agent_name: String,

    /// PromQL expression, passed to the query API verbatim
    pub query: String,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Sample labels copied into the metric's tags
    #[serde(default)]
    pub tag_includes: Vec<String>,

    /// Sample labels copied into the data point's meta
    #[serde(default)]
    pub meta_includes: Vec<String>,

    /// Fixed tags, overriding any included label of the same name
    #[serde(default)]
    pub tag: BTreeMap<String, String>,

    /// Fixed meta entries, overriding any included label of the same name
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl GlobalConfig {
    /// Read, parse and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml(&content)?;
        if config.machinist_token.is_empty() {
            if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
                config.machinist_token = token;
            }
        }

        info!(
            agents = config.agent_configs.len(),
            interval_secs = config.interval.as_secs_f64(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate a YAML document, applying defaults
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: GlobalConfig = serde_yaml::from_str(content)?;

        if config.interval.is_zero() {
            config.interval = DEFAULT_INTERVAL;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.prometheus_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "prometheus_url {:?} is not a valid URL: {}",
                self.prometheus_url, e
            ))
        })?;

        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be positive".to_string()));
        }
        if self.interval > MAX_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "interval {:?} exceeds the maximum of {:?}",
                self.interval, MAX_INTERVAL
            )));
        }

        for (index, rule) in self.agent_configs.iter().enumerate() {
            if rule.agent_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent_configs[{}]: agent_name must not be empty",
                    index
                )));
            }
            if rule.query.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent_configs[{}] ({}): query must not be empty",
                    index, rule.agent_name
                )));
            }
        }

        Ok(())
    }
}

impl AgentRule {
    /// Namespace to attach to metrics, `None` when unset or empty
    pub fn effective_namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Seconds(u64),
    Text(String),
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawInterval>::deserialize(deserializer)? {
        None => Ok(Duration::ZERO),
        Some(RawInterval::Seconds(secs)) => Ok(Duration::from_secs(secs)),
        Some(RawInterval::Text(text)) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse a Go-style duration string such as `"1m30s"`, `"1.5h"` or `"250ms"`
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.starts_with('-') {
        return Err(format!("negative duration {:?}", input));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(format!("invalid duration {:?}", input));
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", input));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };
        rest = &rest[unit_len..];

        total += number * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(format!("duration {:?} out of range", input));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
