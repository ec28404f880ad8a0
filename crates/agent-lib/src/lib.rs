//! Agent library for forwarding Prometheus query results to Machinist
//!
//! This crate provides the core functionality for:
//! - Loading the agent configuration
//! - Running instant queries against the Prometheus HTTP API
//! - Mapping query samples to Machinist metrics
//! - Printing or delivering metric batches
//! - Periodic scheduling of all configured agents
//! - Health checks and observability

pub mod api;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod mapper;
pub mod models;
pub mod observability;
pub mod query;
pub mod scheduler;

pub use config::{AgentRule, ConfigError, GlobalConfig};
pub use dispatch::{DispatchMode, Dispatcher, HttpTransport};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ForwarderMetrics, StructuredLogger};
pub use query::{PrometheusClient, QueryClient};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerState};
