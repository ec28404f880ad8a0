//! Forwarding scheduler
//!
//! Drives the query -> build -> dispatch pipeline for every configured agent.
//! The scheduler is an explicit state machine:
//!
//! - `Running`: one sequential pass over all agents. Failures are isolated
//!   per agent and never abort the pass.
//! - `Idle`: waiting for the next tick.
//! - `Terminated`: reached after the single dry-run pass, or when the ticker
//!   is exhausted.
//!
//! The first pass runs immediately, before any wait.

mod ticker;


pub use ticker::{IntervalTicker, ManualTicker, TickHandle, Ticker};

use crate::batch::{build_batch, BatchError};
use crate::config::{AgentRule, GlobalConfig};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::health::{components, HealthRegistry};
use crate::observability::{FailureStage, ForwarderMetrics, StructuredLogger};
use crate::query::{QueryClient, QueryError};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why one agent's cycle was abandoned
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("query failed: {0}")]
    Query(#[from] QueryError),

    #[error(transparent)]
    Build(#[from] BatchError),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl AgentError {
    pub fn stage(&self) -> FailureStage {
        match self {
            AgentError::Query(_) => FailureStage::Query,
            AgentError::Build(_) => FailureStage::Build,
            AgentError::Dispatch(_) => FailureStage::Dispatch,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Idle,
    Terminated,
}

/// Result of one agent within a pass
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Forwarded {
        agent: String,
        metrics: usize,
    },
    Failed {
        agent: String,
        stage: FailureStage,
        error: String,
    },
}

impl AgentOutcome {
    pub fn agent(&self) -> &str {
        match self {
            AgentOutcome::Forwarded { agent, .. } | AgentOutcome::Failed { agent, .. } => agent,
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, AgentOutcome::Forwarded { .. })
    }
}

/// Summary of one pass over all agents
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    /// 1-based pass number
    pub pass: u64,
    /// One entry per agent, in configured order
    pub outcomes: Vec<AgentOutcome>,
}

impl PassReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_forwarded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    fn failed_in(&self, stages: &[FailureStage]) -> Vec<&AgentOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AgentOutcome::Failed { stage, .. } if stages.contains(stage)))
            .collect()
    }
}

/// Returned by [`Scheduler::run`] once the scheduler terminates
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub passes: u64,
}

/// Periodic forwarding scheduler
pub struct Scheduler {
    config: Arc<GlobalConfig>,
    query: Arc<dyn QueryClient>,
    dispatcher: Dispatcher,
    ticker: Box<dyn Ticker>,
    health: Option<HealthRegistry>,
    metrics: ForwarderMetrics,
    logger: StructuredLogger,
    state: SchedulerState,
    passes: u64,
    last_report: Option<PassReport>,
}

impl Scheduler {
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Report of the most recently completed pass
    pub fn last_report(&self) -> Option<&PassReport> {
        self.last_report.as_ref()
    }

    /// Perform one state transition and return the new state
    pub async fn step(&mut self) -> SchedulerState {
        let current = self.state;
        self.state = match current {
            SchedulerState::Running => {
                let report = self.run_pass().await;
                self.last_report = Some(report);
                if self.dispatcher.mode().is_dry_run() {
                    info!("Dry run complete, stopping scheduler");
                    SchedulerState::Terminated
                } else {
                    SchedulerState::Idle
                }
            }
            SchedulerState::Idle => {
                if self.ticker.tick().await {
                    SchedulerState::Running
                } else {
                    warn!("Ticker exhausted, stopping scheduler");
                    SchedulerState::Terminated
                }
            }
            SchedulerState::Terminated => SchedulerState::Terminated,
        };
        self.state
    }

    /// Step until terminated
    ///
    /// In live mode with the interval ticker this never returns.
    pub async fn run(mut self) -> RunSummary {
        info!(
            agents = self.config.agent_configs.len(),
            interval_secs = self.config.interval.as_secs_f64(),
            dry_run = self.dispatcher.mode().is_dry_run(),
            "Starting scheduler"
        );

        while self.step().await != SchedulerState::Terminated {}

        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::SCHEDULER, "scheduler terminated")
                .await;
        }

        RunSummary {
            passes: self.passes,
        }
    }

    /// Run every agent once, in configured order
    async fn run_pass(&mut self) -> PassReport {
        self.passes += 1;
        let pass = self.passes;
        let started = Instant::now();
        debug!(pass, "Starting pass");

        let config = Arc::clone(&self.config);
        let mut outcomes = Vec::with_capacity(config.agent_configs.len());

        for rule in &config.agent_configs {
            let agent_started = Instant::now();
            let outcome = match self.forward_agent(rule).await {
                Ok(metrics) => {
                    self.metrics
                        .add_samples_forwarded(&rule.agent_name, metrics);
                    self.logger.log_forwarded(
                        &rule.agent_name,
                        metrics,
                        agent_started.elapsed().as_millis(),
                    );
                    AgentOutcome::Forwarded {
                        agent: rule.agent_name.clone(),
                        metrics,
                    }
                }
                Err(e) => {
                    let stage = e.stage();
                    self.metrics.inc_agent_failure(&rule.agent_name, stage);
                    self.logger.log_agent_failed(&rule.agent_name, stage, &e);
                    AgentOutcome::Failed {
                        agent: rule.agent_name.clone(),
                        stage,
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = PassReport { pass, outcomes };

        self.metrics.record_pass();
        self.logger.log_pass_complete(
            pass,
            report.succeeded(),
            report.failed(),
            started.elapsed().as_millis(),
        );
        self.update_health(&report).await;

        report
    }

    /// Query, build and dispatch for a single agent
    async fn forward_agent(&self, rule: &AgentRule) -> Result<usize, AgentError> {
        let query_started = Instant::now();
        let response = self.query.query(&rule.query).await;
        self.metrics
            .observe_query_latency(query_started.elapsed().as_secs_f64());
        let response = response?;

        for warning in &response.warnings {
            warn!(agent = %rule.agent_name, warning = %warning, "Query returned a warning");
        }

        let batch = build_batch(rule, &response.result)?;

        let dispatch_started = Instant::now();
        let dispatched = self.dispatcher.dispatch(&batch).await;
        self.metrics
            .observe_dispatch_latency(dispatch_started.elapsed().as_secs_f64());
        dispatched?;

        Ok(batch.len())
    }

    async fn update_health(&self, report: &PassReport) {
        let Some(health) = &self.health else {
            return;
        };

        let total = report.outcomes.len();
        let stages = [
            (
                components::QUERY,
                report.failed_in(&[FailureStage::Query, FailureStage::Build]),
            ),
            (
                components::DISPATCH,
                report.failed_in(&[FailureStage::Dispatch]),
            ),
        ];

        for (component, failures) in stages {
            match failures.last() {
                None => health.set_healthy(component).await,
                Some(AgentOutcome::Failed { agent, error, .. }) => {
                    let message = format!(
                        "{} of {} agents failed, last: {}: {}",
                        failures.len(),
                        total,
                        agent,
                        error
                    );
                    health.set_degraded(component, message).await;
                }
                Some(AgentOutcome::Forwarded { .. }) => {}
            }
        }

        health.set_healthy(components::SCHEDULER).await;
        health.record_pass().await;
    }
}

/// Builder for the scheduler
pub struct SchedulerBuilder {
    config: Arc<GlobalConfig>,
    query: Option<Arc<dyn QueryClient>>,
    dispatcher: Option<Dispatcher>,
    ticker: Option<Box<dyn Ticker>>,
    health: Option<HealthRegistry>,
    instance: String,
}

impl SchedulerBuilder {
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            query: None,
            dispatcher: None,
            ticker: None,
            health: None,
            instance: "machinist-agent".to_string(),
        }
    }

    pub fn query_client(mut self, query: Arc<dyn QueryClient>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Tick source; defaults to an [`IntervalTicker`] with the configured interval
    pub fn ticker(mut self, ticker: impl Ticker + 'static) -> Self {
        self.ticker = Some(Box::new(ticker));
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Instance name attached to structured log events
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Build the scheduler in the `Running` state
    ///
    /// Without an explicit ticker this must be called from within a tokio
    /// runtime.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let query = self.query.ok_or(SchedulerError::Missing("query client"))?;
        let dispatcher = self.dispatcher.ok_or(SchedulerError::Missing("dispatcher"))?;
        let ticker = match self.ticker {
            Some(ticker) => ticker,
            None => Box::new(IntervalTicker::new(self.config.interval)),
        };

        Ok(Scheduler {
            config: self.config,
            query,
            dispatcher,
            ticker,
            health: self.health,
            metrics: ForwarderMetrics::new(),
            logger: StructuredLogger::new(self.instance),
            state: SchedulerState::Running,
            passes: 0,
            last_report: None,
        })
    }
}
