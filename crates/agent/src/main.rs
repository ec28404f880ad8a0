//! Machinist agent
//!
//! Periodically evaluates the configured Prometheus queries and forwards the
//! results to the Machinist ingestion endpoint, one batch per agent.

use agent_lib::{
    api::{self, AppState},
    DispatchMode, Dispatcher, ForwarderMetrics, GlobalConfig, HealthRegistry, HttpTransport,
    PrometheusClient, SchedulerBuilder, StructuredLogger,
};
use anyhow::{Context, Result};
use clap::{error::ErrorKind, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;

use cli::{Cli, LogFormat};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const INSTANCE: &str = "machinist-agent";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                err.exit();
            }
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal startup error");
            ExitCode::from(1)
        }
    }
}

/// Install the global subscriber; all log output goes to stderr
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = GlobalConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    let mode = DispatchMode::from_dry_run(cli.dry_run);

    let logger = StructuredLogger::new(INSTANCE);
    logger.log_startup(
        AGENT_VERSION,
        config.agent_configs.len(),
        config.interval.as_secs_f64(),
        mode.is_dry_run(),
    );

    let query = Arc::new(
        PrometheusClient::new(&config.prometheus_url)
            .context("failed to create Prometheus client")?,
    );
    let transport = Arc::new(HttpTransport::new().context("failed to create HTTP transport")?);
    let dispatcher = Dispatcher::new(transport, &config, mode);
    let health_registry = HealthRegistry::with_default_components().await;

    if let Some(addr) = cli.listen {
        if mode.is_dry_run() {
            warn!(addr = %addr, "Ignoring --listen in dry-run mode");
        } else {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind API listener on {}", addr))?;
            let app_state = Arc::new(AppState::new(
                health_registry.clone(),
                ForwarderMetrics::new(),
            ));
            tokio::spawn(async move {
                if let Err(e) = api::serve(listener, app_state).await {
                    error!(error = %e, "API server stopped");
                }
            });
        }
    }

    let scheduler = SchedulerBuilder::new(Arc::new(config))
        .query_client(query)
        .dispatcher(dispatcher)
        .health(health_registry)
        .instance(INSTANCE)
        .build()?;

    tokio::select! {
        summary = scheduler.run() => {
            info!(passes = summary.passes, "Scheduler finished");
            logger.log_shutdown("scheduler terminated");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
    }

    Ok(())
}
