//! Command-line arguments

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Plain text lines (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Forwards Prometheus query results to the Machinist ingestion endpoint
#[derive(Debug, Parser)]
#[command(name = "machinist-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Print each batch to stdout once instead of sending it, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Serve /healthz, /readyz and /metrics on this address (live mode only)
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::try_parse_from(["machinist-agent", "-c", "agent.yaml"]).unwrap();

        assert_eq!(cli.config, PathBuf::from("agent.yaml"));
        assert!(!cli.dry_run);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.listen.is_none());
    }

    #[test]
    fn test_parse_all_flags() {
        let cli = Cli::try_parse_from([
            "machinist-agent",
            "--config",
            "/etc/machinist/agent.yaml",
            "--dry-run",
            "--log-format",
            "json",
            "--listen",
            "127.0.0.1:9100",
        ])
        .unwrap();

        assert!(cli.dry_run);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.listen, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn test_config_is_required() {
        let err = Cli::try_parse_from(["machinist-agent", "--dry-run"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["machinist-agent", "-c", "a.yaml", "--log-format", "xml"]).is_err());
    }
}
