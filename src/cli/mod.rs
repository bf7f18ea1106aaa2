//! Command-line interface.
//!
//! Unified CLI for gatewatch operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/gatewatch.toml";

/// Gatewatch - route discovery server for gateway annotations.
#[derive(Parser, Debug)]
#[command(name = "gatewatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch resources and serve route configuration.
    Watch(commands::WatchArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Print the route configuration derived from a manifest.
    Translate(commands::TranslateArgs),
    /// Subscribe to a running server and print what it pushes.
    Probe(commands::ProbeArgs),
}

/// Initialize the tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` takes precedence over `level`.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A second initialisation (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_with_overrides() {
        let cli = Cli::parse_from([
            "gatewatch",
            "--log-level",
            "debug",
            "watch",
            "--bind",
            "127.0.0.1:9000",
            "--manifest",
            "gateways.toml",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(args.manifest.as_deref(), Some("gateways.toml"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_probe_defaults() {
        let cli = Cli::parse_from(["gatewatch", "probe", "--node-id", "envoy-1"]);
        match cli.command {
            Commands::Probe(args) => {
                assert_eq!(args.endpoint, "http://127.0.0.1:9876");
                assert_eq!(args.node_cluster, "probe");
                assert_eq!(args.count, 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
