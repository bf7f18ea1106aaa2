//! Gatewatch - unified CLI entrypoint.
//!
//! Usage:
//!   gatewatch watch --config config/gatewatch.toml [--manifest gateways.toml]
//!   gatewatch config validate --config config/gatewatch.toml
//!   gatewatch translate gateways.toml
//!   gatewatch probe --node-id envoy-1 [--endpoint URL]

use anyhow::Result;
use clap::Parser;
use gatewatch::cli::commands::{run_config, run_probe, run_translate, run_watch};
use gatewatch::cli::{Cli, Commands, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.command {
        Commands::Watch(args) => run_watch(&config_path, cli.log_level, args).await,
        Commands::Config(args) => run_config(args),
        Commands::Translate(args) => run_translate(&config_path, args),
        Commands::Probe(args) => run_probe(args).await,
    }
}
