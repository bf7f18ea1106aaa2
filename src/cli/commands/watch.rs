//! Watch command implementation.

use crate::cli::init_tracing;
use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::Result;
use clap::Args;
use std::path::Path;

/// Watch resources and serve route configuration.
#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    /// Listener address, overriding `server.bind`.
    #[arg(long)]
    pub bind: Option<String>,

    /// Manifest file, overriding `source.manifest`.
    #[arg(long)]
    pub manifest: Option<String>,
}

/// Load configuration, apply overrides, and run until shutdown.
pub async fn run_watch(config_path: &Path, log_level: Option<String>, args: WatchArgs) -> Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        bind: args.bind,
        manifest: args.manifest,
    });

    init_tracing(&config.telemetry.log_level);
    tracing::info!(
        config = %config_path.display(),
        bind = %config.server.bind,
        route_config_name = %config.server.route_config_name,
        "starting gatewatch"
    );

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
