//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = crate::cli::DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Print the effective configuration, defaults filled in.
    Show {
        /// Config file path. Missing files show the defaults.
        #[arg(short, long, default_value = crate::cli::DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Write a configuration template with every default spelled out.
    Generate {
        /// Output file path. Prints to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = Config::from_file(path)?;
    println!("✓ Configuration is valid");
    println!("  bind: {}", config.server.bind);
    println!("  route_config_name: {}", config.server.route_config_name);
    match &config.source.manifest {
        Some(manifest) => println!("  manifest: {}", manifest),
        None => println!("  ⚠ Warning: source.manifest not set, registry starts and stays empty"),
    }
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::load_or_default(path)?;
    println!("{}", render(&config, format)?);
    Ok(())
}

fn render(config: &Config, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(config).context("failed to render JSON"),
        "toml" => toml::to_string_pretty(config).context("failed to render TOML"),
        other => anyhow::bail!("unknown format {:?}, expected toml or json", other),
    }
}

fn generate_config(output: Option<&Path>) -> Result<()> {
    let template = template()?;
    match output {
        Some(path) => {
            std::fs::write(path, &template)
                .with_context(|| format!("failed to write {:?}", path))?;
            println!("Generated config template: {:?}", path);
        }
        None => println!("{}", template),
    }
    Ok(())
}

fn template() -> Result<String> {
    Ok(format!(
        "# Gatewatch configuration\n\n{}",
        render(&Config::default(), "toml")?
    ))
}
