//! Configuration parsing and validation.
//!
//! Gatewatch configuration is loaded from a TOML file with CLI overrides.
//! Every section is optional; an empty file yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level gatewatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Discovery server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Annotation keys read from routing resources.
    #[serde(default)]
    pub annotations: AnnotationConfig,

    /// Resource source configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Discovery server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the gRPC listener.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Name of the route configuration sent to clients.
    ///
    /// Must match `route_config_name` in the proxies' RDS configuration.
    #[serde(default = "default_route_config_name")]
    pub route_config_name: String,

    /// Capacity of each session's delivery channel.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,

    /// Upper bound for writing one response to a client stream.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// How long a new stream may take to send its first request.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Grace window for sessions to exit after the shutdown signal.
    #[serde(default = "default_session_grace_ms")]
    pub session_grace_ms: u64,

    /// Grace window for in-flight sends after the listener stops.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            route_config_name: default_route_config_name(),
            session_buffer: default_session_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            session_grace_ms: default_session_grace_ms(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl ServerConfig {
    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid server.bind address: {}", self.bind))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn session_grace(&self) -> Duration {
        Duration::from_millis(self.session_grace_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Annotation keys that select routing data on a resource.
///
/// The defaults are shared with existing gateway manifests and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Comma-separated external hostnames.
    #[serde(default = "default_hostname_annotation")]
    pub hostname: String,

    /// Target cluster name.
    #[serde(default = "default_cluster_annotation")]
    pub cluster: String,

    /// Optional path prefix.
    #[serde(default = "default_prefix_annotation")]
    pub prefix: String,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname_annotation(),
            cluster: default_cluster_annotation(),
            prefix: default_prefix_annotation(),
        }
    }
}

/// Resource source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Manifest file listing routing resources.
    #[serde(default)]
    pub manifest: Option<String>,

    /// Interval between manifest re-lists.
    #[serde(default = "default_resync_interval_ms")]
    pub resync_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            manifest: None,
            resync_interval_ms: default_resync_interval_ms(),
        }
    }
}

impl SourceConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_bind() -> String {
    "0.0.0.0:9876".to_string()
}

fn default_route_config_name() -> String {
    "rds_config_name".to_string()
}

fn default_session_buffer() -> usize {
    16
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_session_grace_ms() -> u64 {
    100
}

fn default_drain_grace_ms() -> u64 {
    1_000
}

fn default_hostname_annotation() -> String {
    "stoakes.github.com/hostname".to_string()
}

fn default_cluster_annotation() -> String {
    "stoakes.github.com/cluster".to_string()
}

fn default_prefix_annotation() -> String {
    "stoakes.github.com/prefix".to_string()
}

fn default_resync_interval_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(ref manifest) = overrides.manifest {
            self.source.manifest = Some(manifest.clone());
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_annotations()?;
        self.validate_source()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        self.server.bind_addr()?;

        if self.server.route_config_name.is_empty() {
            anyhow::bail!("server.route_config_name must not be empty");
        }
        if self.server.session_buffer == 0 {
            anyhow::bail!("server.session_buffer must be > 0");
        }
        if self.server.send_timeout_ms == 0 {
            anyhow::bail!("server.send_timeout_ms must be > 0");
        }
        if self.server.handshake_timeout_ms == 0 {
            anyhow::bail!("server.handshake_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_annotations(&self) -> Result<()> {
        let keys = [
            ("annotations.hostname", &self.annotations.hostname),
            ("annotations.cluster", &self.annotations.cluster),
            ("annotations.prefix", &self.annotations.prefix),
        ];
        for (name, key) in keys {
            if key.is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        Ok(())
    }

    fn validate_source(&self) -> Result<()> {
        if self.source.resync_interval_ms == 0 {
            anyhow::bail!("source.resync_interval_ms must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override gRPC bind address.
    pub bind: Option<String>,
    /// Override manifest path.
    pub manifest: Option<String>,
}
