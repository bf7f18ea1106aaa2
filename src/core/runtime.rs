//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: discovery listener → resource source
//! - Shutdown order: resource source → discovery server (sessions, then listener)

use crate::core::config::Config;
use crate::source::manifest::ManifestSource;
use crate::source::EventSink;
use crate::xds::grpc::listener_addr;
use crate::xds::server::{DiscoveryServer, ServerStats};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long the resource source gets to notice shutdown.
const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is not configured.
    Disabled,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Discovery listener health.
    pub listener: ComponentHealth,
    /// Resource source health.
    pub source: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            listener: ComponentHealth::Starting,
            source: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve streams.
    pub fn is_ready(&self) -> bool {
        self.listener == ComponentHealth::Healthy
            && matches!(
                self.source,
                ComponentHealth::Healthy | ComponentHealth::Disabled
            )
    }
}

/// Gatewatch runtime holding all component handles.
pub struct Runtime {
    config: Arc<Config>,
    server: DiscoveryServer,
    health: RuntimeHealth,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    local_addr: Option<SocketAddr>,
    source_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = DiscoveryServer::from_config(&config.server, &config.annotations);

        Ok(Self {
            config: Arc::new(config),
            server,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            local_addr: None,
            source_handle: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The discovery server driven by this runtime.
    pub fn server(&self) -> &DiscoveryServer {
        &self.server
    }

    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stats(&self) -> ServerStats {
        self.server.stats()
    }

    /// Start the listener and the resource source.
    pub async fn start(&mut self) -> Result<()> {
        let bind = self.config.server.bind_addr()?;
        tracing::info!(%bind, "starting gatewatch runtime");

        let listener = match TcpListener::bind(bind).await {
            Ok(listener) => listener,
            Err(e) => {
                self.health.listener = ComponentHealth::Failed;
                return Err(e)
                    .with_context(|| format!("failed to bind discovery listener on {}", bind));
            }
        };
        let local_addr = listener_addr(&listener)?;
        self.server.spawn_listener(listener)?;
        self.local_addr = Some(local_addr);
        self.health.listener = ComponentHealth::Healthy;
        tracing::info!(%local_addr, "discovery listener started");

        self.start_source();
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn start_source(&mut self) {
        let Some(manifest) = self.config.source.manifest.clone() else {
            tracing::info!("no manifest configured, resource source disabled");
            self.health.source = ComponentHealth::Disabled;
            return;
        };

        let source = ManifestSource::new(manifest, self.config.source.resync_interval());
        let sink: Arc<dyn EventSink> = Arc::new(self.server.clone());
        let shutdown_rx = self.shutdown_rx.clone();
        self.source_handle = Some(tokio::spawn(source.run(sink, shutdown_rx)));
        self.health.source = ComponentHealth::Healthy;
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until ctrl-c, a shutdown request, or listener failure.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut listener_rx = self.server.shutdown_receiver();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = wait_for(&mut shutdown_rx) => {
                tracing::info!("shutdown requested by component");
            }
            _ = wait_for(&mut listener_rx) => {
                self.health.listener = ComponentHealth::Failed;
                tracing::error!("discovery listener stopped unexpectedly");
            }
        }

        self.stop().await
    }

    /// Stop all components: the source first so no change races the
    /// shutdown, then the discovery server.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping gatewatch runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.stop_source().await;

        if self.health.listener != ComponentHealth::Failed {
            self.health.listener = ComponentHealth::Stopping;
        }
        let report = self.server.shutdown().await;
        if self.health.listener != ComponentHealth::Failed {
            self.health.listener = ComponentHealth::Stopped;
        }

        let stats = self.server.stats();
        for (name, value) in stats.metrics.counters() {
            tracing::debug!(metric = name, value, "final counter");
        }
        tracing::info!(
            version = stats.version,
            resources = stats.resources,
            signalled = report.signalled,
            abandoned = report.abandoned,
            "gatewatch runtime stopped"
        );
        Ok(())
    }

    async fn stop_source(&mut self) {
        let Some(handle) = self.source_handle.take() else {
            return;
        };
        self.health.source = ComponentHealth::Stopping;
        match tokio::time::timeout(SOURCE_STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => tracing::debug!("resource source stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "resource source task failed"),
            Err(_) => tracing::warn!("resource source stop timed out"),
        }
        self.health.source = ComponentHealth::Stopped;
    }
}

async fn wait_for(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender gone; never resolve so other select arms decide.
            std::future::pending::<()>().await;
        }
    }
}
