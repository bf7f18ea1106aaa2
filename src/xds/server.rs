//! Discovery server: registry, version and session set behind one control
//! lock.
//!
//! Lock order is control lock, then the connection manager's lock, then the
//! task table. No lock is held across an await point.

use super::connections::{BroadcastReport, CloseReason, ConnectionManager, SessionId};
use super::proto::{ApiVersion, DiscoveryRequest, DiscoveryResponse};
use super::session::{validate_subscriber, Session};
use crate::control::registry::{RegistrySnapshot, ResourceRegistry};
use crate::control::resource::ResourceEvent;
use crate::control::translate::RouteTranslator;
use crate::core::config::{AnnotationConfig, ServerConfig};
use crate::core::error::{GatewatchError, GatewatchResult};
use crate::ops::metrics::{MetricsSnapshot, ServerMetrics};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Responses buffered between a session loop and the transport.
const OUTBOUND_BUFFER: usize = 2;

/// Response stream handed to the transport for one session.
pub type ResponseStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

/// Operations of the route discovery service contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOperation {
    /// Bidirectional state-of-the-world stream.
    StreamRoutes,
    /// Incremental stream. Not served.
    DeltaRoutes,
    /// Unary fetch. Not served.
    FetchRoutes,
}

impl DiscoveryOperation {
    pub fn method(&self) -> &'static str {
        match self {
            Self::StreamRoutes => "StreamRoutes",
            Self::DeltaRoutes => "DeltaRoutes",
            Self::FetchRoutes => "FetchRoutes",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "StreamRoutes" => Some(Self::StreamRoutes),
            "DeltaRoutes" => Some(Self::DeltaRoutes),
            "FetchRoutes" => Some(Self::FetchRoutes),
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::StreamRoutes)
    }
}

/// Timing and sizing knobs taken from the server configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub queue_depth: usize,
    pub send_timeout: Duration,
    pub handshake_timeout: Duration,
    pub session_grace: Duration,
    pub drain_grace: Duration,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            queue_depth: config.session_buffer,
            send_timeout: config.send_timeout(),
            handshake_timeout: config.handshake_timeout(),
            session_grace: config.session_grace(),
            drain_grace: config.drain_grace(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Point-in-time server statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub version: u64,
    pub resources: usize,
    pub sessions: usize,
    pub shutting_down: bool,
    pub metrics: MetricsSnapshot,
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions told to close.
    pub signalled: usize,
    /// Session tasks still running after the session grace window.
    pub abandoned: usize,
    /// Whether the listener finished within the drain grace window.
    pub listener_drained: bool,
}

/// Registry and version, mutated together.
#[derive(Debug, Default)]
struct ControlState {
    registry: ResourceRegistry,
    version: u64,
}

struct ServerInner {
    control: Mutex<ControlState>,
    connections: Arc<ConnectionManager>,
    translator: RouteTranslator,
    settings: SessionSettings,
    metrics: Arc<ServerMetrics>,
    tasks: Mutex<HashMap<SessionId, JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<GatewatchResult<()>>>>,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// Route discovery server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiscoveryServer {
    inner: Arc<ServerInner>,
}

impl DiscoveryServer {
    pub fn new(translator: RouteTranslator, settings: SessionSettings) -> Self {
        let metrics = Arc::new(ServerMetrics::new());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServerInner {
                control: Mutex::new(ControlState::default()),
                connections: Arc::new(ConnectionManager::new(
                    settings.queue_depth,
                    Arc::clone(&metrics),
                )),
                translator,
                settings,
                metrics,
                tasks: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    /// Build a server from configuration sections.
    pub fn from_config(server: &ServerConfig, annotations: &AnnotationConfig) -> Self {
        Self::new(
            RouteTranslator::new(server.route_config_name.clone(), annotations.clone()),
            SessionSettings::from(server),
        )
    }

    pub fn translator(&self) -> &RouteTranslator {
        &self.inner.translator
    }

    /// Current configuration version.
    pub fn current_version(&self) -> u64 {
        self.inner.control.lock().version
    }

    /// Snapshot of the registry as of now.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.control.lock().registry.snapshot()
    }

    /// Number of sessions in the broadcast group.
    pub fn session_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Receiver that flips to true once the listener should stop.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    pub fn stats(&self) -> ServerStats {
        let (version, resources) = {
            let control = self.inner.control.lock();
            (control.version, control.registry.len())
        };
        ServerStats {
            version,
            resources,
            sessions: self.inner.connections.len(),
            shutting_down: self.is_shutting_down(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    /// Apply a registry change and broadcast the resulting configuration.
    ///
    /// Mutation, version advance, translation and broadcast happen as one
    /// step under the control lock, so every session sees versions in order
    /// and a session registering concurrently observes either the old or the
    /// new registry state, never a mix.
    pub fn notify_change(&self, event: ResourceEvent) -> GatewatchResult<BroadcastReport> {
        if self.is_shutting_down() {
            return Err(GatewatchError::ShuttingDown);
        }

        let mut control = self.inner.control.lock();
        // shutdown closes the manager under this lock.
        if self.inner.connections.is_closed() {
            return Err(GatewatchError::ShuttingDown);
        }
        let key = event.key();
        let kind = event.kind();
        let outcome = control.registry.apply(event);
        let version = control.version + 1;
        let payload = Arc::new(
            self.inner
                .translator
                .translate(&control.registry.snapshot(), version),
        );
        let report = self.inner.connections.broadcast(Arc::clone(&payload))?;
        control.version = version;
        drop(control);

        tracing::info!(
            event = kind,
            resource = %key,
            outcome = ?outcome,
            version,
            virtual_hosts = payload.virtual_host_count(),
            sessions = report.delivered,
            "route configuration updated"
        );
        Ok(report)
    }

    /// Accept a stream: validate its first request, register it, and spawn
    /// its session loop.
    ///
    /// Returns the response stream the transport should drain. Streams whose
    /// first request is invalid, absent or late are rejected without joining
    /// the broadcast group.
    pub async fn open_stream<S>(
        &self,
        api: ApiVersion,
        mut inbound: S,
    ) -> GatewatchResult<(SessionId, ResponseStream)>
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Send + Unpin + 'static,
    {
        if self.is_shutting_down() {
            return Err(GatewatchError::ShuttingDown);
        }

        let first = match tokio::time::timeout(self.inner.settings.handshake_timeout, inbound.next())
            .await
        {
            Ok(Some(Ok(request))) => Ok(request),
            Ok(Some(Err(status))) => Err(GatewatchError::invalid_subscriber(format!(
                "stream failed before first request: {}",
                status.message()
            ))),
            Ok(None) => Err(GatewatchError::invalid_subscriber(
                "stream closed before first request",
            )),
            Err(_) => Err(GatewatchError::invalid_subscriber(
                "no request within handshake timeout",
            )),
        };
        let node = match first.and_then(|request| validate_subscriber(&request, api)) {
            Ok(node) => node,
            Err(e) => {
                self.inner.metrics.subscriber_rejected();
                tracing::warn!(api = %api, error = %e, "rejected discovery stream");
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (id, version) = {
            let control = self.inner.control.lock();
            let payload = Arc::new(
                self.inner
                    .translator
                    .translate(&control.registry.snapshot(), control.version),
            );
            let handle = self.inner.connections.register(node.id.clone(), payload)?;
            let id = handle.id;

            let session = Session::new(
                handle,
                node.clone(),
                api,
                outbound_tx,
                self.inner.settings.send_timeout,
                Arc::clone(&self.inner.connections),
                Arc::clone(&self.inner.metrics),
            );
            let task = tokio::spawn(async move {
                session.run(inbound).await;
            });

            let mut tasks = self.inner.tasks.lock();
            tasks.retain(|_, task| !task.is_finished());
            tasks.insert(id, task);
            (id, control.version)
        };

        tracing::info!(
            session = %id,
            node = %node.id,
            cluster = %node.cluster,
            api = %api,
            version,
            "session streaming"
        );
        Ok((id, ReceiverStream::new(outbound_rx)))
    }

    /// Incremental discovery is part of the contract but not served.
    pub fn delta_routes(&self) -> GatewatchResult<()> {
        Err(self.reject(DiscoveryOperation::DeltaRoutes))
    }

    /// Unary fetch is part of the contract but not served.
    pub fn fetch_routes(&self, _request: &DiscoveryRequest) -> GatewatchResult<DiscoveryResponse> {
        Err(self.reject(DiscoveryOperation::FetchRoutes))
    }

    /// Error for an operation this server does not serve.
    pub fn reject(&self, operation: DiscoveryOperation) -> GatewatchError {
        tracing::debug!(operation = operation.method(), "unsupported discovery operation");
        GatewatchError::unsupported(operation.method())
    }

    /// Serve the discovery services on `listener` in the background.
    ///
    /// The listener stops accepting once [`shutdown`](Self::shutdown) reaches
    /// its drain phase. A listener that fails on its own triggers the shutdown
    /// signal so the owning runtime can stop.
    pub fn spawn_listener(&self, listener: TcpListener) -> GatewatchResult<()> {
        if self.is_shutting_down() {
            return Err(GatewatchError::ShuttingDown);
        }
        let mut slot = self.inner.listener.lock();
        if slot.is_some() {
            return Err(GatewatchError::Internal {
                message: "listener already running".to_string(),
            });
        }

        let server = self.clone();
        *slot = Some(tokio::spawn(async move {
            let shutdown = server.shutdown_receiver();
            let result = super::grpc::serve(server.clone(), listener, shutdown).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "discovery listener failed");
                server.inner.shutdown_tx.send_replace(true);
            }
            result
        }));
        Ok(())
    }

    /// Stop the server.
    ///
    /// Signals every session to close and waits up to the session grace
    /// window for their loops to exit, aborting the rest. Then stops the
    /// listener and waits up to the drain grace window for in-flight writes.
    /// Afterwards no session is active and every broadcast fails. Calling it
    /// again is a no-op.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport {
                listener_drained: true,
                ..Default::default()
            };
        }

        let (signalled, tasks) = {
            let _control = self.inner.control.lock();
            let signalled = self.inner.connections.close_all(CloseReason::Shutdown);
            let tasks: Vec<_> = self.inner.tasks.lock().drain().collect();
            (signalled, tasks)
        };
        tracing::info!(sessions = signalled, "shutting down discovery server");

        let deadline = tokio::time::Instant::now() + self.inner.settings.session_grace;
        let mut abandoned = 0;
        for (id, mut task) in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(session = %id, "session did not exit within grace window, aborting");
                task.abort();
                abandoned += 1;
            }
        }

        self.inner.shutdown_tx.send_replace(true);
        let listener = self.inner.listener.lock().take();
        let listener_drained = match listener {
            Some(mut handle) => {
                match tokio::time::timeout(self.inner.settings.drain_grace, &mut handle).await {
                    Ok(Ok(Ok(()))) => true,
                    Ok(Ok(Err(e))) => {
                        tracing::warn!(error = %e, "listener exited with error");
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "listener task failed");
                        true
                    }
                    Err(_) => {
                        tracing::warn!("listener did not drain within grace window, aborting");
                        handle.abort();
                        false
                    }
                }
            }
            None => true,
        };

        let report = ShutdownReport {
            signalled,
            abandoned,
            listener_drained,
        };
        tracing::info!(?report, "discovery server stopped");
        report
    }
}

impl std::fmt::Debug for DiscoveryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryServer")
            .field("version", &self.current_version())
            .field("connections", &self.inner.connections)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
