//! Per-stream session loop.
//!
//! A session moves through three states:
//!
//! ```text
//! Connecting --(valid first request)--> Streaming --(any exit)--> Closed
//!      |
//!      +--(invalid first request)--> rejected, never registered
//! ```
//!
//! While streaming, the loop waits on four things at once: the client's
//! outbound half going away, the next inbound request (ACK/NACK or end of
//! stream), the manager's quit signal, and the next queued payload. No
//! ordering between them is assumed.

use super::connections::{CloseReason, ConnectionManager, SessionHandle, SessionId};
use super::proto::{ApiVersion, DiscoveryRequest, DiscoveryResponse, Node};
use crate::control::translate::ConfigurationPayload;
use crate::core::error::{GatewatchError, GatewatchResult};
use crate::ops::metrics::ServerMetrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Outbound half of a stream, as consumed by the transport.
pub type ResponseSender = mpsc::Sender<Result<DiscoveryResponse, Status>>;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for and validating the first request.
    Connecting,
    /// Registered and receiving broadcasts.
    Streaming,
    /// Left the active set.
    Closed,
}

/// How a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The client closed its half of the stream or the transport failed.
    ClientClosed,
    /// A write to the client did not complete within the send timeout.
    SendTimeout,
    /// The manager ended the session.
    Closed(CloseReason),
}

impl SessionExit {
    /// Whether the session must remove itself from the active set.
    ///
    /// Manager-initiated exits have already been removed.
    pub fn needs_deregister(&self) -> bool {
        !matches!(self, Self::Closed(_))
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client_closed"),
            Self::SendTimeout => f.write_str("send_timeout"),
            Self::Closed(reason) => write!(f, "closed_by_server({reason})"),
        }
    }
}

/// Validate the first request of a stream.
///
/// A subscriber must identify itself with a node id and cluster, and may
/// only ask for route configuration (or leave the type unset).
pub fn validate_subscriber(request: &DiscoveryRequest, api: ApiVersion) -> GatewatchResult<Node> {
    let node = request
        .node
        .as_ref()
        .ok_or_else(|| GatewatchError::invalid_subscriber("missing node"))?;
    if node.id.is_empty() {
        return Err(GatewatchError::invalid_subscriber("missing node id"));
    }
    if node.cluster.is_empty() {
        return Err(GatewatchError::invalid_subscriber("missing node cluster"));
    }
    if !request.type_url.is_empty() && request.type_url != api.route_type_url() {
        return Err(GatewatchError::invalid_subscriber(format!(
            "unsupported resource type {}",
            request.type_url
        )));
    }
    Ok(node.clone())
}

/// One registered stream.
pub struct Session {
    handle: SessionHandle,
    node: Node,
    api: ApiVersion,
    outbound: ResponseSender,
    send_timeout: Duration,
    connections: Arc<ConnectionManager>,
    metrics: Arc<ServerMetrics>,
    state: SessionState,
    sent: u64,
}

impl Session {
    pub fn new(
        handle: SessionHandle,
        node: Node,
        api: ApiVersion,
        outbound: ResponseSender,
        send_timeout: Duration,
        connections: Arc<ConnectionManager>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            handle,
            node,
            api,
            outbound,
            send_timeout,
            connections,
            metrics,
            state: SessionState::Streaming,
            sent: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until it closes.
    ///
    /// The initial payload queued at registration is written before anything
    /// else. On return the session is no longer in the active set.
    pub async fn run<S>(mut self, mut inbound: S) -> SessionExit
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Unpin,
    {
        let exit = match self.send_initial().await {
            Some(exit) => exit,
            None => self.stream(&mut inbound).await,
        };

        self.state = SessionState::Closed;
        if exit.needs_deregister() {
            self.connections.deregister(self.handle.id);
        }
        if let SessionExit::Closed(reason) = exit {
            let status = match reason {
                CloseReason::SlowConsumer => Status::resource_exhausted("client too slow"),
                _ => Status::unavailable("discovery server closed the stream"),
            };
            // Best effort: a full or closed outbound just ends the stream.
            let _ = self.outbound.try_send(Err(status));
        }

        tracing::info!(
            session = %self.handle.id,
            node = %self.node.id,
            cluster = %self.node.cluster,
            responses = self.sent,
            exit = %exit,
            "session closed"
        );
        exit
    }

    async fn send_initial(&mut self) -> Option<SessionExit> {
        match self.handle.deliveries.try_recv() {
            Ok(payload) => self.forward(&payload).await.err(),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.removed()),
        }
    }

    /// Exit for a session whose delivery queue was dropped by the manager.
    ///
    /// The quit signal is always sent before the queue is dropped.
    fn removed(&mut self) -> SessionExit {
        SessionExit::Closed(self.handle.quit.try_recv().unwrap_or(CloseReason::Removed))
    }

    async fn stream<S>(&mut self, inbound: &mut S) -> SessionExit
    where
        S: Stream<Item = Result<DiscoveryRequest, Status>> + Unpin,
    {
        loop {
            tokio::select! {
                _ = self.outbound.closed() => return SessionExit::ClientClosed,
                request = inbound.next() => match request {
                    Some(Ok(request)) => self.observe(&request),
                    Some(Err(status)) => {
                        tracing::debug!(
                            session = %self.handle.id,
                            code = ?status.code(),
                            "inbound stream failed"
                        );
                        return SessionExit::ClientClosed;
                    }
                    None => return SessionExit::ClientClosed,
                },
                reason = &mut self.handle.quit => {
                    return SessionExit::Closed(reason.unwrap_or(CloseReason::Removed));
                }
                payload = self.handle.deliveries.recv() => match payload {
                    Some(payload) => {
                        if let Err(exit) = self.forward(&payload).await {
                            return exit;
                        }
                    }
                    None => return self.removed(),
                },
            }
        }
    }

    /// Write one payload to the client, bounded by the send timeout.
    async fn forward(&mut self, payload: &ConfigurationPayload) -> Result<(), SessionExit> {
        self.sent += 1;
        let nonce = format!("{}-{}", self.handle.id.0, self.sent);
        let response = payload.to_response(self.api, nonce);

        match tokio::time::timeout(self.send_timeout, self.outbound.send(Ok(response))).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    session = %self.handle.id,
                    version = payload.version(),
                    virtual_hosts = payload.virtual_host_count(),
                    "route configuration sent"
                );
                Ok(())
            }
            Ok(Err(_)) => Err(SessionExit::ClientClosed),
            Err(_) => {
                tracing::warn!(
                    session = %self.handle.id,
                    node = %self.node.id,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "send to client timed out"
                );
                self.metrics.send_timeout();
                Err(SessionExit::SendTimeout)
            }
        }
    }

    fn observe(&self, request: &DiscoveryRequest) {
        if request.is_nack() {
            let detail = request
                .error_detail
                .as_ref()
                .map(|status| status.message.as_str())
                .unwrap_or_default();
            self.metrics.nack();
            tracing::warn!(
                session = %self.handle.id,
                node = %self.node.id,
                version = %request.version_info,
                nonce = %request.response_nonce,
                error = %detail,
                "client rejected route configuration"
            );
        } else {
            tracing::debug!(
                session = %self.handle.id,
                version = %request.version_info,
                nonce = %request.response_nonce,
                "client acknowledged route configuration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::registry::RegistrySnapshot;
    use crate::control::translate::RouteTranslator;
    use crate::xds::proto::{RpcStatus, ROUTE_TYPE_URL_V2, ROUTE_TYPE_URL_V3};
    use tokio_stream::wrappers::ReceiverStream;

    fn request(id: &str, cluster: &str, type_url: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            node: Some(Node {
                id: id.to_string(),
                cluster: cluster.to_string(),
            }),
            type_url: type_url.to_string(),
            ..Default::default()
        }
    }

    fn payload(version: u64) -> Arc<ConfigurationPayload> {
        Arc::new(RouteTranslator::default().translate(&RegistrySnapshot::default(), version))
    }

    struct Harness {
        connections: Arc<ConnectionManager>,
        inbound_tx: mpsc::Sender<Result<DiscoveryRequest, Status>>,
        outbound_rx: mpsc::Receiver<Result<DiscoveryResponse, Status>>,
        task: tokio::task::JoinHandle<SessionExit>,
        id: SessionId,
    }

    fn spawn_session(depth: usize, outbound_depth: usize, send_timeout: Duration) -> Harness {
        let metrics = Arc::new(ServerMetrics::new());
        let connections = Arc::new(ConnectionManager::new(depth, Arc::clone(&metrics)));
        let handle = connections.register("node-a", payload(0)).unwrap();
        let id = handle.id;
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_depth);
        let (inbound_tx, inbound_rx) = mpsc::channel(4);

        let session = Session::new(
            handle,
            Node {
                id: "node-a".to_string(),
                cluster: "edge".to_string(),
            },
            ApiVersion::V2,
            outbound_tx,
            send_timeout,
            Arc::clone(&connections),
            metrics,
        );
        let task = tokio::spawn(session.run(ReceiverStream::new(inbound_rx)));
        Harness {
            connections,
            inbound_tx,
            outbound_rx,
            task,
            id,
        }
    }

    #[test]
    fn test_validate_subscriber() {
        assert!(validate_subscriber(&request("n", "c", ""), ApiVersion::V2).is_ok());
        assert!(validate_subscriber(&request("n", "c", ROUTE_TYPE_URL_V2), ApiVersion::V2).is_ok());
        assert!(validate_subscriber(&request("n", "c", ROUTE_TYPE_URL_V3), ApiVersion::V3).is_ok());

        for bad in [
            request("", "c", ""),
            request("n", "", ""),
            request("n", "c", ROUTE_TYPE_URL_V3),
            DiscoveryRequest::default(),
        ] {
            let err = validate_subscriber(&bad, ApiVersion::V2).unwrap_err();
            assert!(matches!(err, GatewatchError::InvalidSubscriber { .. }));
        }
    }

    #[tokio::test]
    async fn test_initial_payload_sent_first() {
        let mut harness = spawn_session(4, 4, Duration::from_secs(1));
        let first = harness.outbound_rx.recv().await.unwrap().unwrap();
        assert_eq!(first.version_info, "0");
        assert_eq!(first.type_url, ROUTE_TYPE_URL_V2);
        assert!(!first.nonce.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_forwarded_with_fresh_nonce() {
        let mut harness = spawn_session(4, 4, Duration::from_secs(1));
        let first = harness.outbound_rx.recv().await.unwrap().unwrap();

        harness.connections.broadcast(payload(1)).unwrap();
        let second = harness.outbound_rx.recv().await.unwrap().unwrap();
        assert_eq!(second.version_info, "1");
        assert_ne!(first.nonce, second.nonce);
    }

    #[tokio::test]
    async fn test_client_end_of_stream_deregisters() {
        let mut harness = spawn_session(4, 4, Duration::from_secs(1));
        harness.outbound_rx.recv().await.unwrap().unwrap();

        drop(harness.inbound_tx);
        let exit = harness.task.await.unwrap();
        assert_eq!(exit, SessionExit::ClientClosed);
        assert!(!harness.connections.contains(harness.id));
    }

    #[tokio::test]
    async fn test_outbound_dropped_deregisters() {
        let harness = spawn_session(4, 4, Duration::from_secs(1));
        drop(harness.outbound_rx);
        let exit = harness.task.await.unwrap();
        assert_eq!(exit, SessionExit::ClientClosed);
        assert!(!harness.connections.contains(harness.id));
    }

    #[tokio::test]
    async fn test_nack_keeps_session_open() {
        let mut harness = spawn_session(4, 4, Duration::from_secs(1));
        harness.outbound_rx.recv().await.unwrap().unwrap();

        let nack = DiscoveryRequest {
            error_detail: Some(RpcStatus {
                code: 3,
                message: "bad route".to_string(),
            }),
            ..request("node-a", "edge", ROUTE_TYPE_URL_V2)
        };
        harness.inbound_tx.send(Ok(nack)).await.unwrap();

        harness.connections.broadcast(payload(1)).unwrap();
        let next = harness.outbound_rx.recv().await.unwrap().unwrap();
        assert_eq!(next.version_info, "1");
        assert!(harness.connections.contains(harness.id));
    }

    #[tokio::test]
    async fn test_shutdown_signal_ends_stream_with_status() {
        let mut harness = spawn_session(4, 4, Duration::from_secs(1));
        harness.outbound_rx.recv().await.unwrap().unwrap();

        harness.connections.close_all(CloseReason::Shutdown);
        let exit = harness.task.await.unwrap();
        assert_eq!(exit, SessionExit::Closed(CloseReason::Shutdown));

        let status = harness.outbound_rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn test_stalled_client_hits_send_timeout() {
        // Outbound holds one response; the client never reads.
        let harness = spawn_session(4, 1, Duration::from_millis(50));
        harness.connections.broadcast(payload(1)).unwrap();

        let exit = harness.task.await.unwrap();
        assert_eq!(exit, SessionExit::SendTimeout);
        assert!(!harness.connections.contains(harness.id));
        drop(harness.outbound_rx);
    }
}
