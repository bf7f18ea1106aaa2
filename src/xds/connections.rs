//! Active session set and broadcast fan-out.
//!
//! Every registered session owns a bounded delivery queue. Broadcasts never
//! wait on a session: a payload is either queued immediately or the session is
//! disconnected as a slow consumer. Sessions whose queue is already closed
//! (their loop has exited) are pruned during the broadcast.

use crate::control::translate::ConfigurationPayload;
use crate::core::error::{GatewatchError, GatewatchResult};
use crate::ops::metrics::ServerMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Unique identifier for a discovery session, assigned at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Why the server ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The server is shutting down.
    Shutdown,
    /// The session's delivery queue was full during a broadcast.
    SlowConsumer,
    /// Removed from the active set without an explicit reason.
    Removed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::SlowConsumer => "slow_consumer",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manager-side half of a session.
struct SessionEntry {
    node_id: String,
    sender: mpsc::Sender<Arc<ConfigurationPayload>>,
    quit: oneshot::Sender<CloseReason>,
}

impl SessionEntry {
    fn signal(self, reason: CloseReason) {
        // The session may already be gone; nothing to do then.
        let _ = self.quit.send(reason);
    }
}

/// Session-side half returned by [`ConnectionManager::register`].
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Payloads queued for this session, oldest first.
    pub deliveries: mpsc::Receiver<Arc<ConfigurationPayload>>,
    /// Fires when the manager ends the session.
    pub quit: oneshot::Receiver<CloseReason>,
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions that had the payload queued.
    pub delivered: usize,
    /// Sessions disconnected because their queue was full.
    pub disconnected: usize,
    /// Sessions pruned because they had already exited.
    pub pruned: usize,
}

#[derive(Default)]
struct ManagerState {
    sessions: HashMap<SessionId, SessionEntry>,
    closed: bool,
}

/// Tracks active sessions and fans configuration out to them.
pub struct ConnectionManager {
    state: Mutex<ManagerState>,
    next_id: AtomicU64,
    queue_depth: usize,
    metrics: Arc<ServerMetrics>,
}

impl ConnectionManager {
    /// Create a manager whose sessions buffer up to `queue_depth` payloads.
    pub fn new(queue_depth: usize, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            metrics,
        }
    }

    /// Register a session, queueing `initial` ahead of any broadcast.
    ///
    /// The initial payload and the insertion happen under the same lock, so a
    /// concurrent broadcast either precedes the registration (and the caller's
    /// `initial` already reflects it) or lands after `initial` in the queue.
    pub fn register(
        &self,
        node_id: impl Into<String>,
        initial: Arc<ConfigurationPayload>,
    ) -> GatewatchResult<SessionHandle> {
        let (sender, deliveries) = mpsc::channel(self.queue_depth);
        let (quit_tx, quit) = oneshot::channel();

        let mut state = self.state.lock();
        if state.closed {
            return Err(GatewatchError::ShuttingDown);
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        sender
            .try_send(initial)
            .map_err(|_| GatewatchError::Internal {
                message: format!("initial payload rejected by fresh queue for {id}"),
            })?;

        let node_id = node_id.into();
        tracing::debug!(session = %id, node = %node_id, "session registered");
        state.sessions.insert(
            id,
            SessionEntry {
                node_id,
                sender,
                quit: quit_tx,
            },
        );
        self.metrics.session_opened();
        self.metrics.delivered();

        Ok(SessionHandle {
            id,
            deliveries,
            quit,
        })
    }

    /// Remove a session. Returns false if it was not registered.
    pub fn deregister(&self, id: SessionId) -> bool {
        let removed = self.state.lock().sessions.remove(&id);
        match removed {
            Some(entry) => {
                tracing::debug!(session = %id, node = %entry.node_id, "session deregistered");
                self.metrics.session_closed();
                true
            }
            None => false,
        }
    }

    /// Queue `payload` for every registered session without blocking.
    ///
    /// Fails only once the manager is closed.
    pub fn broadcast(&self, payload: Arc<ConfigurationPayload>) -> GatewatchResult<BroadcastReport> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(GatewatchError::ShuttingDown);
        }

        let mut report = BroadcastReport::default();
        let mut evicted = Vec::new();

        for (id, entry) in state.sessions.iter() {
            match entry.sender.try_send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        session = %id,
                        node = %entry.node_id,
                        version = payload.version(),
                        "delivery queue full, disconnecting slow consumer"
                    );
                    evicted.push((*id, CloseReason::SlowConsumer));
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(session = %id, "session already exited, pruning");
                    evicted.push((*id, CloseReason::Removed));
                }
            }
        }

        for (id, reason) in evicted {
            if let Some(entry) = state.sessions.remove(&id) {
                match reason {
                    CloseReason::SlowConsumer => {
                        report.disconnected += 1;
                        self.metrics.slow_consumer_disconnect();
                    }
                    _ => report.pruned += 1,
                }
                self.metrics.session_closed();
                entry.signal(reason);
            }
        }
        drop(state);

        self.metrics.broadcast(report.delivered as u64);
        tracing::debug!(
            version = payload.version(),
            delivered = report.delivered,
            disconnected = report.disconnected,
            pruned = report.pruned,
            "broadcast complete"
        );
        Ok(report)
    }

    /// Close the manager and signal every session with `reason`.
    ///
    /// Afterwards registration and broadcast fail. Returns the number of
    /// sessions signalled.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.sessions.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(session = %id, reason = %reason, "signalling session");
            self.metrics.session_closed();
            entry.signal(reason);
        }
        count
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.state.lock().sessions.contains_key(&id)
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionManager")
            .field("sessions", &state.sessions.len())
            .field("closed", &state.closed)
            .field("queue_depth", &self.queue_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::registry::RegistrySnapshot;
    use crate::control::translate::RouteTranslator;

    fn payload(version: u64) -> Arc<ConfigurationPayload> {
        Arc::new(RouteTranslator::default().translate(&RegistrySnapshot::default(), version))
    }

    fn manager(depth: usize) -> ConnectionManager {
        ConnectionManager::new(depth, Arc::new(ServerMetrics::new()))
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(7).to_string(), "session-7");
    }

    #[test]
    fn test_register_queues_initial_payload() {
        let manager = manager(4);
        let mut handle = manager.register("node-a", payload(3)).unwrap();
        assert!(manager.contains(handle.id));
        assert_eq!(handle.deliveries.try_recv().unwrap().version(), 3);
    }

    #[test]
    fn test_ids_are_unique() {
        let manager = manager(4);
        let a = manager.register("node", payload(0)).unwrap();
        let b = manager.register("node", payload(0)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let manager = manager(4);
        let handle = manager.register("node", payload(0)).unwrap();
        assert!(manager.deregister(handle.id));
        assert!(!manager.deregister(handle.id));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_session_in_order() {
        let manager = manager(4);
        let mut a = manager.register("a", payload(0)).unwrap();
        let mut b = manager.register("b", payload(0)).unwrap();

        let report = manager.broadcast(payload(1)).unwrap();
        assert_eq!(report.delivered, 2);

        for handle in [&mut a, &mut b] {
            assert_eq!(handle.deliveries.try_recv().unwrap().version(), 0);
            assert_eq!(handle.deliveries.try_recv().unwrap().version(), 1);
            assert!(handle.deliveries.try_recv().is_err());
        }
    }

    #[test]
    fn test_full_queue_disconnects_slow_consumer() {
        let manager = manager(1);
        let mut slow = manager.register("slow", payload(0)).unwrap();

        // Queue holds the initial payload, so the next broadcast overflows.
        let report = manager.broadcast(payload(1)).unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.disconnected, 1);
        assert!(!manager.contains(slow.id));
        assert_eq!(slow.quit.try_recv().unwrap(), CloseReason::SlowConsumer);
    }

    #[test]
    fn test_exited_session_is_pruned() {
        let manager = manager(4);
        let handle = manager.register("gone", payload(0)).unwrap();
        let id = handle.id;
        drop(handle);

        let report = manager.broadcast(payload(1)).unwrap();
        assert_eq!(report.pruned, 1);
        assert!(!manager.contains(id));
    }

    #[test]
    fn test_close_all_signals_and_refuses_further_work() {
        let manager = manager(4);
        let mut a = manager.register("a", payload(0)).unwrap();

        assert_eq!(manager.close_all(CloseReason::Shutdown), 1);
        assert_eq!(a.quit.try_recv().unwrap(), CloseReason::Shutdown);
        assert!(manager.is_empty());
        assert!(manager.is_closed());

        assert!(matches!(
            manager.broadcast(payload(1)),
            Err(GatewatchError::ShuttingDown)
        ));
        assert!(matches!(
            manager.register("b", payload(1)),
            Err(GatewatchError::ShuttingDown)
        ));
    }
}
