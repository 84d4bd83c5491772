//! Health monitor implementation

use crate::event::HealthEvent;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stripestore_client::BlockTransport;
use stripestore_common::{Error, NodeId, NodeStatus, Result, SystemStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cached liveness state for one node
#[derive(Clone, Debug)]
pub struct NodeState {
    pub node_id: NodeId,
    pub endpoint: String,
    pub status: NodeStatus,
    /// Last successful probe
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Latency of the last successful probe
    pub response_time: Option<Duration>,
    /// Consecutive failed probes
    pub error_count: u32,
    /// When the node went offline (cleared on recovery)
    pub offline_since: Option<DateTime<Utc>>,
}

impl NodeState {
    fn new(node_id: NodeId, endpoint: String) -> Self {
        Self {
            node_id,
            endpoint,
            status: NodeStatus::Unknown,
            last_heartbeat: None,
            response_time: None,
            error_count: 0,
            offline_since: None,
        }
    }

    /// Derived health: online, not error-ridden, heartbeat not stale
    #[must_use]
    pub fn is_healthy(&self, stale_after: Duration) -> bool {
        if self.status != NodeStatus::Online || self.error_count >= 5 {
            return false;
        }
        match self.last_heartbeat {
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map(|a| a < stale_after).unwrap_or(true)
            }
            None => false,
        }
    }
}

/// Availability totals plus the derived system status
#[derive(Clone, Copy, Debug)]
pub struct AvailabilityStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub unknown: usize,
    pub status: SystemStatus,
}

struct MonitoredNode {
    transport: Arc<dyn BlockTransport>,
    endpoint: String,
    /// Serializes probe/update/emit per node so edge events cannot interleave
    serial: tokio::sync::Mutex<()>,
}

struct Ticker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Periodically probes every node and maintains the cluster's liveness map.
///
/// Foreground requests read the cached map; probes never sit on their path.
pub struct HealthMonitor {
    nodes: HashMap<NodeId, MonitoredNode>,
    states: RwLock<HashMap<NodeId, NodeState>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<HealthEvent>>>,
    stale_after: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl HealthMonitor {
    /// Create a monitor over the given transports.
    ///
    /// `stale_after` is the heartbeat-age threshold feeding `is_healthy`.
    #[must_use]
    pub fn new(
        transports: Vec<(Arc<dyn BlockTransport>, String)>,
        stale_after: Duration,
    ) -> Self {
        let mut nodes = HashMap::new();
        let mut states = HashMap::new();
        for (transport, endpoint) in transports {
            let node_id = transport.node_id();
            states.insert(node_id, NodeState::new(node_id, endpoint.clone()));
            nodes.insert(
                node_id,
                MonitoredNode {
                    transport,
                    endpoint,
                    serial: tokio::sync::Mutex::new(()),
                },
            );
        }
        Self {
            nodes,
            states: RwLock::new(states),
            subscribers: Mutex::new(Vec::new()),
            stale_after,
            ticker: Mutex::new(None),
        }
    }

    /// Subscribe to the event stream. Each subscriber gets every event from
    /// the moment of subscription on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HealthEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Probe one node, update its cached state, emit on edge transitions
    pub async fn check_node(&self, node_id: NodeId) -> Result<NodeState> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| Error::validation(format!("unknown node {node_id}")))?;
        let _serial = node.serial.lock().await;

        let started = Instant::now();
        let probe = node.transport.health().await;
        let elapsed = started.elapsed();
        let now = Utc::now();

        let (event, snapshot) = {
            let mut states = self.states.write();
            let state = states
                .get_mut(&node_id)
                .expect("state exists for every monitored node");

            match probe {
                Ok(_) => {
                    let was = state.status;
                    state.status = NodeStatus::Online;
                    state.last_heartbeat = Some(now);
                    state.response_time = Some(elapsed);
                    state.error_count = 0;
                    let event = if was == NodeStatus::Offline {
                        let downtime = state
                            .offline_since
                            .and_then(|t| now.signed_duration_since(t).to_std().ok())
                            .unwrap_or_default();
                        Some(HealthEvent::NodeRecovery { node_id, downtime })
                    } else {
                        None
                    };
                    state.offline_since = None;
                    (event, state.clone())
                }
                Err(e) => {
                    let was = state.status;
                    state.status = NodeStatus::Offline;
                    state.error_count = state.error_count.saturating_add(1);
                    if state.offline_since.is_none() {
                        state.offline_since = Some(now);
                    }
                    let event = if was == NodeStatus::Online {
                        Some(HealthEvent::NodeFailure {
                            node_id,
                            reason: e.to_string(),
                            last_known: state.last_heartbeat,
                        })
                    } else {
                        None
                    };
                    (event, state.clone())
                }
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }
        Ok(snapshot)
    }

    /// Probe every node concurrently and return the fresh snapshot
    pub async fn check_all(&self) -> HashMap<NodeId, NodeState> {
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        let checks = ids.iter().map(|id| self.check_node(*id));
        join_all(checks).await;
        self.snapshot()
    }

    /// Launch the background ticker. Idempotent: a second call while the
    /// ticker is running is a no-op.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.ticker.lock();
        if let Some(ticker) = guard.as_ref() {
            if !ticker.handle.is_finished() {
                debug!("health ticker already running");
                return;
            }
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_all().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("health ticker stopped");
        });
        info!(interval_secs = interval.as_secs(), "health ticker started");
        *guard = Some(Ticker { handle, shutdown });
    }

    /// Stop the background ticker if it is running
    pub fn stop(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            let _ = ticker.shutdown.send(true);
        }
    }

    /// Current cached state for every node
    #[must_use]
    pub fn snapshot(&self) -> HashMap<NodeId, NodeState> {
        self.states.read().clone()
    }

    /// Cached state for one node
    #[must_use]
    pub fn node_state(&self, node_id: NodeId) -> Option<NodeState> {
        self.states.read().get(&node_id).cloned()
    }

    /// Whether every configured node is currently online
    #[must_use]
    pub fn all_online(&self) -> bool {
        let states = self.states.read();
        !states.is_empty() && states.values().all(|s| s.status == NodeStatus::Online)
    }

    /// Whether one node is currently online
    #[must_use]
    pub fn is_online(&self, node_id: NodeId) -> bool {
        self.states
            .read()
            .get(&node_id)
            .map(|s| s.status == NodeStatus::Online)
            .unwrap_or(false)
    }

    /// Availability totals and the derived system status
    #[must_use]
    pub fn availability_stats(&self) -> AvailabilityStats {
        let states = self.states.read();
        let total = states.len();
        let online = states
            .values()
            .filter(|s| s.status == NodeStatus::Online)
            .count();
        let offline = states
            .values()
            .filter(|s| s.status == NodeStatus::Offline)
            .count();
        let unknown = total - online - offline;
        AvailabilityStats {
            total,
            online,
            offline,
            unknown,
            status: SystemStatus::derive(online, total),
        }
    }

    /// Heartbeat-staleness threshold
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Endpoint of a monitored node
    #[must_use]
    pub fn endpoint(&self, node_id: NodeId) -> Option<&str> {
        self.nodes.get(&node_id).map(|n| n.endpoint.as_str())
    }

    fn emit(&self, event: HealthEvent) {
        match &event {
            HealthEvent::NodeFailure { node_id, reason, .. } => {
                warn!(node = %node_id, %reason, "node failure");
            }
            HealthEvent::NodeRecovery { node_id, downtime } => {
                info!(node = %node_id, downtime_secs = downtime.as_secs(), "node recovery");
            }
        }
        // Drop subscribers whose receiver is gone.
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use stripestore_api::{NodeHealthResponse, NodeInfoResponse, StoreBlockResponse};
    use stripestore_client::{RetrievedBlock, StoreBlock};

    struct FakeNode {
        id: NodeId,
        up: AtomicBool,
    }

    impl FakeNode {
        fn new(id: u8) -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(id),
                up: AtomicBool::new(true),
            })
        }

        fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl BlockTransport for FakeNode {
        fn node_id(&self) -> NodeId {
            self.id
        }

        async fn store_block(&self, _request: &StoreBlock) -> Result<StoreBlockResponse> {
            Err(Error::transport("not a storage fake"))
        }

        async fn retrieve_block(&self, block_id: &str) -> Result<RetrievedBlock> {
            Err(Error::BlockNotFound(block_id.to_string()))
        }

        async fn delete_block(&self, block_id: &str) -> Result<()> {
            Err(Error::BlockNotFound(block_id.to_string()))
        }

        async fn block_exists(&self, _block_id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn list_blocks(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn node_info(&self) -> Result<NodeInfoResponse> {
            Err(Error::transport("not a storage fake"))
        }

        async fn cleanup_orphans(&self) -> Result<usize> {
            Ok(0)
        }

        async fn health(&self) -> Result<NodeHealthResponse> {
            if self.up.load(Ordering::SeqCst) {
                Ok(NodeHealthResponse {
                    node_id: self.id.get(),
                    status: stripestore_api::NodeHealthStatus::Healthy,
                    uptime_secs: 1,
                    error_count: 0,
                })
            } else {
                Err(Error::transport("connection refused"))
            }
        }
    }

    fn monitor_over(fakes: &[Arc<FakeNode>]) -> Arc<HealthMonitor> {
        let transports: Vec<(Arc<dyn BlockTransport>, String)> = fakes
            .iter()
            .map(|f| {
                (
                    f.clone() as Arc<dyn BlockTransport>,
                    format!("http://node{}", f.id),
                )
            })
            .collect();
        Arc::new(HealthMonitor::new(transports, Duration::from_secs(120)))
    }

    #[tokio::test]
    async fn test_probe_updates_state() {
        let fakes = vec![FakeNode::new(1), FakeNode::new(2)];
        let monitor = monitor_over(&fakes);

        let state = monitor.check_node(NodeId::new(1)).await.unwrap();
        assert_eq!(state.status, NodeStatus::Online);
        assert!(state.last_heartbeat.is_some());
        assert!(state.response_time.is_some());
        assert_eq!(state.error_count, 0);
        assert!(state.is_healthy(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_exactly_one_event_per_edge() {
        let fakes = vec![FakeNode::new(1)];
        let monitor = monitor_over(&fakes);
        let mut events = monitor.subscribe();

        // Unknown -> Online: no event.
        monitor.check_node(NodeId::new(1)).await.unwrap();

        // Online -> Offline: one failure event, repeated probes add nothing.
        fakes[0].set_up(false);
        monitor.check_node(NodeId::new(1)).await.unwrap();
        monitor.check_node(NodeId::new(1)).await.unwrap();

        // Offline -> Online: one recovery event.
        fakes[0].set_up(true);
        monitor.check_node(NodeId::new(1)).await.unwrap();
        monitor.check_node(NodeId::new(1)).await.unwrap();

        let first = events.try_recv().unwrap();
        assert!(matches!(first, HealthEvent::NodeFailure { .. }));
        let second = events.try_recv().unwrap();
        assert!(matches!(second, HealthEvent::NodeRecovery { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_to_offline_emits_nothing() {
        let fakes = vec![FakeNode::new(1)];
        fakes[0].set_up(false);
        let monitor = monitor_over(&fakes);
        let mut events = monitor.subscribe();

        let state = monitor.check_node(NodeId::new(1)).await.unwrap();
        assert_eq!(state.status, NodeStatus::Offline);
        assert_eq!(state.error_count, 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_count_accumulates_and_resets() {
        let fakes = vec![FakeNode::new(1)];
        let monitor = monitor_over(&fakes);

        fakes[0].set_up(false);
        for _ in 0..3 {
            monitor.check_node(NodeId::new(1)).await.unwrap();
        }
        assert_eq!(monitor.node_state(NodeId::new(1)).unwrap().error_count, 3);

        fakes[0].set_up(true);
        let state = monitor.check_node(NodeId::new(1)).await.unwrap();
        assert_eq!(state.error_count, 0);
    }

    #[tokio::test]
    async fn test_availability_stats() {
        let fakes = vec![
            FakeNode::new(1),
            FakeNode::new(2),
            FakeNode::new(3),
            FakeNode::new(4),
        ];
        let monitor = monitor_over(&fakes);

        monitor.check_all().await;
        let stats = monitor.availability_stats();
        assert_eq!(stats.online, 4);
        assert_eq!(stats.status, SystemStatus::Operational);
        assert!(monitor.all_online());

        fakes[2].set_up(false);
        monitor.check_all().await;
        let stats = monitor.availability_stats();
        assert_eq!(stats.online, 3);
        assert_eq!(stats.offline, 1);
        assert_eq!(stats.status, SystemStatus::Degraded);
        assert!(!monitor.all_online());

        fakes[0].set_up(false);
        fakes[1].set_up(false);
        monitor.check_all().await;
        assert_eq!(monitor.availability_stats().status, SystemStatus::Critical);
    }

    #[tokio::test]
    async fn test_ticker_start_is_idempotent() {
        let fakes = vec![FakeNode::new(1)];
        let monitor = monitor_over(&fakes);

        monitor.start(Duration::from_millis(10));
        monitor.start(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.is_online(NodeId::new(1)));
        monitor.stop();
    }
}
