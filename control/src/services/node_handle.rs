use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::services::transport::NodeTransport;
use crate::types::{NodeConfig, NodeView};

/// One remote daemon: its config plus the live connection state.
///
/// The handle owns its own `available` transitions. A spawned connection task
/// performs the handshake and then keeps pinging until the daemon stops
/// answering, at which point the node is marked unavailable and the task ends.
pub struct NodeHandle {
    uuid: String,
    config: RwLock<NodeConfig>,
    available: AtomicBool,
    // Unix seconds, 0 = never connected
    last_connected_at: AtomicI64,
    transport: Arc<dyn NodeTransport>,
    keepalive: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    // Set once the node left the fleet; a retired handle never connects again
    retired: AtomicBool,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("uuid", &self.uuid)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl NodeHandle {
    pub fn new(config: NodeConfig, transport: Arc<dyn NodeTransport>, keepalive: Duration) -> Self {
        Self {
            uuid: config.uuid.clone(),
            config: RwLock::new(config),
            available: AtomicBool::new(false),
            last_connected_at: AtomicI64::new(0),
            transport,
            keepalive,
            task: Mutex::new(None),
            retired: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn config(&self) -> NodeConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_config(&self, config: NodeConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn last_connected_at(&self) -> Option<i64> {
        match self.last_connected_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn view(&self) -> NodeView {
        let config = self.config();
        NodeView {
            uuid: config.uuid,
            ip: config.ip,
            port: config.port,
            api_key: config.api_key,
            remarks: config.remarks,
            available: self.is_available(),
            last_connected_at: self.last_connected_at(),
        }
    }

    /// Start a connection attempt in the background.
    ///
    /// Never blocks and never fails; the outcome is only visible through
    /// [`NodeHandle::is_available`]. Returns whether a new attempt was
    /// started, which is not the case while an attempt or keepalive loop is
    /// already running or after the handle was retired.
    pub fn connect(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_retired() {
            debug!("Not connecting retired node {}", self.uuid);
            return false;
        }
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Connection task already running for node {}", self.uuid);
            return false;
        }

        let handle = Arc::clone(self);
        *task = Some(tokio::spawn(handle.run_connection()));
        true
    }

    /// Tear down the connection task and mark the node unavailable.
    pub fn disconnect(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.available.store(false, Ordering::SeqCst);
        debug!("Disconnected node {}", self.uuid);
    }

    /// Drop the current session and dial again with the current config.
    pub fn reconnect(self: &Arc<Self>) {
        self.disconnect();
        self.connect();
    }

    /// Disconnect for good. Called when the node is removed from the fleet so
    /// that callers still holding the handle cannot revive it.
    pub(crate) fn retire(&self) {
        {
            let _task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            self.retired.store(true, Ordering::SeqCst);
        }
        self.disconnect();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    async fn run_connection(self: Arc<Self>) {
        let config = self.config();

        if let Err(e) = self.transport.handshake(&config).await {
            self.available.store(false, Ordering::Release);
            warn!(
                "Failed to connect to daemon {} ({}:{}): {:#}",
                self.uuid, config.ip, config.port, e
            );
            return;
        }

        self.last_connected_at
            .store(time::OffsetDateTime::now_utc().unix_timestamp(), Ordering::Relaxed);
        self.available.store(true, Ordering::SeqCst);
        if self.is_retired() {
            self.available.store(false, Ordering::SeqCst);
            return;
        }
        info!(
            "Connected to daemon {} ({}:{})",
            self.uuid, config.ip, config.port
        );

        loop {
            tokio::time::sleep(self.keepalive).await;

            let config = self.config();
            match self.transport.ping(&config).await {
                Ok(()) => debug!("Keepalive ok for node {}", self.uuid),
                Err(e) => {
                    self.available.store(false, Ordering::Release);
                    warn!(
                        "Lost connection to daemon {} ({}:{}): {:#}",
                        self.uuid, config.ip, config.port, e
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    /// Transport that succeeds for every address except the ones marked down.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub down: Mutex<HashSet<String>>,
        pub handshakes: Mutex<Vec<String>>,
        pub pings: AtomicUsize,
    }

    impl FakeTransport {
        pub fn set_down(&self, ip: &str, down: bool) {
            let mut set = self.down.lock().unwrap();
            if down {
                set.insert(ip.to_string());
            } else {
                set.remove(ip);
            }
        }

        pub fn handshakes_for(&self, ip: &str) -> usize {
            self.handshakes.lock().unwrap().iter().filter(|h| *h == ip).count()
        }

        fn check(&self, config: &NodeConfig) -> Result<()> {
            if self.down.lock().unwrap().contains(&config.ip) {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NodeTransport for FakeTransport {
        async fn handshake(&self, config: &NodeConfig) -> Result<()> {
            self.handshakes.lock().unwrap().push(config.ip.clone());
            self.check(config)
        }

        async fn ping(&self, config: &NodeConfig) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            self.check(config)
        }
    }

    /// Poll until `cond` holds, yielding to spawned tasks in between.
    pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn handle(ip: &str, transport: Arc<FakeTransport>, keepalive: Duration) -> Arc<NodeHandle> {
        let config = NodeConfig {
            ip: ip.to_string(),
            ..NodeConfig::new(format!("node-{}", ip))
        };
        Arc::new(NodeHandle::new(config, transport, keepalive))
    }

    #[tokio::test]
    async fn test_connect_marks_available() {
        let transport = Arc::new(FakeTransport::default());
        let node = handle("10.0.0.1", transport.clone(), Duration::from_secs(3600));

        assert!(!node.is_available());
        node.connect();
        wait_for(|| node.is_available()).await;

        assert!(node.last_connected_at().is_some());
        assert_eq!(transport.handshakes_for("10.0.0.1"), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_stays_unavailable() {
        let transport = Arc::new(FakeTransport::default());
        transport.set_down("10.0.0.1", true);
        let node = handle("10.0.0.1", transport.clone(), Duration::from_secs(3600));

        node.connect();
        wait_for(|| transport.handshakes_for("10.0.0.1") == 1).await;

        assert!(!node.is_available());
        assert!(node.last_connected_at().is_none());
    }

    #[tokio::test]
    async fn test_connect_is_noop_while_running() {
        let transport = Arc::new(FakeTransport::default());
        let node = handle("10.0.0.1", transport.clone(), Duration::from_secs(3600));

        node.connect();
        wait_for(|| node.is_available()).await;
        node.connect();
        node.connect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(transport.handshakes_for("10.0.0.1"), 1);
    }

    #[tokio::test]
    async fn test_failed_ping_marks_unavailable() {
        let transport = Arc::new(FakeTransport::default());
        let node = handle("10.0.0.1", transport.clone(), Duration::from_millis(10));

        node.connect();
        wait_for(|| node.is_available()).await;

        transport.set_down("10.0.0.1", true);
        wait_for(|| !node.is_available()).await;
        assert!(transport.pings.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_disconnect_clears_availability() {
        let transport = Arc::new(FakeTransport::default());
        let node = handle("10.0.0.1", transport.clone(), Duration::from_secs(3600));

        node.connect();
        wait_for(|| node.is_available()).await;
        node.disconnect();

        assert!(!node.is_available());

        node.connect();
        wait_for(|| node.is_available()).await;
        assert_eq!(transport.handshakes_for("10.0.0.1"), 2);
    }

    #[tokio::test]
    async fn test_connect_reports_whether_attempt_started() {
        let transport = Arc::new(FakeTransport::default());
        let node = handle("10.0.0.1", transport.clone(), Duration::from_secs(3600));

        assert!(node.connect());
        assert!(!node.connect());
        wait_for(|| node.is_available()).await;
        assert!(!node.connect());
    }

    #[tokio::test]
    async fn test_retired_handle_never_connects() {
        let transport = Arc::new(FakeTransport::default());
        let node = handle("10.0.0.1", transport.clone(), Duration::from_secs(3600));

        node.connect();
        wait_for(|| node.is_available()).await;
        node.retire();
        assert!(!node.is_available());

        assert!(!node.connect());
        node.reconnect();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(node.is_retired());
        assert!(!node.is_available());
        assert_eq!(transport.handshakes_for("10.0.0.1"), 1);
    }
}
