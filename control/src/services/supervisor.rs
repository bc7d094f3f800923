use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::services::node_registry::NodeRegistry;

impl NodeRegistry {
    /// Background task that re-dials every unavailable node on a fixed interval
    pub(crate) fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let period = registry.settings.supervisor_interval;
            info!("Starting node supervisor (every {:?})", period);

            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = registry.shutdown.cancelled() => {
                        info!("Node supervisor shutting down");
                        break;
                    }

                    _ = tick.tick() => {
                        let count = registry.supervise_once();
                        if count > 0 {
                            info!("Reconnecting {} unavailable node(s)", count);
                        }
                    }
                }
            }

            debug!("Node supervisor task completed");
        })
    }

    /// One supervisor pass. Trusts each handle's `available` flag rather than
    /// pinging; returns how many new connection attempts were started. Nodes
    /// whose previous attempt is still in flight are not counted.
    pub fn supervise_once(&self) -> usize {
        let mut reconnected = 0;

        for handle in self.nodes() {
            if handle.is_available() {
                continue;
            }

            let config = handle.config();
            warn!(
                "Daemon unavailable: {} {}:{}, reconnecting...",
                config.remarks, config.ip, config.port
            );
            if handle.connect() {
                reconnected += 1;
            }
        }

        reconnected
    }
}
