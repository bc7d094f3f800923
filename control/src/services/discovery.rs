use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::node_handle::NodeHandle;
use crate::services::node_registry::{NodeRegistry, RegistryError};
use crate::types::{LocalDaemonConfig, NodeConfigPatch, DEFAULT_DAEMON_PORT};

const LOCAL_HOST: &str = "localhost";

impl NodeRegistry {
    /// Zero-configuration bootstrap for a daemon running on this host.
    ///
    /// Registers `localhost` with the key and port from the daemon's own
    /// config file, or with `seed_key` on the default port. When neither is
    /// available a background retry is scheduled and `Ok(None)` returned.
    /// The node is managed whether or not it turns out to be reachable.
    pub async fn discover_local(
        self: &Arc<Self>,
        seed_key: Option<&str>,
    ) -> Result<Option<Arc<NodeHandle>>, RegistryError> {
        match self.try_discover(seed_key).await {
            Ok(handle) => Ok(Some(handle)),
            Err(RegistryError::DiscoveryFailed) => {
                warn!(
                    "No local daemon found at {:?}, retrying in {:?}",
                    self.discovery_path(),
                    self.settings.discovery_retry
                );
                self.schedule_discovery_retry();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_discover(&self, seed_key: Option<&str>) -> Result<Arc<NodeHandle>, RegistryError> {
        let path = self.discovery_path();
        info!("Looking for local daemon config at {:?}", path);

        match read_local_daemon_config(&path).await {
            Ok(Some(local)) => {
                info!("Found local daemon on port {}", local.port);
                return self.register(local_patch(local.key, local.port)).await;
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring local daemon config {:?}: {:#}", path, e),
        }

        if let Some(key) = seed_key.filter(|k| !k.is_empty()) {
            info!("Registering local daemon with supplied key on port {}", DEFAULT_DAEMON_PORT);
            return self.register(local_patch(key.to_string(), DEFAULT_DAEMON_PORT)).await;
        }

        Err(RegistryError::DiscoveryFailed)
    }

    /// Keep retrying discovery until the fleet is non-empty. At most one
    /// retry chain runs at a time.
    fn schedule_discovery_retry(self: &Arc<Self>) {
        if self.discovery_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Discovery retry already scheduled");
            return;
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = registry.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(registry.settings.discovery_retry) => {}
                }

                if !registry.is_empty() {
                    debug!("Fleet is no longer empty, stopping discovery retries");
                    break;
                }

                match registry.try_discover(None).await {
                    Ok(handle) => {
                        info!("Local daemon discovered as node {}", handle.uuid());
                        break;
                    }
                    Err(RegistryError::DiscoveryFailed) => {
                        warn!(
                            "Still no local daemon, retrying in {:?}",
                            registry.settings.discovery_retry
                        );
                    }
                    Err(e) => warn!("Local daemon discovery failed: {}", e),
                }
            }

            registry.discovery_in_flight.store(false, Ordering::Release);
        });
    }

    fn discovery_path(&self) -> PathBuf {
        let path = &self.settings.discovery_file;
        if path.is_absolute() {
            return path.clone();
        }
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.clone(),
        }
    }
}

fn local_patch(api_key: String, port: u16) -> NodeConfigPatch {
    NodeConfigPatch {
        ip: Some(LOCAL_HOST.to_string()),
        port: Some(port),
        api_key: Some(api_key),
        ..Default::default()
    }
}

/// Read the daemon's own config file, `None` if it does not exist.
async fn read_local_daemon_config(path: &Path) -> Result<Option<LocalDaemonConfig>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let config = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {:?}", path))?;

    Ok(Some(config))
}
