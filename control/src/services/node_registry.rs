use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::node_handle::NodeHandle;
use crate::services::record_store::{RecordStore, StoreError};
use crate::services::transport::NodeTransport;
use crate::types::{FleetCount, NodeConfig, NodeConfigPatch};

/// Store category holding one record per remote daemon.
pub const RECORD_CATEGORY: &str = "RemoteServiceConfig";

/// Where a co-located daemon writes its key and port, relative to our working directory.
pub const DEFAULT_DISCOVERY_FILE: &str = "../daemon/data/Config/global.json";

pub const DEFAULT_SUPERVISOR_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_DISCOVERY_RETRY: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("no local daemon config found and no key supplied")]
    DiscoveryFailed,

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub discovery_file: PathBuf,
    pub supervisor_interval: Duration,
    pub discovery_retry: Duration,
    pub keepalive: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            discovery_file: PathBuf::from(DEFAULT_DISCOVERY_FILE),
            supervisor_interval: DEFAULT_SUPERVISOR_INTERVAL,
            discovery_retry: DEFAULT_DISCOVERY_RETRY,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// The fleet of remote daemons this control plane manages.
///
/// Created once at startup with [`NodeRegistry::init`] and shared as an
/// `Arc`. Every registered node has a persisted [`NodeConfig`]; handles that
/// fail to connect stay registered and are retried by the supervisor.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Arc<NodeHandle>>>,
    // Serializes register/edit/delete so the map and the store change in the same order
    write_lock: Mutex<()>,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn NodeTransport>,
    pub(crate) settings: RegistrySettings,
    pub(crate) discovery_in_flight: AtomicBool,
    pub(crate) shutdown: CancellationToken,
}

impl NodeRegistry {
    /// Restore the fleet from the store, fall back to local discovery when it
    /// is empty, and start the supervisor.
    pub async fn init(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn NodeTransport>,
        settings: RegistrySettings,
    ) -> Result<Arc<Self>, RegistryError> {
        let registry = Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            store,
            transport,
            settings,
            discovery_in_flight: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        registry.restore().await?;

        if registry.is_empty() {
            if let Err(e) = registry.discover_local(None).await {
                warn!("Local daemon discovery failed: {}", e);
            }
        }

        info!("Fleet loaded with {} node(s)", registry.count().total);

        registry.spawn_supervisor();

        Ok(registry)
    }

    async fn restore(&self) -> Result<(), RegistryError> {
        let ids = self.store.list(RECORD_CATEGORY).await?;

        for id in ids {
            let config = match self.load_config(&id).await {
                Ok(config) => config,
                Err(e) => {
                    warn!("Skipping node record {}: {}", id, e);
                    continue;
                }
            };

            let handle = self.new_handle(config);
            self.nodes_mut().insert(id, Arc::clone(&handle));
            handle.connect();
        }

        Ok(())
    }

    async fn load_config(&self, id: &str) -> Result<NodeConfig, StoreError> {
        let record = self.store.load(RECORD_CATEGORY, id).await?;
        let mut config: NodeConfig = serde_json::from_value(record)?;
        // The store key is authoritative
        config.uuid = id.to_string();
        Ok(config)
    }

    async fn persist(&self, config: &NodeConfig) -> Result<(), RegistryError> {
        let record = serde_json::to_value(config).map_err(StoreError::from)?;
        self.store.store(RECORD_CATEGORY, &config.uuid, &record).await?;
        Ok(())
    }

    fn new_handle(&self, config: NodeConfig) -> Arc<NodeHandle> {
        Arc::new(NodeHandle::new(
            config,
            Arc::clone(&self.transport),
            self.settings.keepalive,
        ))
    }

    fn nodes_ref(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<NodeHandle>>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn nodes_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<NodeHandle>>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new node, persist it and start connecting.
    ///
    /// A fresh identifier is allocated unless the patch carries one. If the
    /// record cannot be persisted the node is rolled back out of the fleet.
    pub async fn register(&self, patch: NodeConfigPatch) -> Result<Arc<NodeHandle>, RegistryError> {
        let uuid = patch
            .uuid
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut config = NodeConfig::new(uuid.clone());
        config.apply(&patch);
        let handle = self.new_handle(config.clone());

        let _guard = self.write_lock.lock().await;
        {
            let mut nodes = self.nodes_mut();
            if nodes.contains_key(&uuid) {
                return Err(RegistryError::AlreadyExists(uuid));
            }
            nodes.insert(uuid.clone(), Arc::clone(&handle));
        }

        if let Err(e) = self.persist(&config).await {
            self.nodes_mut().remove(&uuid);
            warn!("Rolled back registration of node {}: {}", uuid, e);
            return Err(e);
        }

        info!(
            "Registered node {} ({}:{}) {}",
            uuid, config.ip, config.port, config.remarks
        );

        handle.connect();
        Ok(handle)
    }

    /// Merge `patch` into an existing node's config and persist the result.
    ///
    /// Only present, non-empty fields are applied. The in-memory config only
    /// changes once the store accepted the merged record. Does not reconnect.
    pub async fn edit(&self, uuid: &str, patch: &NodeConfigPatch) -> Result<Arc<NodeHandle>, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let handle = self
            .get(uuid)
            .ok_or_else(|| RegistryError::NotFound(uuid.to_string()))?;

        let mut config = handle.config();
        config.apply(patch);
        self.persist(&config).await?;
        handle.set_config(config.clone());

        info!("Updated node {} ({}:{})", uuid, config.ip, config.port);
        Ok(handle)
    }

    /// Remove a node from the fleet, disconnect it and delete its record.
    /// Unknown identifiers are a no-op.
    pub async fn delete(&self, uuid: &str) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        let removed = self.nodes_mut().remove(uuid);
        let Some(handle) = removed else {
            return Ok(());
        };

        handle.retire();
        self.store.delete(RECORD_CATEGORY, uuid).await?;

        info!("Deleted node {}", uuid);
        Ok(())
    }

    pub fn get(&self, uuid: &str) -> Option<Arc<NodeHandle>> {
        self.nodes_ref().get(uuid).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes_ref().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_ref().is_empty()
    }

    pub fn count(&self) -> FleetCount {
        let nodes = self.nodes_ref();
        FleetCount {
            total: nodes.len(),
            available: nodes.values().filter(|h| h.is_available()).count(),
        }
    }

    /// Stop the supervisor and any pending discovery retry.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
