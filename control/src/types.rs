use serde::{Deserialize, Serialize};

/// Port a co-located daemon listens on when it did not tell us otherwise.
pub const DEFAULT_DAEMON_PORT: u16 = 24444;

// ============================================================================
// Node Config
// ============================================================================

/// Persisted connection record for one remote daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub uuid: String,
    pub ip: String,
    pub port: u16,
    // Records written by the daemon panel use camelCase
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(default)]
    pub remarks: String,
}

impl NodeConfig {
    /// Empty record for a freshly allocated identifier.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            ip: String::new(),
            port: DEFAULT_DAEMON_PORT,
            api_key: String::new(),
            remarks: String::new(),
        }
    }

    /// Merge a partial update. Absent or empty fields never clear existing values.
    pub fn apply(&mut self, patch: &NodeConfigPatch) {
        if let Some(remarks) = non_empty(&patch.remarks) {
            self.remarks = remarks.to_string();
        }
        if let Some(ip) = non_empty(&patch.ip) {
            self.ip = ip.to_string();
        }
        if let Some(port) = patch.port.filter(|p| *p != 0) {
            self.port = port;
        }
        if let Some(api_key) = non_empty(&patch.api_key) {
            self.api_key = api_key.to_string();
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Partial node config used by register and edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfigPatch {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

// ============================================================================
// Fleet Views
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetCount {
    pub total: usize,
    pub available: usize,
}

/// Snapshot of a node handle as exposed over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub uuid: String,
    pub ip: String,
    pub port: u16,
    pub api_key: String,
    pub remarks: String,
    pub available: bool,
    pub last_connected_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeView>,
}

// ============================================================================
// Local Discovery
// ============================================================================

/// Connection secret a co-located daemon writes into its own config directory.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalDaemonConfig {
    pub key: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverRequest {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub node: Option<NodeView>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
