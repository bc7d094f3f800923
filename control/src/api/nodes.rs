use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::{
    services::node_registry::{NodeRegistry, RegistryError},
    types::{
        DiscoverRequest, DiscoverResponse, FleetCount, ListNodesResponse, NodeConfigPatch,
        NodeView,
    },
};

pub struct AppState {
    pub registry: Arc<NodeRegistry>,
}

fn error_response(e: RegistryError) -> (StatusCode, String) {
    let status = match &e {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyExists(_) => StatusCode::CONFLICT,
        RegistryError::DiscoveryFailed => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// GET /api/nodes - List all nodes
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<ListNodesResponse> {
    let nodes = state.registry.nodes().iter().map(|h| h.view()).collect();
    Json(ListNodesResponse { nodes })
}

/// GET /api/nodes/count - Total and available node counts
pub async fn count_nodes(State(state): State<Arc<AppState>>) -> Json<FleetCount> {
    Json(state.registry.count())
}

/// POST /api/nodes - Register a new node
pub async fn register_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodeConfigPatch>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    info!(
        "Registering node: ip={}, port={:?}",
        req.ip.as_deref().unwrap_or_default(),
        req.port
    );

    let handle = state.registry.register(req).await.map_err(error_response)?;

    Ok(Json(handle.view()))
}

/// GET /api/nodes/:id - Get node by ID
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    let handle = state
        .registry
        .get(&node_id)
        .ok_or_else(|| error_response(RegistryError::NotFound(node_id)))?;

    Ok(Json(handle.view()))
}

/// PUT /api/nodes/:id - Update node config and reconnect
pub async fn edit_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<NodeConfigPatch>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    info!("Updating node: {}", node_id);

    let handle = state
        .registry
        .edit(&node_id, &req)
        .await
        .map_err(error_response)?;

    handle.reconnect();

    Ok(Json(handle.view()))
}

/// DELETE /api/nodes/:id - Delete a node (no-op if unknown)
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    info!("Deleting node: {}", node_id);

    state
        .registry
        .delete(&node_id)
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/nodes/:id/connect - Trigger a reconnect attempt
pub async fn connect_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let handle = state
        .registry
        .get(&node_id)
        .ok_or_else(|| error_response(RegistryError::NotFound(node_id)))?;

    handle.reconnect();

    Ok(StatusCode::ACCEPTED)
}

/// POST /api/nodes/discover - Register the daemon running on this host
pub async fn discover_local(
    State(state): State<Arc<AppState>>,
    body: Option<Json<DiscoverRequest>>,
) -> Result<Json<DiscoverResponse>, (StatusCode, String)> {
    let key = body.and_then(|Json(req)| req.key);

    let node = state
        .registry
        .discover_local(key.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(DiscoverResponse {
        node: node.map(|h| h.view()),
    }))
}
