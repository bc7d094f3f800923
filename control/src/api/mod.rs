pub mod nodes;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::types::HealthResponse;
use nodes::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Fleet management
        .route("/api/nodes", get(nodes::list_nodes).post(nodes::register_node))
        .route("/api/nodes/count", get(nodes::count_nodes))
        .route("/api/nodes/discover", post(nodes::discover_local))
        .route(
            "/api/nodes/:id",
            get(nodes::get_node)
                .put(nodes::edit_node)
                .delete(nodes::delete_node),
        )
        .route("/api/nodes/:id/connect", post(nodes::connect_node))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
