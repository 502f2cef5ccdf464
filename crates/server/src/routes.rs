pub mod resources;

use axum::{middleware, routing::get, Json, Router};
use common::types::Health;
use models::ResourceType;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{auth, observability, state::ServerState};

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn metrics() -> (axum::http::StatusCode, String) {
    observability::encode_metrics()
}

const WORKSPACES: &str = "/api/workspaces";
const WORKSPACE: &str = "/api/workspaces/:workspace_id";
const SERVICES: &str = "/api/workspaces/:workspace_id/workspace-services";
const SERVICE: &str = "/api/workspaces/:workspace_id/workspace-services/:service_id";
const USER_RESOURCES: &str = "/api/workspaces/:workspace_id/workspace-services/:service_id/user-resources";
const USER_RESOURCE: &str =
    "/api/workspaces/:workspace_id/workspace-services/:service_id/user-resources/:user_resource_id";

/// Build the full application router: public health/metrics plus the
/// bearer-protected resource API.
pub fn build_router(state: ServerState, cors: CorsLayer) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics));

    let api = Router::new()
        .merge(resources::routes(ResourceType::Workspace, WORKSPACES, WORKSPACE))
        .merge(resources::routes(ResourceType::WorkspaceService, SERVICES, SERVICE))
        .merge(resources::routes(ResourceType::UserResource, USER_RESOURCES, USER_RESOURCE))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    public
        .merge(api)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
