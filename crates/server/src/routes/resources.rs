//! Handlers shared by the three resource levels.
//!
//! Each level mounts the same set of handlers; the resource type is bound
//! when the routes are built and the parent ids come from the path.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use models::{Operation, ResourceInput, ResourceParent, ResourcePatch, ResourceType};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::errors::JsonApiError;
use crate::state::ServerState;

/// Path and body extractors whose rejections become JSON 400s.
type ApiPath = Result<Path<ScopeParams>, PathRejection>;
type ApiJson<T> = Result<Json<T>, JsonRejection>;

#[derive(Debug, Deserialize)]
pub struct ScopeParams {
    #[serde(default)]
    pub workspace_id: Option<Uuid>,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub user_resource_id: Option<Uuid>,
    #[serde(default)]
    pub operation_id: Option<Uuid>,
}

impl ScopeParams {
    /// Parent of a resource of type `rt` addressed by these params.
    fn parent(&self, rt: ResourceType) -> Result<ResourceParent, JsonApiError> {
        let parent = match rt {
            ResourceType::Workspace => ResourceParent::none(),
            ResourceType::WorkspaceService => ResourceParent::workspace(require(self.workspace_id)?),
            ResourceType::UserResource => {
                ResourceParent::workspace_service(require(self.workspace_id)?, require(self.service_id)?)
            }
        };
        Ok(parent)
    }

    /// Id of the addressed resource of type `rt`.
    fn id(&self, rt: ResourceType) -> Result<Uuid, JsonApiError> {
        match rt {
            ResourceType::Workspace => require(self.workspace_id),
            ResourceType::WorkspaceService => require(self.service_id),
            ResourceType::UserResource => require(self.user_resource_id),
        }
    }
}

fn require(id: Option<Uuid>) -> Result<Uuid, JsonApiError> {
    id.ok_or_else(|| JsonApiError::new(StatusCode::BAD_REQUEST, "Bad Path", Some("missing path id".into())))
}

fn accepted(op: Operation) -> Response {
    let location = format!("/api{}", op.operation_path());
    (StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(json!({ "operation": op }))).into_response()
}

pub fn routes(rt: ResourceType, collection: &str, item: &str) -> Router<ServerState> {
    Router::new()
        .route(
            collection,
            get(move |s: State<ServerState>, p: ApiPath| list(rt, s, p))
                .post(move |s: State<ServerState>, p: ApiPath, b: ApiJson<ResourceInput>| create(rt, s, p, b)),
        )
        .route(
            item,
            get(move |s: State<ServerState>, p: ApiPath| get_one(rt, s, p))
                .patch(move |s: State<ServerState>, p: ApiPath, b: ApiJson<ResourcePatch>| patch(rt, s, p, b))
                .delete(move |s: State<ServerState>, p: ApiPath| delete(rt, s, p)),
        )
        .route(
            &format!("{item}/operations"),
            get(move |s: State<ServerState>, p: ApiPath| list_operations(rt, s, p)),
        )
        .route(
            &format!("{item}/operations/:operation_id"),
            get(move |s: State<ServerState>, p: ApiPath| get_operation(rt, s, p)),
        )
}

async fn list(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
) -> Result<Json<serde_json::Value>, JsonApiError> {
    let Path(params) = params?;
    let items = state.resources.list(rt, params.parent(rt)?)?;
    Ok(Json(json!({ rt.list_key(): items })))
}

async fn create(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
    input: ApiJson<ResourceInput>,
) -> Result<Response, JsonApiError> {
    let (Path(params), Json(input)) = (params?, input?);
    let (resource, op) = state.resources.create(rt, params.parent(rt)?, input)?;
    info!(resource_id = %resource.id, operation_id = %op.id, path = %resource.resource_path, "create accepted");
    Ok(accepted(op))
}

async fn get_one(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
) -> Result<Json<serde_json::Value>, JsonApiError> {
    let Path(params) = params?;
    let resource = state.resources.get(rt, params.parent(rt)?, params.id(rt)?)?;
    Ok(Json(json!({ rt.response_key(): resource })))
}

async fn patch(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
    body: ApiJson<ResourcePatch>,
) -> Result<Response, JsonApiError> {
    let (Path(params), Json(body)) = (params?, body?);
    let op = state.resources.patch(rt, params.parent(rt)?, params.id(rt)?, body)?;
    Ok(accepted(op))
}

async fn delete(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
) -> Result<Response, JsonApiError> {
    let Path(params) = params?;
    let op = state.resources.delete(rt, params.parent(rt)?, params.id(rt)?)?;
    Ok(accepted(op))
}

async fn list_operations(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
) -> Result<Json<serde_json::Value>, JsonApiError> {
    let Path(params) = params?;
    let ops = state.resources.list_operations(rt, params.parent(rt)?, params.id(rt)?)?;
    Ok(Json(json!({ "operations": ops })))
}

async fn get_operation(
    rt: ResourceType,
    State(state): State<ServerState>,
    params: ApiPath,
) -> Result<Json<serde_json::Value>, JsonApiError> {
    let Path(params) = params?;
    let op = state
        .resources
        .get_operation(rt, params.parent(rt)?, params.id(rt)?, require(params.operation_id)?)?;
    Ok(Json(json!({ "operation": op })))
}
