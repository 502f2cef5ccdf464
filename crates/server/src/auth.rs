use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::errors::JsonApiError;
use crate::state::ServerState;

/// Require `Authorization: Bearer <token>` on every API route.
///
/// With no tokens configured any non-empty token passes.
pub async fn require_bearer(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Result<Response, JsonApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| JsonApiError::unauthorized("missing bearer token"))?;

    if !state.auth.tokens.is_empty() && !state.auth.tokens.iter().any(|t| t == token) {
        debug!(path = %req.uri().path(), "rejected unknown bearer token");
        return Err(JsonApiError::unauthorized("invalid bearer token"));
    }
    Ok(next.run(req).await)
}
