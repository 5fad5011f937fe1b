//! Sandbox CRUD endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, Request, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

#[derive(Debug, Serialize)]
pub struct SandboxResponse {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub last_used_at: String,
}

impl SandboxResponse {
    fn from_row(sandbox: &cinderbox_registry::SandboxRow) -> Self {
        Self {
            id: sandbox.sandbox_id.to_string(),
            name: sandbox.name.clone(),
            created_at: rfc3339(sandbox.created_at),
            last_used_at: rfc3339(sandbox.last_used_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SandboxListResponse {
    pub sandboxes: Vec<SandboxResponse>,
}

/// GET /api/users/me/sandboxes - The caller's sandboxes.
pub async fn list_sandboxes(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<SandboxListResponse>> {
    let auth = require_auth(&req)?;
    let sandboxes = state.coordinator.list_sandboxes(auth.user.user_id).await?;
    Ok(Json(SandboxListResponse {
        sandboxes: sandboxes.iter().map(SandboxResponse::from_row).collect(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSandboxRequest {
    pub name: Option<String>,
}

/// POST /api/users/me/sandboxes - Provision a new sandbox.
pub async fn create_sandbox(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<SandboxResponse>> {
    let auth = require_auth(&req)?.clone();

    // The body is optional: an empty body means default name.
    let bytes = axum::body::to_bytes(req.into_body(), 64 * 1024)
        .await
        .map_err(|e| crate::error::ApiError::BadRequest(e.to_string()))?;
    let body: CreateSandboxRequest = if bytes.is_empty() {
        CreateSandboxRequest::default()
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::ApiError::BadRequest(e.to_string()))?
    };

    let sandbox = state
        .coordinator
        .create_sandbox(auth.user.user_id, body.name)
        .await?;
    Ok(Json(SandboxResponse::from_row(&sandbox)))
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub ok: bool,
}

/// DELETE /api/users/me/sandboxes/{id} - Tear a sandbox down.
pub async fn delete_sandbox(
    State(state): State<AppState>,
    Path(sandbox_id): Path<Uuid>,
    req: Request,
) -> ApiResult<Json<DeletedResponse>> {
    let auth = require_auth(&req)?;
    state
        .coordinator
        .delete_sandbox(auth.user.user_id, sandbox_id)
        .await?;
    Ok(Json(DeletedResponse { ok: true }))
}
