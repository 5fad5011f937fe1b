//! Published-file serving.
//!
//! `GET /sandbox/file/{sandbox_id}/{path}` is a capability URL: whoever
//! holds it can read the file, no credential required. Path safety is
//! enforced by the publisher.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use uuid::Uuid;

/// GET /sandbox/file/{sandbox_id}/{*path} - Fetch a published file.
pub async fn get_sandbox_file(
    State(state): State<AppState>,
    Path((sandbox_id, path)): Path<(Uuid, String)>,
) -> ApiResult<Response> {
    let (bytes, content_type) = state
        .coordinator
        .fetch_published_file(sandbox_id, &path)
        .await?;

    Response::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))
}
