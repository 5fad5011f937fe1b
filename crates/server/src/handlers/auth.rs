//! Registration, login, and API-key endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: String,
    pub is_active: bool,
}

impl UserResponse {
    fn from_row(user: &cinderbox_registry::UserRow) -> Self {
        Self {
            id: user.user_id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            created_at: user
                .created_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| user.created_at.to_string()),
            is_active: user.is_active,
        }
    }
}

/// POST /api/register - Create a new user.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .identity
        .register(&body.username, &body.email, &body.password)
        .await?;
    tracing::info!(username = %user.username, "user registered");
    Ok(Json(UserResponse::from_row(&user)))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

/// POST /api/token - Exchange a username/password for a session token.
pub async fn login(
    State(state): State<AppState>,
    Form(body): Form<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let user = state
        .identity
        .verify_password(&body.username, &body.password)
        .await?;
    let access_token = state.identity.issue_token(&user)?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

/// GET /api/users/me - The authenticated user, without credentials.
pub async fn me(req: Request) -> ApiResult<Json<UserResponse>> {
    let auth = require_auth(&req)?;
    Ok(Json(UserResponse::from_row(&auth.user)))
}

#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// GET /api/users/me/api-key - The authenticated user's current API key.
pub async fn get_api_key(req: Request) -> ApiResult<Json<ApiKeyResponse>> {
    let auth = require_auth(&req)?;
    Ok(Json(ApiKeyResponse {
        api_key: auth.user.api_key.clone(),
    }))
}

/// POST /api/users/me/api-key/regenerate - Mint a replacement API key.
pub async fn regenerate_api_key(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<ApiKeyResponse>> {
    let auth = require_auth(&req)?;
    let api_key = state
        .identity
        .regenerate_api_key(auth.user.user_id)
        .await?;
    tracing::info!(username = %auth.user.username, "API key regenerated");
    Ok(Json(ApiKeyResponse { api_key }))
}
