//! Authentication middleware.
//!
//! Resolves a credential — bearer session token, `X-API-Key` header, or
//! `api_key` query parameter, in that order — into an [`AuthenticatedUser`]
//! request extension, and wraps the request in a tracing span carrying a
//! trace id. Handlers that require authentication call [`require_auth`];
//! public endpoints simply never look for the extension.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use cinderbox_registry::UserRow;
use tracing::Instrument;
use uuid::Uuid;

/// Cap on accepted client-supplied trace ids.
const TRACE_ID_MAX: usize = 64;

/// Correlates log lines for one request. Taken from the client's
/// `x-trace-id` header when it carries something usable, otherwise minted
/// fresh.
#[derive(Clone, Debug)]
pub struct TraceId(String);

impl TraceId {
    fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-provided id if anything survives the charset
    /// whitelist. Ids are limited to the characters that appear in common
    /// tracing formats, so nothing hostile reaches the logs.
    fn sanitize(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
            .take(TRACE_ID_MAX)
            .collect();
        (!cleaned.is_empty()).then_some(Self(cleaned))
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get("x-trace-id")
            .and_then(|value| value.to_str().ok())
            .and_then(Self::sanitize)
            .unwrap_or_else(Self::mint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user: UserRow,
}

/// Pull the token out of an `Authorization: Bearer …` header. The scheme
/// is matched case-insensitively per RFC 6750.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim_start())
}

/// Extract an API key from the `X-API-Key` header or `api_key` query
/// parameter.
fn extract_api_key(req: &Request) -> Option<String> {
    if let Some(key) = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    {
        return Some(key.to_string());
    }
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("api_key=")
                .map(|value| value.to_string())
        })
    })
}

/// Authentication middleware. Credential failures do not abort the request
/// here; protected handlers reject via [`require_auth`], while public
/// endpoints (registration, login, capability URLs) never consult the
/// extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = TraceId::from_headers(req.headers());
    let span = tracing::info_span!("request", trace_id = %trace_id);
    req.extensions_mut().insert(trace_id);

    if let Some(token) = bearer_token(req.headers()) {
        if let Ok(user) = state.identity.resolve_token(token).await {
            req.extensions_mut().insert(AuthenticatedUser { user });
        }
    }
    if req.extensions().get::<AuthenticatedUser>().is_none() {
        if let Some(key) = extract_api_key(&req) {
            if let Ok(user) = state.identity.resolve_api_key(&key).await {
                req.extensions_mut().insert(AuthenticatedUser { user });
            }
        }
    }

    Ok(next.run(req).instrument(span).await)
}

/// Require authentication (a credential must have resolved).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}
