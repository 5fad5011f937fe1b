//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::sse;
use crate::state::AppState;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Account endpoints
        .route("/api/register", post(handlers::register))
        .route("/api/token", post(handlers::login))
        .route("/api/users/me", get(handlers::me))
        .route("/api/users/me/api-key", get(handlers::get_api_key))
        .route(
            "/api/users/me/api-key/regenerate",
            post(handlers::regenerate_api_key),
        )
        // Sandbox endpoints
        .route(
            "/api/users/me/sandboxes",
            get(handlers::list_sandboxes).post(handlers::create_sandbox),
        )
        .route(
            "/api/users/me/sandboxes/{id}",
            delete(handlers::delete_sandbox),
        );

    let public_routes = Router::new()
        // Published files: the URL is the capability, no credential needed.
        .route(
            "/sandbox/file/{sandbox_id}/{*path}",
            get(handlers::get_sandbox_file),
        )
        // MCP session transport; /sse authenticates its own api_key and the
        // session id is the capability for /messages.
        .route("/sse", get(sse::connect_sse))
        .route("/messages/{session_id}", post(sse::post_message));

    // Middleware layers apply in reverse order: TraceLayer -> auth -> handler.
    Router::new()
        .merge(api_routes)
        .merge(public_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
