//! HTTP and MCP control plane for the cinderbox sandbox broker.
//!
//! This crate provides:
//! - User registration, login, and API-key management
//! - Sandbox CRUD endpoints
//! - Capability-URL serving of published result files
//! - The per-session MCP multiplexer over SSE
//! - The `cinderboxd` binary wiring everything together

pub mod auth;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod mcp;
pub mod routes;
pub mod sse;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use identity::IdentityService;
pub use routes::create_router;
pub use state::AppState;
