//! Application state shared across handlers.

use crate::identity::IdentityService;
use crate::sse::McpSessions;
use cinderbox_core::config::AppConfig;
use cinderbox_engine::Coordinator;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Identity and credential service.
    pub identity: Arc<IdentityService>,
    /// The sandbox execution coordinator.
    pub coordinator: Arc<Coordinator>,
    /// Live MCP sessions keyed by session id.
    pub mcp_sessions: Arc<McpSessions>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        identity: Arc<IdentityService>,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            identity,
            coordinator,
            mcp_sessions: Arc::new(McpSessions::new()),
        }
    }
}
