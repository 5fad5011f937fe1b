//! Per-session MCP tool server.
//!
//! A [`UserToolServer`] is created once per MCP session, after the session's
//! API key has been resolved to a user. It exposes exactly that user's tool
//! surface: every `tools/call` is rewritten to `(tool, args, user)` and
//! dispatched to the engine. Sandbox lifetime is orthogonal to session
//! lifetime; nothing is torn down when the session ends.

use std::borrow::Cow;
use std::sync::Arc;

use cinderbox_engine::{tools, Coordinator};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    ProtocolVersion, ServerCapabilities, ServerInfo, Tool as McpTool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler};
use uuid::Uuid;

/// MCP server handler bound to one authenticated user.
pub struct UserToolServer {
    coordinator: Arc<Coordinator>,
    user_id: Uuid,
    username: String,
}

impl UserToolServer {
    pub fn new(coordinator: Arc<Coordinator>, user_id: Uuid, username: String) -> Self {
        Self {
            coordinator,
            user_id,
            username,
        }
    }
}

impl ServerHandler for UserToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "cinderbox".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(format!(
                "Python sandbox tools for {}. Create a sandbox first, then \
                 execute code, install packages, and fetch produced files \
                 through the returned links.",
                self.username
            )),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let listed: Vec<McpTool> = tools::tool_specs()
            .into_iter()
            .map(|spec| {
                let schema_obj = spec
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                McpTool {
                    name: Cow::Borrowed(spec.name),
                    title: None,
                    description: Some(Cow::Borrowed(spec.description)),
                    input_schema: Arc::new(schema_obj),
                    output_schema: None,
                    annotations: None,
                    icons: None,
                }
            })
            .collect();

        Ok(ListToolsResult::with_all_items(listed))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let args = match request.arguments {
            Some(map) => serde_json::Value::Object(map),
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        tracing::debug!(user = %self.username, tool = %request.name, "MCP tool call");

        match tools::dispatch(&self.coordinator, self.user_id, &request.name, args).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result)
                    .unwrap_or_else(|_| result.to_string());
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            // Engine failures are tool-level errors, not protocol errors;
            // the session stays usable.
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "{}: {}",
                e.code(),
                e
            ))])),
        }
    }
}
