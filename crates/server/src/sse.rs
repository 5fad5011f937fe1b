//! SSE session plumbing for the MCP multiplexer.
//!
//! `GET /sse?api_key=…` authenticates once, binds a [`UserToolServer`] to
//! the resolved user for the whole connection, and serves it over an
//! in-process duplex pipe: outbound JSON-RPC lines stream to the client as
//! SSE `message` events (after an initial `endpoint` event naming the post
//! URL), inbound ones arrive via `POST /messages/{session_id}`. When the
//! client disconnects the pipe closes and the MCP service ends; sandboxes
//! are unaffected.

use crate::error::{ApiError, ApiResult};
use crate::mcp::UserToolServer;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::Stream;
use rmcp::ServiceExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffer size of the in-process pipe between the SSE plumbing and the MCP
/// service.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Live MCP sessions: session id -> inbound message sender.
#[derive(Default)]
pub struct McpSessions {
    inner: Mutex<HashMap<Uuid, mpsc::Sender<String>>>,
}

impl McpSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, session_id: Uuid, sender: mpsc::Sender<String>) {
        self.inner.lock().unwrap().insert(session_id, sender);
    }

    fn sender(&self, session_id: Uuid) -> Option<mpsc::Sender<String>> {
        self.inner.lock().unwrap().get(&session_id).cloned()
    }

    fn remove(&self, session_id: Uuid) {
        self.inner.lock().unwrap().remove(&session_id);
    }

    /// Number of live sessions. Test hook.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    pub api_key: Option<String>,
}

/// GET /sse?api_key=… - Open an MCP session bound to the key's user.
pub async fn connect_sse(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
) -> ApiResult<Sse<KeepAliveStream<SessionStream>>> {
    let api_key = query
        .api_key
        .ok_or_else(|| ApiError::Unauthorized("api_key query parameter required".to_string()))?;
    let user = state.identity.resolve_api_key(&api_key).await?;

    let session_id = Uuid::new_v4();
    debug!(session_id = %session_id, username = %user.username, "MCP session opened");

    let (server_io, client_io) = tokio::io::duplex(PIPE_CAPACITY);
    let (server_read, server_write) = tokio::io::split(server_io);
    let (client_read, mut client_write) = tokio::io::split(client_io);

    // The MCP service itself, reading requests from and writing responses
    // to its half of the pipe.
    let handler = UserToolServer::new(
        state.coordinator.clone(),
        user.user_id,
        user.username.clone(),
    );
    tokio::spawn(async move {
        match handler.serve((server_read, server_write)).await {
            Ok(running) => {
                let _ = running.waiting().await;
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "MCP service failed"),
        }
        debug!(session_id = %session_id, "MCP session ended");
    });

    // Inbound: POSTed JSON-RPC messages feed the service's read half, one
    // message per line.
    let (sender, mut receiver) = mpsc::channel::<String>(32);
    state.mcp_sessions.insert(session_id, sender);
    tokio::spawn(async move {
        while let Some(mut message) = receiver.recv().await {
            message.push('\n');
            if client_write.write_all(message.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // Outbound: service responses stream to the client as SSE events.
    let lines = LinesStream::new(BufReader::new(client_read).lines());
    let stream = SessionStream {
        endpoint: Some(format!("/messages/{session_id}")),
        lines,
        _cleanup: SessionCleanup {
            sessions: state.mcp_sessions.clone(),
            session_id,
        },
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /messages/{session_id} - Deliver one JSON-RPC message to a session.
/// The session id is the capability; it was handed out on an authenticated
/// connect.
pub async fn post_message(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    body: String,
) -> ApiResult<StatusCode> {
    // Re-serialize compactly so the newline framing into the service holds
    // even for pretty-printed client payloads.
    let value: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON-RPC body: {e}")))?;
    let message = value.to_string();

    let sender = state
        .mcp_sessions
        .sender(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("no MCP session {session_id}")))?;
    sender
        .send(message)
        .await
        .map_err(|_| ApiError::NotFound(format!("MCP session {session_id} closed")))?;

    Ok(StatusCode::ACCEPTED)
}

/// The SSE event stream for one MCP session: first an `endpoint` event
/// naming the post URL, then one `message` event per outbound JSON-RPC
/// line. Dropping the stream (client disconnect) tears the session down.
pub struct SessionStream {
    endpoint: Option<String>,
    lines: LinesStream<BufReader<ReadHalf<DuplexStream>>>,
    _cleanup: SessionCleanup,
}

impl Stream for SessionStream {
    type Item = Result<Event, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(endpoint) = self.endpoint.take() {
            return Poll::Ready(Some(Ok(Event::default().event("endpoint").data(endpoint))));
        }
        match Pin::new(&mut self.lines).poll_next(cx) {
            Poll::Ready(Some(Ok(line))) => {
                Poll::Ready(Some(Ok(Event::default().event("message").data(line))))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(error = %e, "MCP session pipe failed");
                Poll::Ready(None)
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct SessionCleanup {
    sessions: Arc<McpSessions>,
    session_id: Uuid,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        self.sessions.remove(self.session_id);
        debug!(session_id = %self.session_id, "MCP session unregistered");
    }
}
