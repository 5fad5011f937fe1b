//! MCP-over-SSE session tests: the full connect / initialize / tools
//! handshake against the real router, with the fake container runtime
//! underneath.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TestServer;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

/// Reads SSE events off a response body, buffering across chunk
/// boundaries and skipping keep-alive comments.
struct SseReader {
    body: axum::body::BodyDataStream,
    buffer: String,
}

impl SseReader {
    fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
            buffer: String::new(),
        }
    }

    /// Next (event, data) pair, with a timeout so a wedged stream fails
    /// the test instead of hanging it.
    async fn next_event(&mut self) -> (String, String) {
        loop {
            if let Some(raw) = self.take_frame() {
                let mut event = String::new();
                let mut data = String::new();
                for line in raw.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        event = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(value.trim_start());
                    }
                }
                // Comment-only frames (keep-alives) carry no event or data.
                if !event.is_empty() || !data.is_empty() {
                    return (event, data);
                }
                continue;
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("timed out waiting for SSE event")
                .expect("SSE stream ended unexpectedly")
                .expect("SSE stream errored");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    fn take_frame(&mut self) -> Option<String> {
        let end = self.buffer.find("\n\n")?;
        let frame = self.buffer[..end].to_string();
        self.buffer.drain(..end + 2);
        Some(frame)
    }
}

async fn post_json(server: &TestServer, path: &str, body: Value) -> StatusCode {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    server
        .router
        .clone()
        .oneshot(request)
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn sse_requires_a_valid_api_key() {
    let server = TestServer::new().await;

    let request = Request::builder()
        .method("GET")
        .uri("/sse")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/sse?api_key=not-a-real-key")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mcp_session_lists_and_calls_tools() {
    let server = TestServer::new().await;
    let (_user_id, _token, api_key) = server.register_with_api_key("alice").await;

    // Connect. The first event names the message endpoint for this session.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/sse?api_key={api_key}"))
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut events = SseReader::new(response.into_body());
    let (event, endpoint) = events.next_event().await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/messages/"), "endpoint: {endpoint}");
    assert_eq!(server.state.mcp_sessions.len(), 1);

    // MCP handshake.
    let status = post_json(
        &server,
        &endpoint,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.0.0"}
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (event, data) = events.next_event().await;
    assert_eq!(event, "message");
    let init: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["serverInfo"]["name"], "cinderbox");

    let status = post_json(
        &server,
        &endpoint,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // The session exposes the full tool surface.
    let status = post_json(
        &server,
        &endpoint,
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, data) = events.next_event().await;
    let listed: Value = serde_json::from_str(&data).unwrap();
    let names: Vec<&str> = listed["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"create_sandbox"), "tools: {names:?}");
    assert!(names.contains(&"execute_python_code"));
    assert!(names.contains(&"check_package_installation_status"));

    // Calling a tool provisions a real (fake) container for this user.
    let status = post_json(
        &server,
        &endpoint,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "create_sandbox", "arguments": {"name": "from-mcp"}}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, data) = events.next_event().await;
    let called: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(called["id"], 3);
    let text = called["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("from-mcp"), "tool result: {text}");
    assert_eq!(server.driver.container_ids().len(), 1);

    // Posting to an unknown session is a 404.
    let status = post_json(
        &server,
        &format!("/messages/{}", uuid::Uuid::new_v4()),
        json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dropping_the_stream_ends_the_session_but_not_the_sandboxes() {
    let server = TestServer::new().await;
    let (user_id, _token, api_key) = server.register_with_api_key("alice").await;

    // Create a sandbox outside the session.
    let sandbox = server
        .state
        .coordinator
        .create_sandbox(user_id, None)
        .await
        .unwrap();

    let request = Request::builder()
        .method("GET")
        .uri(format!("/sse?api_key={api_key}"))
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    let mut events = SseReader::new(response.into_body());
    let (_, _endpoint) = events.next_event().await;
    assert_eq!(server.state.mcp_sessions.len(), 1);

    // Client disconnect: drop the body stream.
    drop(events);
    // Give the cleanup a moment to run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.state.mcp_sessions.len(), 0);

    // Sandbox lifetime is orthogonal to session lifetime.
    let listed = server
        .state
        .coordinator
        .list_sandboxes(user_id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].sandbox_id, sandbox.sandbox_id);
}
