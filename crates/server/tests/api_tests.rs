//! REST API integration tests.

mod common;

use axum::http::StatusCode;
use cinderbox_driver::ExecOutput;
use cinderbox_engine::tools;
use common::TestServer;
use serde_json::json;

#[tokio::test]
async fn register_login_me_flow() {
    let server = TestServer::new().await;

    let (status, body) = server
        .request(
            "POST",
            "/api/register",
            None,
            Some(json!({
                "username": "alice",
                "email": "alice@example.test",
                "password": "password123",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["is_active"], true);

    // Credentials never appear in user responses.
    assert!(body.get("password_hash").is_none());
    assert!(body.get("api_key").is_none());

    // Duplicate registration conflicts.
    let (status, body) = server
        .request(
            "POST",
            "/api/register",
            None,
            Some(json!({
                "username": "alice",
                "email": "other@example.test",
                "password": "password123",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    // Weak password is rejected up front.
    let (status, body) = server
        .request(
            "POST",
            "/api/register",
            None,
            Some(json!({
                "username": "bob",
                "email": "bob@example.test",
                "password": "short",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_argument");

    // Wrong password fails, right one yields a token that resolves to the
    // user.
    let (status, _) = server
        .form_request("/api/token", "username=alice&password=wrong-password")
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = server.login("alice").await;
    let (status, body) = server
        .request("GET", "/api/users/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");

    // No credential, no access.
    let (status, body) = server.request("GET", "/api/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "not_authorized");
}

#[tokio::test]
async fn api_key_flow() {
    let server = TestServer::new().await;
    let (_, token, api_key) = server.register_with_api_key("alice").await;

    // The key authenticates requests via the X-API-Key header.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/users/me")
        .header("x-api-key", &api_key)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Regeneration atomically replaces the key.
    let (status, body) = server
        .request(
            "POST",
            "/api/users/me/api-key/regenerate",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_key = body["api_key"].as_str().unwrap().to_string();
    assert_ne!(new_key, api_key);

    let (status, body) = server
        .request("GET", "/api/users/me/api-key", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api_key"], new_key.as_str());
}

#[tokio::test]
async fn sandbox_crud_flow() {
    let server = TestServer::new().await;
    server.register("alice").await;
    let token = server.login("alice").await;

    let (status, created) = server
        .request(
            "POST",
            "/api/users/me/sandboxes",
            Some(&token),
            Some(json!({"name": "scratch"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "create failed: {created}");
    assert_eq!(created["name"], "scratch");
    let sandbox_id = created["id"].as_str().unwrap().to_string();

    // A container backs the sandbox.
    assert_eq!(server.driver.container_ids().len(), 1);

    let (status, listed) = server
        .request("GET", "/api/users/me/sandboxes", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["sandboxes"].as_array().unwrap().len(), 1);
    assert_eq!(listed["sandboxes"][0]["id"], sandbox_id.as_str());

    let (status, deleted) = server
        .request(
            "DELETE",
            &format!("/api/users/me/sandboxes/{sandbox_id}"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["ok"], true);
    assert!(server.driver.container_ids().is_empty());

    // Deleting again: the sandbox no longer exists.
    let (status, body) = server
        .request(
            "DELETE",
            &format!("/api/users/me/sandboxes/{sandbox_id}"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn published_files_are_served_at_capability_urls() {
    let server = TestServer::new().await;
    let user_id = server.register("alice").await;
    let token = server.login("alice").await;

    let (_, created) = server
        .request("POST", "/api/users/me/sandboxes", Some(&token), None)
        .await;
    let sandbox_id = created["id"].as_str().unwrap().to_string();

    // Simulate code that draws a plot into the results directory.
    server.driver.set_exec_handler(Box::new(|container, argv, now| {
        if argv.first().map(String::as_str) == Some("python") {
            container.files.insert(
                "/app/results/plot.png".to_string(),
                cinderbox_driver::testing::FakeFile {
                    contents: b"\x89PNG fake image".to_vec(),
                    mtime: now,
                },
            );
        }
        Ok(ExecOutput::default())
    }));

    let result = tools::dispatch(
        &server.state.coordinator,
        user_id,
        "execute_python_code",
        json!({"sandbox_id": sandbox_id, "code": "savefig()"}),
    )
    .await
    .unwrap();

    let link = result["file_links"][0].as_str().unwrap().to_string();
    assert_eq!(link, format!("/sandbox/file/{sandbox_id}/plot.png"));

    // The capability URL serves the bytes with no credential at all.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(&link)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/png"
    );
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    assert_eq!(&bytes[..], b"\x89PNG fake image");

    // Traversal through the wildcard segment is refused.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(format!("/sandbox/file/{sandbox_id}/..%2Fsecret"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // After sandbox deletion the URL is dead.
    server
        .request(
            "DELETE",
            &format!("/api/users/me/sandboxes/{sandbox_id}"),
            Some(&token),
            None,
        )
        .await;
    let request = axum::http::Request::builder()
        .method("GET")
        .uri(&link)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(server.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_cannot_touch_each_others_sandboxes() {
    let server = TestServer::new().await;
    let _alice = server.register("alice").await;
    let alice_token = server.login("alice").await;
    let bob = server.register("bob").await;
    let bob_token = server.login("bob").await;

    let (_, created) = server
        .request("POST", "/api/users/me/sandboxes", Some(&alice_token), None)
        .await;
    let sandbox_id = created["id"].as_str().unwrap().to_string();

    // Bob cannot see it.
    let (_, listed) = server
        .request("GET", "/api/users/me/sandboxes", Some(&bob_token), None)
        .await;
    assert!(listed["sandboxes"].as_array().unwrap().is_empty());

    // Bob cannot execute in it; the failure does not reveal existence.
    let err = tools::dispatch(
        &server.state.coordinator,
        bob,
        "execute_python_code",
        json!({"sandbox_id": sandbox_id, "code": "print(1)"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // Bob cannot delete it.
    let (status, body) = server
        .request(
            "DELETE",
            &format!("/api/users/me/sandboxes/{sandbox_id}"),
            Some(&bob_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    // Alice's sandbox is unaffected.
    let (_, listed) = server
        .request("GET", "/api/users/me/sandboxes", Some(&alice_token), None)
        .await;
    assert_eq!(listed["sandboxes"].as_array().unwrap().len(), 1);
}
