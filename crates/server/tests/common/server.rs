//! Server test harness.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use cinderbox_core::config::AppConfig;
use cinderbox_driver::testing::FakeDriver;
use cinderbox_driver::ContainerDriver;
use cinderbox_engine::Coordinator;
use cinderbox_publisher::FilePublisher;
use cinderbox_registry::{RegistryStore, SqliteStore};
use cinderbox_server::{create_router, AppState, IdentityService};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server with in-memory container runtime and temp-dir storage.
/// Note: #[allow(dead_code)] because each test file compiles common/
/// separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub driver: Arc<FakeDriver>,
    _temp: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        let temp = tempfile::tempdir().expect("failed to create temp directory");

        let registry: Arc<dyn RegistryStore> = Arc::new(
            SqliteStore::new(temp.path().join("registry.db"))
                .await
                .expect("failed to create registry"),
        );
        let driver = Arc::new(FakeDriver::new());
        let publisher = Arc::new(
            FilePublisher::new(temp.path().join("results"))
                .await
                .expect("failed to create publisher"),
        );

        let config = AppConfig::for_testing();
        let coordinator = Arc::new(Coordinator::new(
            config.container.clone(),
            registry.clone(),
            driver.clone() as Arc<dyn ContainerDriver>,
            publisher,
        ));
        let identity = Arc::new(IdentityService::new(registry, &config.auth));

        let state = AppState::new(config, identity, coordinator);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            driver,
            _temp: temp,
        }
    }

    /// Send a JSON request and return (status, parsed body).
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body read failed")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Send a form-encoded request (the login endpoint).
    pub async fn form_request(&self, path: &str, form: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body read failed")
            .to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Register a user and return their id.
    pub async fn register(&self, username: &str) -> uuid::Uuid {
        let (status, body) = self
            .request(
                "POST",
                "/api/register",
                None,
                Some(serde_json::json!({
                    "username": username,
                    "email": format!("{username}@example.test"),
                    "password": "password123",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        body["id"].as_str().unwrap().parse().unwrap()
    }

    /// Log a registered user in and return a bearer token.
    pub async fn login(&self, username: &str) -> String {
        let (status, body) = self
            .form_request(
                "/api/token",
                &format!("username={username}&password=password123"),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["access_token"].as_str().unwrap().to_string()
    }

    /// Register, log in, and fetch the user's API key.
    pub async fn register_with_api_key(&self, username: &str) -> (uuid::Uuid, String, String) {
        let user_id = self.register(username).await;
        let token = self.login(username).await;
        let (status, body) = self
            .request("GET", "/api/users/me/api-key", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let api_key = body["api_key"].as_str().unwrap().to_string();
        (user_id, token, api_key)
    }
}
