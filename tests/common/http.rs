/// HTTP testing utilities
use anyhow::Result;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use promhub::http::server::create_router;
use promhub::http::state::HttpServerState;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

use super::TestEngine;

/// Router over a [`TestEngine`], called without a listener.
pub struct TestApp {
    app: axum::Router,
}

impl TestApp {
    pub fn new(engine: &TestEngine) -> Self {
        let state = HttpServerState {
            name: Arc::new("PromHub Test".to_string()),
            store: engine.store.clone(),
            batcher: Some(engine.batcher.clone()),
            storage: engine.storage.clone(),
        };
        let app = create_router(state, 1024 * 1024, Duration::from_secs(5));
        Self { app }
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<TestResponse> {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?;

        let response = self.app.clone().oneshot(request).await?;
        Ok(TestResponse::new(response).await)
    }

    /// Posts one observation for `tenant_id`.
    pub async fn observe(&self, tenant_id: &str, body: serde_json::Value) -> Result<TestResponse> {
        self.post_json(&format!("/api/v1/tenants/{}/observations", tenant_id), body)
            .await
    }

    pub async fn get(&self, path: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())?;

        let response = self.app.clone().oneshot(request).await?;
        Ok(TestResponse::new(response).await)
    }

    pub async fn delete(&self, path: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())?;

        let response = self.app.clone().oneshot(request).await?;
        Ok(TestResponse::new(response).await)
    }
}

/// Test response wrapper for easier assertions
pub struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl TestResponse {
    async fn new(response: axum::response::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_default()
            .to_vec();
        let body = String::from_utf8_lossy(&body_bytes).to_string();

        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_str(&self.body).map_err(Into::into)
    }

    /// Assert response status
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {}, got {}. Body: {}",
            expected, self.status, self.body
        );
        self
    }

    /// Assert the body contains a line
    pub fn assert_line(&self, expected: &str) -> &Self {
        assert!(
            self.body.lines().any(|line| line == expected),
            "Expected line {:?} in body:\n{}",
            expected,
            self.body
        );
        self
    }
}
