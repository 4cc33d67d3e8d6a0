#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use tower::ServiceExt;

use webhook_relay::auth::AdminCredentials;
use webhook_relay::http_server::{admin_router, public_router};
use webhook_relay::types::Request as Captured;
use webhook_relay::{AppState, ConfigStorage, ForwardUrl, Forwarder, JsonStore, RequestsStorage, Webhook};

pub const ADMIN: &str = "/__admin__";
pub const USERNAME: &str = "ops";
pub const PASSWORD: &str = "s3cret";

pub struct TestRelay {
    pub store: Arc<JsonStore>,
    pub state: AppState,
}

impl TestRelay {
    pub fn new() -> Self {
        let store = Arc::new(JsonStore::in_memory());
        let forwarder = Forwarder::new().expect("forwarder");
        let state = AppState::with_store(store.clone(), forwarder);
        Self { store, state }
    }

    /// Public and admin routes on one router, as with a shared listener.
    pub fn router(&self) -> Router {
        let credentials = AdminCredentials::new(USERNAME, PASSWORD);
        public_router(self.state.clone()).merge(admin_router(self.state.clone(), credentials, ADMIN))
    }

    /// Store and register a webhook without going through the admin API.
    pub async fn install(&self, mut webhook: Webhook) -> Webhook {
        webhook.normalize();
        self.store.add_webhook(webhook.clone()).await.expect("store webhook");
        self.state.registry.register(webhook.clone()).expect("register webhook");
        webhook
    }

    pub async fn captured(&self) -> Vec<Captured> {
        self.store.get_oldest_requests(usize::MAX).await.expect("list requests")
    }

    /// Poll until at least `count` requests are captured. Detached targets
    /// capture after the caller already has its response.
    pub async fn wait_for_captures(&self, count: usize) -> Vec<Captured> {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let captured = self.captured().await;
            if captured.len() >= count || Instant::now() > deadline {
                return captured;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn webhook(method: &str, path: &str, forward_urls: Vec<ForwardUrl>) -> Webhook {
    Webhook {
        id: webhook_relay::types::generate_id("w"),
        name: format!("{method} {path}"),
        enabled: true,
        method: method.to_string(),
        path: path.to_string(),
        forward_urls,
        created_at: Utc::now(),
    }
}

pub fn target(url: impl Into<String>) -> ForwardUrl {
    ForwardUrl::new(url, Duration::from_secs(2))
}

pub fn basic_auth(username: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

pub fn admin_request(method: &str, path: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(format!("{ADMIN}{path}"))
        .header("authorization", basic_auth(USERNAME, PASSWORD));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.expect("router is infallible");
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX).await.expect("response body");
    TestResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    }
}
