//! Operator HTTP surface: webhook CRUD, captured requests and replay.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{require_admin, AdminCredentials};
use crate::error::{RelayError, Result};
use crate::types::{generate_id, ForwardUrl, Replay, RequestView, Webhook};
use crate::validation::validate_webhook;
use crate::AppState;

const DEFAULT_REQUEST_COUNT: usize = 100;

/// Create/update payload. On update an omitted field keeps its stored value;
/// a method or path different from the stored one is rejected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub forward_urls: Option<Vec<ForwardUrl>>,
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub count: Option<usize>,
}

pub fn router(state: AppState, credentials: AdminCredentials) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/webhooks/{id}",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route("/webhooks/{id}/enable", post(enable_webhook))
        .route("/webhooks/{id}/disable", post(disable_webhook))
        .route("/requests/newest", get(newest_requests))
        .route("/requests/oldest", get(oldest_requests))
        .route("/requests/replay", post(replay_request))
        .route("/requests/{id}", get(get_request).delete(delete_request))
        .route_layer(middleware::from_fn_with_state(credentials, require_admin))
        .with_state(state)
}

async fn hello() -> &'static str {
    "Hello Admin"
}

// ─── Webhooks ────────────────────────────────────────────────────────────────

async fn list_webhooks(State(state): State<AppState>) -> Result<Json<Vec<Webhook>>> {
    Ok(Json(state.config.list_webhooks().await?))
}

async fn get_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Webhook>> {
    Ok(Json(find_webhook(&state, &id).await?))
}

async fn create_webhook(
    State(state): State<AppState>,
    Json(input): Json<WebhookInput>,
) -> Result<Json<Webhook>> {
    let name = input
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| RelayError::invalid("name is required"))?;

    let mut webhook = Webhook {
        id: generate_id("w"),
        name,
        enabled: input.enabled.unwrap_or(true),
        method: input.method.unwrap_or_default(),
        path: input.path.unwrap_or_default(),
        forward_urls: input.forward_urls.unwrap_or_default(),
        created_at: Utc::now(),
    };
    for furl in &mut webhook.forward_urls {
        furl.id = generate_id("f");
    }
    webhook.normalize();
    validate_webhook(&webhook)?;

    let key = webhook.route_key();
    state.config.add_webhook(webhook.clone()).await?;
    state.registry.register(webhook.clone())?;
    tracing::info!(webhook_id = %webhook.id, route = %key, name = %webhook.name, "webhook created");

    Ok(Json(webhook))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<WebhookInput>,
) -> Result<Json<Webhook>> {
    let existing = find_webhook(&state, &id).await?;

    let mut candidate = Webhook {
        id,
        name: input.name.unwrap_or_else(|| existing.name.clone()),
        enabled: input.enabled.unwrap_or(existing.enabled),
        method: input.method.unwrap_or_else(|| existing.method.clone()),
        path: input.path.unwrap_or_else(|| existing.path.clone()),
        forward_urls: input
            .forward_urls
            .unwrap_or_else(|| existing.forward_urls.clone()),
        created_at: existing.created_at,
    };
    candidate.normalize();
    validate_webhook(&candidate)?;

    let updated = state.config.update_webhook(candidate).await?;
    state.registry.register(updated.clone())?;
    tracing::info!(webhook_id = %updated.id, "webhook updated");

    Ok(Json(updated))
}

async fn enable_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Webhook>> {
    let mut webhook = find_webhook(&state, &id).await?;
    webhook.enabled = true;
    validate_webhook(&webhook)?;

    state.config.enable_webhook(&id).await?;
    state.registry.register(webhook.clone())?;
    Ok(Json(webhook))
}

async fn disable_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Webhook>> {
    let mut webhook = find_webhook(&state, &id).await?;
    webhook.enabled = false;

    state.config.disable_webhook(&id).await?;
    state.registry.register(webhook.clone())?;
    Ok(Json(webhook))
}

async fn delete_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let webhook = find_webhook(&state, &id).await?;
    state.config.remove_webhook(&id).await?;
    state.registry.deregister(&webhook.route_key());
    tracing::info!(webhook_id = %id, "webhook deleted");
    Ok(Json(json!({ "deleted": true })))
}

async fn find_webhook(state: &AppState, id: &str) -> Result<Webhook> {
    state
        .config
        .get_webhook(id)
        .await?
        .ok_or_else(|| RelayError::not_found(format!("webhook {id}")))
}

// ─── Requests ────────────────────────────────────────────────────────────────

async fn newest_requests(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Vec<RequestView>>> {
    let count = query.count.unwrap_or(DEFAULT_REQUEST_COUNT);
    let items = state.requests.get_newest_requests(count).await?;
    Ok(Json(items.into_iter().map(RequestView::from).collect()))
}

async fn oldest_requests(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Vec<RequestView>>> {
    let count = query.count.unwrap_or(DEFAULT_REQUEST_COUNT);
    let items = state.requests.get_oldest_requests(count).await?;
    Ok(Json(items.into_iter().map(RequestView::from).collect()))
}

async fn get_request(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<RequestView>> {
    let request = state
        .requests
        .get_request(&id)
        .await?
        .ok_or_else(|| RelayError::not_found(format!("request {id}")))?;
    Ok(Json(request.into()))
}

async fn delete_request(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    state.requests.delete_request(&id).await?;
    Ok(Json(json!({ "deleted": true })))
}

/// Unresolved ids are the operator's mistake here, so they answer 400.
async fn replay_request(State(state): State<AppState>, Json(replay): Json<Replay>) -> Response {
    match state.replayer().replay(&replay).await {
        Ok(response) => response.into_response(),
        Err(RelayError::NotFound(what)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid replay: unknown {what}") })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(request_id = %replay.request_id, error = %e, "replay failed");
            e.into_response()
        }
    }
}
