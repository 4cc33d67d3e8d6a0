//! The route handler behind every registered webhook.
//!
//! Each call snapshots the live definition, buffers the body once and spawns
//! one task per forward target. Exactly one target (the validated
//! `returnAsResponse` one) owns the `oneshot` sender that decides the
//! caller's response. Targets flagged `waitTillCompletion` are joined before
//! the handler returns; the rest are detached and may still be running after
//! the caller has its answer.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request as HttpRequest, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use http_body_util::LengthLimitError;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::error::Result;
use crate::forward::{capture_headers, ForwardedResponse, Outbound};
use crate::types::{generate_id, ForwardUrl, Request, RouteKey, Webhook};
use crate::AppState;

/// Default cap on a buffered inbound body (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

type Responder = oneshot::Sender<Result<ForwardedResponse>>;

/// One inbound call, shared read-only by its forward tasks.
struct InboundCall {
    call_id: String,
    method: String,
    path: String,
    headers: HeaderMap,
    body: Bytes,
}

pub async fn handle_webhook(State(state): State<AppState>, request: HttpRequest<Body>) -> Response {
    let call_id = generate_id("c");
    let (parts, body) = request.into_parts();
    let key = RouteKey::new(parts.method.as_str(), parts.uri.path());
    let span = tracing::info_span!("webhook_call", call_id = %call_id, route = %key);

    async move {
        let Some(webhook) = state.registry.lookup(&key) else {
            tracing::debug!("no webhook registered for route");
            return StatusCode::NOT_FOUND.into_response();
        };
        if !webhook.enabled {
            tracing::warn!(webhook_id = %webhook.id, "call to disabled webhook");
            return (StatusCode::NOT_FOUND, "404 Disabled").into_response();
        }

        let body = match to_bytes(body, state.max_body_bytes).await {
            Ok(body) => body,
            Err(e) if exceeds_limit(&e) => {
                tracing::warn!(limit = state.max_body_bytes, "request body too large");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
            Err(e) => {
                tracing::error!(error = %e, "could not read request body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        tracing::debug!(bytes = body.len(), "request body buffered");

        let call = Arc::new(InboundCall {
            call_id,
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            headers: parts.headers,
            body,
        });

        if webhook.forward_urls.is_empty() {
            capture(&state, &call, &webhook.id, None, None).await;
            return StatusCode::OK.into_response();
        }

        fan_out(state, call, webhook).await
    }
    .instrument(span)
    .await
}

fn exceeds_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

async fn fan_out(state: AppState, call: Arc<InboundCall>, webhook: Webhook) -> Response {
    let (response_tx, response_rx) = oneshot::channel();
    let mut response_tx = Some(response_tx);
    let mut barrier = Vec::new();

    for furl in &webhook.forward_urls {
        let responder = if furl.return_as_response {
            response_tx.take()
        } else {
            None
        };
        let span = tracing::info_span!("forward", target_id = %furl.id, url = %furl.url);
        let task = tokio::spawn(
            forward_one(
                state.clone(),
                call.clone(),
                webhook.id.clone(),
                webhook.method.clone(),
                furl.clone(),
                responder,
            )
            .instrument(span),
        );
        if furl.wait_till_completion {
            barrier.push(task);
        }
    }
    // Unused only if the definition bypassed validation; the receiver then
    // resolves immediately instead of hanging.
    drop(response_tx);

    let (outcome, waited) = tokio::join!(response_rx, join_all(barrier));
    for joined in waited {
        if let Err(e) = joined {
            tracing::error!(error = %e, "forward task did not complete");
        }
    }

    match outcome {
        Ok(Ok(response)) => response.into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "response target failed");
            e.into_response()
        }
        Err(_) => {
            tracing::error!("response target finished without a result");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn forward_one(
    state: AppState,
    call: Arc<InboundCall>,
    webhook_id: String,
    method: String,
    furl: ForwardUrl,
    responder: Option<Responder>,
) {
    let outcome = state
        .forwarder
        .forward(Outbound {
            method: &method,
            url: &furl.url,
            headers: &call.headers,
            body: call.body.clone(),
            timeout: furl.timeout,
        })
        .await;

    match outcome {
        Err(e) => {
            tracing::warn!(error = %e, "forward failed");
            capture(&state, &call, &webhook_id, Some(furl), Some(e.to_string())).await;
            if let Some(tx) = responder {
                let _ = tx.send(Err(e));
            }
        }
        Ok(response) => {
            tracing::debug!(status = %response.status, "target responded");
            if let Some(tx) = responder {
                if tx.send(Ok(response)).is_err() {
                    tracing::warn!("caller gone before the response could be relayed");
                    let failure = "caller disconnected before the response was relayed";
                    capture(&state, &call, &webhook_id, Some(furl.clone()), Some(failure.into()))
                        .await;
                    return;
                }
            }
            if furl.keep_successful_requests {
                capture(&state, &call, &webhook_id, Some(furl), None).await;
            }
        }
    }
}

/// Persist one capture. Storage errors are logged and swallowed.
async fn capture(
    state: &AppState,
    call: &InboundCall,
    webhook_id: &str,
    forward_url: Option<ForwardUrl>,
    failure: Option<String>,
) {
    let request = Request {
        id: generate_id("r"),
        call_id: call.call_id.clone(),
        method: call.method.clone(),
        path: call.path.clone(),
        headers: capture_headers(&call.headers),
        body: call.body.clone(),
        forward_url,
        from_webhook_id: webhook_id.to_string(),
        failure,
        created_at: Utc::now(),
    };
    let request_id = request.id.clone();

    match state.requests.store_request(request).await {
        Ok(()) => tracing::info!(request_id = %request_id, "request captured"),
        Err(e) => tracing::error!(error = %e, webhook_id = %webhook_id, "error saving request"),
    }
}
