//! Outbound request crafting and execution, shared by dispatch and replay.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::error::{RelayError, Result};
use crate::types::Headers;

/// Headers the local server recomputes for the mirrored response.
const HOP_BY_HOP: [HeaderName; 3] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Everything needed to call one target once.
#[derive(Debug, Clone)]
pub struct Outbound<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

/// A downstream response, fully read.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for ForwardedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if !HOP_BY_HOP.contains(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        response
    }
}

/// The shared outbound client. Cloning is cheap and shares the pool.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Send `req` and read the whole response body, all within `req.timeout`.
    pub async fn forward(&self, req: Outbound<'_>) -> Result<ForwardedResponse> {
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|_| RelayError::transport(format!("invalid method {:?}", req.method)))?;
        let mut headers = HeaderMap::new();
        transfer_headers(&mut headers, req.headers);

        let url = req.url;
        let body = req.body;
        let exchange = async {
            let response = self
                .client
                .request(method, url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|e| RelayError::transport(format!("request to {url} failed: {e}")))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                RelayError::transport(format!("reading response from {url} failed: {e}"))
            })?;

            Ok::<_, RelayError>(ForwardedResponse {
                status,
                headers,
                body,
            })
        };

        match tokio::time::timeout(req.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::transport(format!(
                "no response from {url} within {}ms",
                req.timeout.as_millis()
            ))),
        }
    }
}

/// Copy every header from `source` into `dest` except `Host`.
pub fn transfer_headers(dest: &mut HeaderMap, source: &HeaderMap) {
    for (name, value) in source {
        if name == header::HOST {
            continue;
        }
        dest.append(name.clone(), value.clone());
    }
}

/// Snapshot inbound headers for storage. Non-UTF-8 values are skipped.
pub fn capture_headers(source: &HeaderMap) -> Headers {
    let mut captured = Headers::new();
    for (name, value) in source {
        if let Ok(value) = value.to_str() {
            captured
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    captured
}

/// Rebuild a header map from a stored snapshot, dropping unparseable entries.
pub fn restore_headers(captured: &Headers) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in captured {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}
