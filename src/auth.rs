use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::RelayError;

type HmacSha256 = Hmac<Sha256>;

/// Basic-auth credentials guarding the admin surface.
///
/// Supplied values are compared through an HMAC under a per-process key so
/// the comparison time does not depend on where the strings differ.
#[derive(Clone)]
pub struct AdminCredentials {
    key: Arc<[u8; 16]>,
    username_mac: Vec<u8>,
    password_mac: Vec<u8>,
}

impl AdminCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        let key = Arc::new(*Uuid::new_v4().as_bytes());
        Self {
            username_mac: mac(&key[..], username.as_bytes()),
            password_mac: mac(&key[..], password.as_bytes()),
            key,
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = verify_mac(&self.key[..], username.as_bytes(), &self.username_mac);
        let pass_ok = verify_mac(&self.key[..], password.as_bytes(), &self.password_mac);
        user_ok & pass_ok
    }

    /// Check an `Authorization` header value of the form `Basic <base64>`.
    pub fn verify_header(&self, value: &str) -> bool {
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((username, password)) => self.verify(username, password),
            None => false,
        }
    }
}

fn mac(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    mac.update(value);
    mac.finalize().into_bytes().to_vec()
}

fn verify_mac(key: &[u8], value: &[u8], expected: &[u8]) -> bool {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(value);
    mac.verify_slice(expected).is_ok()
}

/// Middleware rejecting admin calls without valid Basic credentials.
pub async fn require_admin(
    State(credentials): State<AdminCredentials>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| credentials.verify_header(v));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "unauthorized admin call");
        return RelayError::Unauthorized.into_response();
    }
    next.run(request).await
}
