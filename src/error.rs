//! Error taxonomy shared by the dispatch engine, replay and administration.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A webhook definition broke a structural rule.
    #[error("invalid webhook definition: {0}")]
    InvalidDefinition(String),

    /// Unknown webhook, request or forward target.
    #[error("not found: {0}")]
    NotFound(String),

    /// Outbound connect/write/read failure or timeout.
    #[error("forwarding failed: {0}")]
    Transport(String),

    /// A storage collaborator call failed.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl RelayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidDefinition(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        if matches!(self, Self::Unauthorized) {
            return (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"admin\"")],
                body,
            )
                .into_response();
        }
        (status, body).into_response()
    }
}
