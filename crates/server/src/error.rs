//! Error types for session validation and message delivery.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why a resolved session was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// No session row for the token
    Unknown,
    Expired,
    /// The session was issued to a different client
    FingerprintMismatch,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            InvalidReason::Unknown => "unknown token",
            InvalidReason::Expired => "expired",
            InvalidReason::FingerprintMismatch => "fingerprint mismatch",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid session: {0}")]
    SessionInvalid(InvalidReason),

    #[error("session lookup failed: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::NotAuthenticated | AuthError::SessionInvalid(_) => StatusCode::UNAUTHORIZED,
            AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Mirrors the wording the web client expects.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::NotAuthenticated => "Unauthorized",
            AuthError::SessionInvalid(InvalidReason::FingerprintMismatch) => "Session invalidated",
            AuthError::SessionInvalid(_) => "Invalid session",
            AuthError::Storage(_) => "Failed to verify session",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.client_message(),
        }));
        (self.status(), body).into_response()
    }
}

/// Failure to push one payload to one connection
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport write failed: {0}")]
    Transport(#[from] axum::Error),
}
