//! Session validation and the auth middleware.
//!
//! A client proves its identity with the `session_id` cookie set at login
//! (or `Authorization: Bearer <token>` for non-browser clients). The token is
//! resolved against the sessions table on every WebSocket handshake and on
//! every request to a gated HTTP route.
//!
//! When fingerprint checking is enabled, a session presented by a different
//! User-Agent than the one that created it is deleted and refused.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use tracing::{debug, warn};

use agora_protocol::UserId;

use crate::error::{AuthError, InvalidReason};
use crate::state::AppState;
use crate::store::{self, SharedStore};

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintPolicy {
    /// Refuse and delete sessions presented by a different client
    Enforce,
    Ignore,
}

/// Identity bound to a request or connection after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// What a request presents for validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub fingerprint: String,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        Self {
            token: session_token(headers),
            fingerprint: fingerprint(user_agent),
        }
    }
}

/// Token from the session cookie, falling back to a bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string());

    let token = from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
    })?;

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Lowercase hex SHA-256 of the User-Agent
pub fn fingerprint(user_agent: &str) -> String {
    hex::encode(digest(&SHA256, user_agent.as_bytes()))
}

pub struct SessionValidator {
    store: SharedStore,
    policy: FingerprintPolicy,
}

impl SessionValidator {
    pub fn new(store: SharedStore, policy: FingerprintPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn validate_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthenticatedSession, AuthError> {
        self.validate(&Credentials::from_headers(headers)).await
    }

    pub async fn validate(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthenticatedSession, AuthError> {
        let token = credentials
            .token
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        let record = {
            let token = token.clone();
            store::blocking(&self.store, move |s| s.resolve_session(&token)).await?
        }
        .ok_or(AuthError::SessionInvalid(InvalidReason::Unknown))?;

        if record.expires_at <= Utc::now() {
            debug!(
                component = "auth",
                event = "auth.session.expired",
                user_id = record.user_id,
                "Session expired"
            );
            return Err(AuthError::SessionInvalid(InvalidReason::Expired));
        }

        if self.policy == FingerprintPolicy::Enforce {
            if let Some(expected) = record.fingerprint.as_deref() {
                if expected != credentials.fingerprint {
                    warn!(
                        component = "auth",
                        event = "auth.session.fingerprint_mismatch",
                        user_id = record.user_id,
                        "Session presented by a different client, invalidating"
                    );
                    let delete =
                        store::blocking(&self.store, move |s| s.delete_session(&token)).await;
                    if let Err(e) = delete {
                        warn!(
                            component = "auth",
                            event = "auth.session.delete_failed",
                            user_id = record.user_id,
                            error = %e,
                            "Failed to delete invalidated session"
                        );
                    }
                    return Err(AuthError::SessionInvalid(InvalidReason::FingerprintMismatch));
                }
            }
        }

        Ok(AuthenticatedSession {
            user_id: record.user_id,
            expires_at: record.expires_at,
        })
    }
}

/// Axum middleware gating collaborator routes.
///
/// On success the [`AuthenticatedSession`] is available to handlers as an
/// `Extension`.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    match state.validator.validate_headers(req.headers()).await {
        Ok(session) => {
            req.extensions_mut().insert(session);
            Ok(next.run(req).await)
        }
        Err(e) => {
            debug!(
                component = "auth",
                event = "auth.request.rejected",
                path = %req.uri().path(),
                error = %e,
                "Request rejected"
            );
            Err(e)
        }
    }
}
