//! HTTP router

use axum::{
    extract::State,
    Extension,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use agora_protocol::ServerMessage;

use crate::auth::{require_session, AuthenticatedSession};
use crate::state::AppState;
use crate::websocket::ws_handler;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/presence", get(presence_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn presence_handler(
    State(state): State<AppState>,
    Extension(session): Extension<AuthenticatedSession>,
) -> Response {
    match state.presence.presence_view().await {
        Ok(users) => {
            debug!(
                component = "http",
                event = "http.presence.served",
                requested_by = session.user_id,
                online = users.len(),
                "Presence served"
            );
            Json(ServerMessage::OnlineUsers { users }).into_response()
        }
        Err(e) => {
            warn!(
                component = "http",
                event = "http.presence.failed",
                requested_by = session.user_id,
                error = %e,
                "Presence lookup failed"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::to_bytes;
    use chrono::Utc;
    use serde_json::Value;

    use super::*;
    use crate::auth::FingerprintPolicy;
    use crate::connection::test_support::channel_connection;
    use crate::store::test_support::*;

    fn session(user_id: i64) -> Extension<AuthenticatedSession> {
        Extension(AuthenticatedSession {
            user_id,
            expires_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn presence_endpoint_lists_online_users_for_the_caller() {
        let store = memory_store();
        insert_user(&store, 1, "Ada", "Lovelace", Some("ada"));
        insert_user(&store, 2, "Alan", "Turing", None);
        let state = AppState::new(store, FingerprintPolicy::Enforce);
        let (conn, _rx) = channel_connection(2);
        state.registry.register(2, conn);

        let response = presence_handler(State(state), session(1)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json: Value = serde_json::from_slice(&body).expect("JSON body");
        assert_eq!(json["type"], "online_users");
        assert_eq!(json["users"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["users"][0]["userId"], 2);
        assert_eq!(json["users"][0]["firstName"], "Alan");
    }

    #[tokio::test]
    async fn presence_endpoint_reports_storage_failure() {
        let state = AppState::new(Arc::new(BrokenStore), FingerprintPolicy::Enforce);
        let (conn, _rx) = channel_connection(1);
        state.registry.register(1, conn);

        let response = presence_handler(State(state), session(1)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
