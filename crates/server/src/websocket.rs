//! WebSocket handling

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use agora_protocol::{ChatAuthor, ClientMessage, GroupChatMessage, GroupId, ServerMessage};

use crate::auth::AuthenticatedSession;
use crate::connection::Connection;
use crate::state::AppState;
use crate::store::{self, Profile};

/// WebSocket upgrade handler.
///
/// The session is validated before the upgrade; a rejected handshake gets the
/// JSON auth error and never reaches the registry.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    match state.validator.validate_headers(&headers).await {
        Ok(session) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, session))
            .into_response(),
        Err(e) => {
            warn!(
                component = "websocket",
                event = "ws.handshake.rejected",
                error = %e,
                "WebSocket handshake rejected"
            );
            e.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, session: AuthenticatedSession) {
    let (ws_tx, ws_rx) = socket.split();
    let conn = Arc::new(Connection::new(session.user_id, ws_tx));
    run_session(state, conn, ws_rx).await;
}

/// Drive one registered connection until its transport ends.
///
/// Inbound frames are handled one at a time in arrival order. Fanout to other
/// connections is spawned, never awaited here, so another peer's stalled
/// socket cannot hold up this loop. On exit the connection is deregistered
/// (unless a newer one already took its slot), closed, and everyone else is
/// told.
pub async fn run_session<S>(state: AppState, conn: Arc<Connection>, mut inbound: S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let user_id = conn.user_id();
    let conn_id = conn.id();

    if let Some(previous) = state.registry.register(user_id, conn.clone()) {
        info!(
            component = "websocket",
            event = "ws.connection.superseded",
            user_id,
            connection_id = previous.id(),
            replaced_by = conn_id,
            "Closing previous connection for user"
        );
        tokio::spawn(async move { previous.close_superseded().await });
    }

    info!(
        component = "websocket",
        event = "ws.connection.opened",
        user_id,
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    state.presence.send_presence_snapshot(&conn).await;
    state.presence.broadcast_presence();

    while let Some(result) = inbound.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                if let Err(e) = conn.send(Message::Pong(data)).await {
                    debug!(
                        component = "websocket",
                        event = "ws.pong.failed",
                        connection_id = conn_id,
                        error = %e,
                        "Pong not delivered"
                    );
                }
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    user_id,
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    user_id,
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        handle_text(&state, &conn, text.as_str()).await;
    }

    let removed = state.registry.deregister(user_id, &conn);
    conn.close().await;

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        user_id,
        connection_id = conn_id,
        removed,
        "WebSocket connection closed"
    );

    state.presence.broadcast_presence();
}

async fn handle_text(state: &AppState, conn: &Arc<Connection>, text: &str) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(
                component = "websocket",
                event = "ws.message.parse_failed",
                connection_id = conn.id(),
                error = %e,
                payload_bytes = text.len(),
                payload_preview = %truncate_for_log(text, 240),
                "Failed to parse client message"
            );
            return;
        }
    };

    match client_msg {
        ClientMessage::GetOnlineUsers => {
            state.presence.send_presence_snapshot(conn).await;
        }
        ClientMessage::GroupMessage { group_id, content } => {
            handle_group_message(state, conn, group_id, content).await;
        }
        ClientMessage::Unknown => {
            debug!(
                component = "websocket",
                event = "ws.message.unknown_type",
                connection_id = conn.id(),
                payload_preview = %truncate_for_log(text, 240),
                "Ignoring message of unknown type"
            );
        }
    }
}

async fn handle_group_message(
    state: &AppState,
    conn: &Connection,
    group_id: GroupId,
    content: String,
) {
    let user_id = conn.user_id();
    if content.trim().is_empty() {
        debug!(
            component = "websocket",
            event = "ws.group_message.empty",
            user_id,
            group_id,
            "Ignoring empty group message"
        );
        return;
    }

    let saved = store::blocking(&state.store, move |s| {
        let persisted = s.persist_group_message(group_id, user_id, &content)?;
        let profile = s.profile(user_id)?;
        Ok((persisted, profile, content))
    })
    .await;

    let (persisted, profile, content) = match saved {
        Ok(saved) => saved,
        Err(e) => {
            warn!(
                component = "websocket",
                event = "ws.group_message.store_failed",
                user_id,
                group_id,
                error = %e,
                "Group message not delivered"
            );
            return;
        }
    };

    let user = match profile {
        Some(profile) => chat_author(profile),
        None => {
            warn!(
                component = "websocket",
                event = "ws.group_message.profile_missing",
                user_id,
                group_id,
                "Sender has no profile"
            );
            ChatAuthor {
                id: user_id,
                first_name: String::new(),
                last_name: String::new(),
                avatar: String::new(),
                nickname: String::new(),
            }
        }
    };

    info!(
        component = "websocket",
        event = "ws.group_message.persisted",
        user_id,
        group_id,
        message_id = persisted.id,
        "Group message persisted"
    );

    state
        .notifier
        .broadcast_message(ServerMessage::NewGroupMessage {
            data: GroupChatMessage {
                id: persisted.id,
                group_id,
                user_id,
                content,
                created_at: persisted.created_at,
                user,
            },
        });
}

fn chat_author(profile: Profile) -> ChatAuthor {
    ChatAuthor {
        id: profile.user_id,
        first_name: profile.first_name,
        last_name: profile.last_name,
        avatar: profile.avatar,
        nickname: profile.nickname,
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
