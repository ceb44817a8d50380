//! Presence broadcast
//!
//! Builds the online-user list from a registry snapshot joined with profile
//! data, and pushes it to one or every connection. The payload is serialized
//! once per computation and the same bytes are written to each recipient.
//!
//! Broadcasts run on their own task so a slow or stalled recipient never holds
//! up the session loop that triggered them.
//!
//! Write failures here are only logged. Removing a dead connection is left to
//! its own session loop, which sees the same transport error on its read side.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use agora_protocol::{OnlineUser, ServerMessage, UserId};

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;
use crate::store::{self, Profile, SharedStore};

#[derive(Clone)]
pub struct PresenceEngine {
    registry: Arc<ConnectionRegistry>,
    store: SharedStore,
}

impl PresenceEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, store: SharedStore) -> Self {
        Self { registry, store }
    }

    /// Current presence view, sorted by nickname then user id.
    pub async fn presence_view(&self) -> anyhow::Result<Vec<OnlineUser>> {
        let online = self.registry.snapshot();
        if online.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<UserId> = online.iter().copied().collect();
        let profiles = store::blocking(&self.store, move |s| s.profiles(&ids)).await?;
        Ok(build_view(&online, profiles))
    }

    async fn presence_payload(&self) -> anyhow::Result<(Utf8Bytes, usize)> {
        let users = self.presence_view().await?;
        let count = users.len();
        let json = serde_json::to_string(&ServerMessage::OnlineUsers { users })?;
        Ok((json.into(), count))
    }

    /// Push the presence view to every registered connection.
    ///
    /// The handle is returned for callers that want to wait; dropping it
    /// leaves the broadcast running.
    pub fn broadcast_presence(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let (payload, online) = match engine.presence_payload().await {
                Ok(built) => built,
                Err(e) => {
                    warn!(
                        component = "presence",
                        event = "presence.broadcast.build_failed",
                        error = %e,
                        "Presence broadcast abandoned"
                    );
                    return;
                }
            };

            let recipients = engine.registry.connections();
            debug!(
                component = "presence",
                event = "presence.broadcast",
                online,
                recipients = recipients.len(),
                "Broadcasting presence"
            );

            join_all(
                recipients
                    .iter()
                    .map(|conn| write_presence(conn, payload.clone())),
            )
            .await;
        })
    }

    /// Push the presence view to a single connection.
    pub async fn send_presence_snapshot(&self, conn: &Connection) {
        match self.presence_payload().await {
            Ok((payload, _)) => write_presence(conn, payload).await,
            Err(e) => warn!(
                component = "presence",
                event = "presence.snapshot.build_failed",
                connection_id = conn.id(),
                user_id = conn.user_id(),
                error = %e,
                "Presence snapshot abandoned"
            ),
        }
    }
}

async fn write_presence(conn: &Connection, payload: Utf8Bytes) {
    if let Err(e) = conn.send_text(payload).await {
        debug!(
            component = "presence",
            event = "presence.write_failed",
            connection_id = conn.id(),
            user_id = conn.user_id(),
            error = %e,
            "Presence write failed"
        );
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Join profiles against the online set and sort for stable output.
///
/// Users with no profile row are left out.
fn build_view(online: &BTreeSet<UserId>, profiles: Vec<Profile>) -> Vec<OnlineUser> {
    let mut found = BTreeSet::new();
    let mut users: Vec<OnlineUser> = profiles
        .into_iter()
        .filter(|p| online.contains(&p.user_id) && found.insert(p.user_id))
        .map(|p| OnlineUser {
            user_id: p.user_id,
            first_name: p.first_name,
            last_name: p.last_name,
            nickname: non_empty(p.nickname),
            avatar: non_empty(p.avatar),
            online: true,
        })
        .collect();

    for missing in online.difference(&found) {
        warn!(
            component = "presence",
            event = "presence.profile_missing",
            user_id = *missing,
            "Online user has no profile, leaving out of presence"
        );
    }

    users.sort_by(|a, b| {
        let a_key = a.nickname.as_deref().unwrap_or("");
        let b_key = b.nickname.as_deref().unwrap_or("");
        a_key.cmp(b_key).then(a.user_id.cmp(&b.user_id))
    });
    users
}
