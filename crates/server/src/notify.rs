//! Notification routing
//!
//! Best-effort delivery to connected users. A recipient that is offline is
//! skipped silently; nothing is queued. A recipient whose write fails is
//! deregistered (only if it is still the registered connection) so later
//! lookups report the user offline.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_protocol::{GroupId, Notification, NotificationKind, ServerMessage, UserId};

use crate::connection::Connection;
use crate::error::DeliveryError;
use crate::registry::ConnectionRegistry;
use crate::store::{self, SharedStore};

#[derive(Clone)]
pub struct Notifier {
    registry: Arc<ConnectionRegistry>,
    store: SharedStore,
}

impl Notifier {
    pub fn new(registry: Arc<ConnectionRegistry>, store: SharedStore) -> Self {
        Self { registry, store }
    }

    /// Deliver a notification to one user if they are online.
    pub async fn send_to_user(&self, user_id: UserId, notification: &Notification) {
        match encode(notification) {
            Ok(payload) => {
                self.send_payload_to_user(user_id, payload, &notification.kind)
                    .await;
            }
            Err(e) => warn!(
                component = "notify",
                event = "notify.encode_failed",
                user_id,
                kind = %notification.kind,
                error = %e,
                "Notification dropped"
            ),
        }
    }

    async fn send_payload_to_user(
        &self,
        user_id: UserId,
        payload: Utf8Bytes,
        kind: &NotificationKind,
    ) {
        let Some(conn) = self.registry.get(user_id) else {
            debug!(
                component = "notify",
                event = "notify.recipient_offline",
                user_id,
                kind = %kind,
                "Recipient offline, notification skipped"
            );
            return;
        };

        if self.deliver(&conn, payload).await {
            debug!(
                component = "notify",
                event = "notify.delivered",
                user_id,
                connection_id = conn.id(),
                kind = %kind,
                "Notification delivered"
            );
        }
    }

    /// Fan a notification out to every member of a group.
    ///
    /// Runs on its own task so the caller never waits on membership lookup or
    /// delivery. The handle is returned for callers that do want to wait;
    /// dropping it leaves the task running.
    pub fn broadcast_to_group(
        &self,
        group_id: GroupId,
        kind: impl Into<NotificationKind>,
        data: Value,
    ) -> JoinHandle<()> {
        let notifier = self.clone();
        let notification = Notification::new(kind, data);

        tokio::spawn(async move {
            let members =
                match store::blocking(&notifier.store, move |s| s.group_member_ids(group_id)).await {
                    Ok(members) => members,
                    Err(e) => {
                        warn!(
                            component = "notify",
                            event = "notify.group.members_failed",
                            group_id,
                            kind = %notification.kind,
                            error = %e,
                            "Could not resolve group members, notification dropped"
                        );
                        return;
                    }
                };

            let payload = match encode(&notification) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        component = "notify",
                        event = "notify.encode_failed",
                        group_id,
                        kind = %notification.kind,
                        error = %e,
                        "Notification dropped"
                    );
                    return;
                }
            };

            info!(
                component = "notify",
                event = "notify.group.broadcast",
                group_id,
                kind = %notification.kind,
                members = members.len(),
                "Broadcasting to group"
            );

            join_all(members.into_iter().map(|member| {
                notifier.send_payload_to_user(member, payload.clone(), &notification.kind)
            }))
            .await;
        })
    }

    /// Write a pre-serialized payload to every registered connection.
    ///
    /// Runs on its own task, like group fanout.
    pub fn broadcast_to_all(&self, payload: Utf8Bytes) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.deliver_to_all(payload).await })
    }

    /// Serialize a server message once and broadcast it to everyone.
    pub fn broadcast_message(&self, message: ServerMessage) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            match serde_json::to_string(&message) {
                Ok(json) => notifier.deliver_to_all(json.into()).await,
                Err(e) => warn!(
                    component = "notify",
                    event = "notify.encode_failed",
                    error = %e,
                    "Broadcast dropped"
                ),
            }
        })
    }

    async fn deliver_to_all(&self, payload: Utf8Bytes) {
        let recipients = self.registry.connections();
        debug!(
            component = "notify",
            event = "notify.broadcast_all",
            recipients = recipients.len(),
            "Broadcasting to all connections"
        );
        join_all(
            recipients
                .iter()
                .map(|conn| self.deliver(conn, payload.clone())),
        )
        .await;
    }

    /// Write to one connection. On failure drop it from the registry and, if
    /// it was still the registered one, close it so its read loop ends too.
    async fn deliver(&self, conn: &Arc<Connection>, payload: Utf8Bytes) -> bool {
        match conn.send_text(payload).await {
            Ok(()) => true,
            Err(e) => {
                let error = DeliveryError::from(e);
                let removed = self.registry.deregister(conn.user_id(), conn);
                warn!(
                    component = "notify",
                    event = "notify.write_failed",
                    user_id = conn.user_id(),
                    connection_id = conn.id(),
                    removed,
                    error = %error,
                    "Delivery failed"
                );
                if removed {
                    conn.close().await;
                }
                false
            }
        }
    }
}

fn encode(notification: &Notification) -> Result<Utf8Bytes, DeliveryError> {
    Ok(serde_json::to_string(notification)?.into())
}
