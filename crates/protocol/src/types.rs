//! Core types shared across the protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable identifier of a user account
pub type UserId = i64;

/// Identifier of a group
pub type GroupId = i64;

/// One entry of a presence snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub online: bool,
}

/// Author block embedded in chat messages.
///
/// Keys are PascalCase because the web client reads the user record shape
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatAuthor {
    #[serde(rename = "ID")]
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
    pub nickname: String,
}

/// A persisted group chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChatMessage {
    pub id: i64,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user: ChatAuthor,
}

/// Notification tags emitted by the group and event handlers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    GroupInvitation,
    GroupJoined,
    GroupJoinRequest,
    JoinRequestApproved,
    JoinRequestRejected,
    NewGroupEvent,
    EventDeleted,
    EventResponseUpdate,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::GroupInvitation => "group_invitation",
            NotificationKind::GroupJoined => "group_joined",
            NotificationKind::GroupJoinRequest => "group_join_request",
            NotificationKind::JoinRequestApproved => "join_request_approved",
            NotificationKind::JoinRequestRejected => "join_request_rejected",
            NotificationKind::NewGroupEvent => "new_group_event",
            NotificationKind::EventDeleted => "event_deleted",
            NotificationKind::EventResponseUpdate => "event_response_update",
            NotificationKind::Other(tag) => tag,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "group_invitation" => NotificationKind::GroupInvitation,
            "group_joined" => NotificationKind::GroupJoined,
            "group_join_request" => NotificationKind::GroupJoinRequest,
            "join_request_approved" => NotificationKind::JoinRequestApproved,
            "join_request_rejected" => NotificationKind::JoinRequestRejected,
            "new_group_event" => NotificationKind::NewGroupEvent,
            "event_deleted" => NotificationKind::EventDeleted,
            "event_response_update" => NotificationKind::EventResponseUpdate,
            _ => NotificationKind::Other(tag),
        }
    }
}

impl From<&str> for NotificationKind {
    fn from(tag: &str) -> Self {
        NotificationKind::from(tag.to_string())
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed, timestamped notification routed to one or many users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Build a notification stamped with the current time
    pub fn new(kind: impl Into<NotificationKind>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_serializes_type_data_and_rfc3339_timestamp() {
        let notification = Notification::new(
            NotificationKind::EventDeleted,
            json!({"group_id": 4, "event_id": 9}),
        );

        let value = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(value["type"], "event_deleted");
        assert_eq!(value["data"]["event_id"], 9);

        let stamp = value["timestamp"].as_str().expect("timestamp is a string");
        DateTime::parse_from_rfc3339(stamp).expect("timestamp is RFC3339");
    }

    #[test]
    fn unknown_notification_tags_pass_through() {
        let notification = Notification::new("post_liked", json!({}));
        assert_eq!(
            notification.kind,
            NotificationKind::Other("post_liked".to_string())
        );

        let value = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(value["type"], "post_liked");
    }

    #[test]
    fn known_tags_parse_into_named_variants() {
        assert_eq!(
            NotificationKind::from("group_invitation"),
            NotificationKind::GroupInvitation
        );
        assert_eq!(
            NotificationKind::from("join_request_rejected"),
            NotificationKind::JoinRequestRejected
        );
        assert_eq!(
            NotificationKind::EventResponseUpdate.to_string(),
            "event_response_update"
        );
    }
}
