//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages the socket loop sends on its own behalf.
///
/// Collaborator notifications use [`Notification`] instead, since their
/// `type` tag is chosen by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Presence snapshot, sorted by nickname then user id
    OnlineUsers { users: Vec<OnlineUser> },

    /// A group chat message that has already been persisted
    NewGroupMessage { data: GroupChatMessage },
}
