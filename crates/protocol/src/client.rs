//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::GroupId;

/// Messages sent from client to server.
///
/// Frames are tagged by `type`. Tags this server does not know decode to
/// [`ClientMessage::Unknown`] instead of failing, so newer clients keep
/// working against an older server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a fresh presence snapshot
    GetOnlineUsers,

    /// Post a chat message to a group
    GroupMessage { group_id: GroupId, content: String },

    #[serde(other)]
    Unknown,
}
