use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Broadcast event name for typing updates.
pub const TYPING_EVENT: &str = "typing";
/// Broadcast event name for new conversation messages.
pub const MESSAGE_EVENT: &str = "message";
/// Broadcast event name for post like changes.
pub const LIKE_EVENT: &str = "like";

pub fn typing_channel(conversation_id: Uuid) -> String {
    format!("typing-{}", conversation_id)
}

pub fn conversation_channel(conversation_id: Uuid) -> String {
    format!("conversation-{}", conversation_id)
}

pub fn post_channel(post_id: Uuid) -> String {
    format!("post-{}", post_id)
}

const CONVERSATION_PREFIXES: &[&str] = &["typing-", "conversation-"];

/// Channels that carry a conversation's traffic and are limited to its participants.
pub fn is_conversation_channel(channel: &str) -> bool {
    CONVERSATION_PREFIXES.iter().any(|p| channel.starts_with(p))
}

/// Conversation id of a `typing-`/`conversation-` channel. None for other
/// channels and for malformed ids.
pub fn channel_conversation_id(channel: &str) -> Option<Uuid> {
    CONVERSATION_PREFIXES
        .iter()
        .find_map(|p| channel.strip_prefix(p))
        .and_then(|id| id.parse().ok())
}

/// Frames sent FROM server TO client over the realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    /// Connection authenticated and ready for joins
    Ready { user_id: Uuid },

    /// The connection now receives broadcasts on `channel`
    Joined { channel: String },

    /// The connection no longer receives broadcasts on `channel`
    Left { channel: String },

    /// A broadcast published by another connection on a joined channel
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },

    /// A command was rejected; the connection stays open
    Error { message: String },
}

/// Frames sent FROM client TO server over the realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum RealtimeCommand {
    Join { channel: String },

    Leave { channel: String },

    /// Publish to every other connection joined to `channel`.
    /// Only allowed on channels this connection has joined.
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },
}

/// Payload of a `typing` broadcast on `typing-<conversationId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: Uuid,
    pub display_name: String,
    pub is_typing: bool,
}

/// Payload of a `like` broadcast on `post-<postId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikePayload {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub liked: bool,
    pub likes_count: u64,
}
