//! Frame types for the Parley protocol.
//!
//! Frames are JSON text messages. Clients send [`InboundFrame`]s; the server
//! answers with [`OutboundFrame`]s, which are told apart by shape (chat
//! messages) or by their `type` field (notices).

use crate::ids::{MessageId, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Message kind used when the client does not send one.
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

/// Treat an absent, `null` or nil-UUID room id as "no room".
fn nil_room_as_none<'de, D>(deserializer: D) -> Result<Option<RoomId>, D::Error>
where
    D: Deserializer<'de>,
{
    let room = Option::<RoomId>::deserialize(deserializer)?;
    Ok(room.filter(|id| !id.is_nil()))
}

/// A chat message sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Message body.
    pub content: String,
    /// Claimed sender; must match the connection's identity.
    #[serde(rename = "senderID")]
    pub sender_id: UserId,
    /// Counterpart of the conversation.
    #[serde(rename = "recipientID")]
    pub recipient_id: UserId,
    /// Room the client already knows about, if any.
    #[serde(
        rename = "chatRoomID",
        default,
        deserialize_with = "nil_room_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_room_id: Option<RoomId>,
    /// Message kind (text, image, ...).
    #[serde(rename = "messageType", default = "default_message_type")]
    pub message_type: String,
}

impl InboundFrame {
    /// Create a text frame with no room attached.
    #[must_use]
    pub fn text(sender_id: UserId, recipient_id: UserId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_id,
            recipient_id,
            chat_room_id: None,
            message_type: default_message_type(),
        }
    }

    /// Attach a known room.
    #[must_use]
    pub fn in_room(mut self, room: RoomId) -> Self {
        self.chat_room_id = Some(room);
        self
    }
}

/// A chat message as forwarded to a recipient or returned from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFrame {
    pub id: MessageId,
    pub content: String,
    #[serde(rename = "senderID")]
    pub sender_id: UserId,
    #[serde(rename = "chatRoomID")]
    pub chat_room_id: RoomId,
    pub timestamp: DateTime<Utc>,
}

/// Online state carried by a presence notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

impl PresenceState {
    /// Wire name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Offline => "offline",
        }
    }
}

/// Ephemeral server notices, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notice {
    /// A user came online or went offline.
    #[serde(rename = "status")]
    Status {
        #[serde(rename = "userID")]
        user_id: UserId,
        message: PresenceState,
    },

    /// A room was created by the first message between two users.
    #[serde(rename = "chatRoomCreated")]
    ChatRoomCreated {
        #[serde(rename = "senderID")]
        sender_id: UserId,
        #[serde(rename = "recipientID")]
        recipient_id: UserId,
        #[serde(rename = "chatRoomID")]
        chat_room_id: RoomId,
    },
}

/// Any frame the server writes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Message(MessageFrame),
    Notice(Notice),
}

impl OutboundFrame {
    /// Create a presence notice.
    #[must_use]
    pub fn status(user_id: UserId, state: PresenceState) -> Self {
        OutboundFrame::Notice(Notice::Status {
            user_id,
            message: state,
        })
    }

    /// Create a room-created notice.
    #[must_use]
    pub fn room_created(sender_id: UserId, recipient_id: UserId, chat_room_id: RoomId) -> Self {
        OutboundFrame::Notice(Notice::ChatRoomCreated {
            sender_id,
            recipient_id,
            chat_room_id,
        })
    }

    /// Short name of the frame kind, for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Message(_) => "message",
            OutboundFrame::Notice(Notice::Status { .. }) => "status",
            OutboundFrame::Notice(Notice::ChatRoomCreated { .. }) => "chatRoomCreated",
        }
    }
}

impl From<MessageFrame> for OutboundFrame {
    fn from(frame: MessageFrame) -> Self {
        OutboundFrame::Message(frame)
    }
}
