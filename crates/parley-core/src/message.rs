//! Chat rooms and messages as the hub and the store see them.

use chrono::{DateTime, Utc};
use parley_protocol::{InboundFrame, MessageFrame, MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

/// A two-party chat room.
///
/// Rooms are recorded in the direction they were created (`current_user`
/// sent the first message to `target_user`) but are symmetric in meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    #[serde(rename = "currentUserID")]
    pub current_user: UserId,
    #[serde(rename = "targetUserID")]
    pub target_user: UserId,
}

impl ChatRoom {
    /// Create a room with a fresh identity.
    #[must_use]
    pub fn new(current_user: UserId, target_user: UserId) -> Self {
        Self {
            id: RoomId::new_v4(),
            current_user,
            target_user,
        }
    }

    /// Check if a user is one of the two participants.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.current_user == user || self.target_user == user
    }

    /// Check if this room is the room between `a` and `b`, in either order.
    #[must_use]
    pub fn connects(&self, a: UserId, b: UserId) -> bool {
        (self.current_user == a && self.target_user == b)
            || (self.current_user == b && self.target_user == a)
    }

    /// The other participant, seen from `user`.
    #[must_use]
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if self.current_user == user {
            Some(self.target_user)
        } else if self.target_user == user {
            Some(self.current_user)
        } else {
            None
        }
    }
}

/// An inbound message stamped by the server but not yet bound to a room.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: MessageId,
    pub content: String,
    pub sender: UserId,
    pub recipient: UserId,
    /// Room supplied by the client, if any.
    pub room_id: Option<RoomId>,
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
}

impl Envelope {
    /// Stamp a decoded frame with a new message id and the server time.
    #[must_use]
    pub fn stamp(frame: InboundFrame) -> Self {
        Self {
            id: MessageId::new_v4(),
            content: frame.content,
            sender: frame.sender_id,
            recipient: frame.recipient_id,
            room_id: frame.chat_room_id,
            timestamp: Utc::now(),
            message_type: frame.message_type,
        }
    }

    /// Bind the envelope to its resolved room.
    #[must_use]
    pub fn into_message(self, room_id: RoomId) -> ChatMessage {
        ChatMessage {
            id: self.id,
            room_id,
            content: self.content,
            sender: self.sender,
            recipient: self.recipient,
            timestamp: self.timestamp,
            message_type: self.message_type,
        }
    }
}

/// A persisted chat message. Never modified after it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub content: String,
    pub sender: UserId,
    pub recipient: UserId,
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
}

impl ChatMessage {
    /// The frame forwarded to the recipient and returned from history.
    #[must_use]
    pub fn to_frame(&self) -> MessageFrame {
        MessageFrame {
            id: self.id,
            content: self.content.clone(),
            sender_id: self.sender,
            chat_room_id: self.room_id,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_symmetry() {
        let (a, b, c) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());
        let room = ChatRoom::new(a, b);

        assert!(room.connects(a, b));
        assert!(room.connects(b, a));
        assert!(!room.connects(a, c));

        assert_eq!(room.counterpart(a), Some(b));
        assert_eq!(room.counterpart(b), Some(a));
        assert_eq!(room.counterpart(c), None);
    }

    #[test]
    fn test_stamp_and_bind() {
        let (a, b) = (UserId::new_v4(), UserId::new_v4());
        let envelope = Envelope::stamp(InboundFrame::text(a, b, "hi"));
        assert!(envelope.room_id.is_none());

        let room = RoomId::new_v4();
        let id = envelope.id;
        let message = envelope.into_message(room);
        assert_eq!(message.id, id);
        assert_eq!(message.room_id, room);

        let frame = message.to_frame();
        assert_eq!(frame.chat_room_id, room);
        assert_eq!(frame.sender_id, a);
        assert_eq!(frame.content, "hi");
    }

    #[test]
    fn test_unique_message_ids() {
        let (a, b) = (UserId::new_v4(), UserId::new_v4());
        let first = Envelope::stamp(InboundFrame::text(a, b, "1"));
        let second = Envelope::stamp(InboundFrame::text(a, b, "2"));
        assert_ne!(first.id, second.id);
    }
}
