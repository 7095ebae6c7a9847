//! Message and room persistence.
//!
//! The durable schema lives outside this crate; the hub only needs the narrow
//! [`ChatStore`] interface. [`InMemoryStore`] backs the server and the tests.

use crate::message::{ChatMessage, ChatRoom};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_protocol::{RoomId, UserId};
use thiserror::Error;
use tracing::trace;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A room with this id, or for this ordered pair, is already recorded.
    #[error("Chat room already exists: {0}")]
    RoomExists(RoomId),
}

/// Persistence interface for rooms and messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Find the room recorded for exactly `(first, second)`, in that order.
    async fn find_room(&self, first: UserId, second: UserId) -> Result<Option<RoomId>, StoreError>;

    /// Record a new room.
    async fn create_room(&self, room: &ChatRoom) -> Result<(), StoreError>;

    /// All rooms a user participates in, in either position.
    async fn rooms_for_user(&self, user: UserId) -> Result<Vec<ChatRoom>, StoreError>;

    /// Append a message to its room's history.
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// A room's history in the order it was saved.
    async fn messages(&self, room: RoomId) -> Result<Vec<ChatMessage>, StoreError>;

    /// The most recently saved message of a room.
    async fn last_message(&self, room: RoomId) -> Result<Option<ChatMessage>, StoreError>;
}

/// A process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Rooms indexed by id.
    rooms: DashMap<RoomId, ChatRoom>,
    /// Directional index: (current_user, target_user) -> room.
    pairs: DashMap<(UserId, UserId), RoomId>,
    /// Per-room history in save order.
    messages: DashMap<RoomId, Vec<ChatMessage>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn find_room(&self, first: UserId, second: UserId) -> Result<Option<RoomId>, StoreError> {
        Ok(self.pairs.get(&(first, second)).map(|id| *id))
    }

    async fn create_room(&self, room: &ChatRoom) -> Result<(), StoreError> {
        if self.rooms.contains_key(&room.id) {
            return Err(StoreError::RoomExists(room.id));
        }

        match self.pairs.entry((room.current_user, room.target_user)) {
            Entry::Occupied(existing) => return Err(StoreError::RoomExists(*existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(room.id);
            }
        }
        self.rooms.insert(room.id, room.clone());

        trace!(room = %room.id, "Stored chat room");
        Ok(())
    }

    async fn rooms_for_user(&self, user: UserId) -> Result<Vec<ChatRoom>, StoreError> {
        Ok(self
            .rooms
            .iter()
            .filter(|entry| entry.involves(user))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.messages
            .entry(message.room_id)
            .or_default()
            .push(message.clone());

        trace!(room = %message.room_id, message = %message.id, "Stored message");
        Ok(())
    }

    async fn messages(&self, room: RoomId) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .get(&room)
            .map(|history| history.clone())
            .unwrap_or_default())
    }

    async fn last_message(&self, room: RoomId) -> Result<Option<ChatMessage>, StoreError> {
        Ok(self
            .messages
            .get(&room)
            .and_then(|history| history.last().cloned()))
    }
}
