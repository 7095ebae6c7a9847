//! Room resolution and the message send-path.
//!
//! The resolver owns the "at most one room per unordered pair" invariant.
//! Rooms are stored directionally, so every lookup checks both orderings,
//! and creation is serialized per pair so two users messaging each other for
//! the first time at the same moment still end up in one room.

use crate::message::{ChatMessage, ChatRoom, Envelope};
use crate::store::{ChatStore, StoreError};
use dashmap::DashMap;
use parley_protocol::{RoomId, UserId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Room resolution errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Looking up an existing room failed.
    #[error("Room lookup failed: {0}")]
    Lookup(#[source] StoreError),

    /// Recording a new room failed.
    #[error("Room creation failed: {0}")]
    Create(#[source] StoreError),

    /// Saving the message failed.
    #[error("Message persistence failed: {0}")]
    Persist(#[source] StoreError),
}

/// Outcome of the send-path.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The message as persisted, bound to its room.
    pub message: ChatMessage,
    /// The room, if this message created it.
    pub created_room: Option<ChatRoom>,
}

/// Order-independent key for a pair of users.
fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Finds or creates the room between two users and persists messages into it.
pub struct RoomResolver {
    store: Arc<dyn ChatStore>,
    /// Creation locks for pairs with a lookup-then-create in flight.
    pair_locks: DashMap<(UserId, UserId), Arc<Mutex<()>>>,
}

impl RoomResolver {
    /// Create a resolver over a store.
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            pair_locks: DashMap::new(),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Find the room between `a` and `b`, whichever of them created it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub async fn find_room(&self, a: UserId, b: UserId) -> Result<Option<RoomId>, ResolveError> {
        if let Some(id) = self.store.find_room(a, b).await.map_err(ResolveError::Lookup)? {
            return Ok(Some(id));
        }
        self.store.find_room(b, a).await.map_err(ResolveError::Lookup)
    }

    /// Find the room between `creator` and `target`, creating it if none
    /// exists.
    ///
    /// Returns the room id and, when this call created it, the new room.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or the creation fails.
    pub async fn get_or_create_room(
        &self,
        creator: UserId,
        target: UserId,
    ) -> Result<(RoomId, Option<ChatRoom>), ResolveError> {
        if let Some(id) = self.find_room(creator, target).await? {
            return Ok((id, None));
        }

        let key = pair_key(creator, target);
        let lock = self.pair_locks.entry(key).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.create_if_absent(creator, target).await
        };

        drop(lock);
        self.pair_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Re-check under the pair lock, then create.
    async fn create_if_absent(
        &self,
        creator: UserId,
        target: UserId,
    ) -> Result<(RoomId, Option<ChatRoom>), ResolveError> {
        if let Some(id) = self.find_room(creator, target).await? {
            trace!(room = %id, "Room created concurrently");
            return Ok((id, None));
        }

        let room = ChatRoom::new(creator, target);
        self.store
            .create_room(&room)
            .await
            .map_err(ResolveError::Create)?;

        debug!(room = %room.id, creator = %creator, target = %target, "Created chat room");
        Ok((room.id, Some(room)))
    }

    /// Bind a stamped message to its room and persist it.
    ///
    /// A room id supplied by the client is used as is. Otherwise the room
    /// for the sender/recipient pair is looked up or created. The message is
    /// saved before this returns, so it is in history before any delivery
    /// is attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if room resolution or persistence fails; nothing is
    /// delivered in that case.
    pub async fn resolve_and_persist(&self, envelope: Envelope) -> Result<Resolution, ResolveError> {
        let (room_id, created_room) = match envelope.room_id {
            Some(id) => (id, None),
            None => {
                self.get_or_create_room(envelope.sender, envelope.recipient)
                    .await?
            }
        };

        let message = envelope.into_message(room_id);
        self.store
            .save_message(&message)
            .await
            .map_err(ResolveError::Persist)?;

        trace!(room = %room_id, message = %message.id, "Persisted message");
        Ok(Resolution {
            message,
            created_room,
        })
    }
}
