//! Read-side queries over rooms, history and liveness.
//!
//! Backs the HTTP query API. Writes go through the room resolver only, so a
//! room id handed out here is always a persisted one.

use crate::hub::{HubError, HubHandle};
use crate::message::ChatMessage;
use crate::profile::{ChatSummary, ProfileError, ProfileSource};
use crate::resolver::{ResolveError, RoomResolver};
use crate::store::StoreError;
use parley_protocol::{RoomId, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Profile lookup for {user} failed: {source}")]
    Profile {
        user: UserId,
        #[source]
        source: ProfileError,
    },

    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Query surface for external callers.
#[derive(Clone)]
pub struct ChatDirectory {
    resolver: Arc<RoomResolver>,
    hub: HubHandle,
    profiles: Arc<dyn ProfileSource>,
}

impl ChatDirectory {
    #[must_use]
    pub fn new(resolver: Arc<RoomResolver>, hub: HubHandle, profiles: Arc<dyn ProfileSource>) -> Self {
        Self {
            resolver,
            hub,
            profiles,
        }
    }

    /// A room's messages in persisted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn history(&self, room: RoomId) -> Result<Vec<ChatMessage>, DirectoryError> {
        Ok(self.resolver.store().messages(room).await?)
    }

    /// The room between two users, created and persisted if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or the creation fails.
    pub async fn resolve_room(&self, current: UserId, target: UserId) -> Result<RoomId, DirectoryError> {
        let (id, created) = self.resolver.get_or_create_room(current, target).await?;
        if created.is_some() {
            debug!(room = %id, current = %current, target = %target, "Room created by query");
        }
        Ok(id)
    }

    /// Every room of `user`, described from the user's side.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any store read, profile lookup or liveness check
    /// fails.
    pub async fn user_chats(&self, user: UserId) -> Result<Vec<ChatSummary>, DirectoryError> {
        let store = self.resolver.store();
        let rooms = store.rooms_for_user(user).await?;
        let mut chats = Vec::with_capacity(rooms.len());

        for room in rooms {
            let Some(counterpart) = room.counterpart(user) else {
                continue;
            };

            let profile = self
                .profiles
                .profile(counterpart)
                .await
                .map_err(|source| {
                    warn!(user = %counterpart, error = %source, "Profile lookup failed");
                    DirectoryError::Profile {
                        user: counterpart,
                        source,
                    }
                })?;

            let last_message = store
                .last_message(room.id)
                .await?
                .map(|message| message.content)
                .unwrap_or_default();
            let status = self.hub.is_connected(counterpart).await?;

            chats.push(ChatSummary::new(profile, status, last_message, room.id));
        }

        Ok(chats)
    }
}
