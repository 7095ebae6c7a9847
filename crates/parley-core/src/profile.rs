//! User profiles from the external profile service.
//!
//! Profiles only decorate chat listings; routing never depends on them.

use async_trait::async_trait;
use parley_protocol::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Profile lookup errors.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The profile service could not be reached or timed out.
    #[error("Profile service unavailable: {0}")]
    Unavailable(String),

    /// The service has no profile for this user.
    #[error("No profile for user {0}")]
    NotFound(UserId),

    /// The service answered with something that is not a profile.
    #[error("Malformed profile response: {0}")]
    Malformed(String),
}

/// A user's public profile summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar: String,
}

/// One entry of a user's chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// The counterpart in the room.
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub avatar: String,
    /// Whether the counterpart is connected right now.
    pub status: bool,
    /// Content of the latest message, empty if the room has none.
    #[serde(rename = "lastMessage")]
    pub last_message: String,
    #[serde(rename = "chatID")]
    pub chat_id: RoomId,
}

impl ChatSummary {
    /// Build a summary from the counterpart's profile.
    #[must_use]
    pub fn new(profile: UserProfile, status: bool, last_message: String, chat_id: RoomId) -> Self {
        Self {
            user_id: profile.user_id,
            first_name: profile.first_name,
            last_name: profile.last_name,
            avatar: profile.avatar,
            status,
            last_message,
            chat_id,
        }
    }
}

/// Source of user profiles.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch one user's profile.
    async fn profile(&self, user: UserId) -> Result<UserProfile, ProfileError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_wire_names() {
        let user = UserId::new_v4();
        let raw = format!(
            r#"{{"userID":"{user}","firstName":"Ada","lastName":"Lovelace","avatar":"a.png"}}"#
        );
        let profile: UserProfile = serde_json::from_str(&raw).unwrap();
        assert_eq!(profile.user_id, user);
        assert_eq!(profile.first_name, "Ada");

        let summary = ChatSummary::new(profile, true, String::new(), RoomId::new_v4());
        let value = serde_json::to_value(&summary).unwrap();
        for key in ["userID", "firstName", "lastName", "avatar", "status", "lastMessage", "chatID"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["status"], true);
        assert_eq!(value["lastMessage"], "");
    }

    #[test]
    fn test_profile_optional_fields() {
        let user = UserId::new_v4();
        let profile: UserProfile = serde_json::from_str(&format!(r#"{{"userID":"{user}"}}"#)).unwrap();
        assert!(profile.avatar.is_empty());
    }
}
