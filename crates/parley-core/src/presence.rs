//! Presence and room-lifecycle notification policy.
//!
//! Decides who hears about a user going online or offline and who is told
//! that a room was created. The hub applies the policy; it never persists
//! any of these notices.

use crate::message::ChatRoom;
use parley_protocol::{OutboundFrame, PresenceState, UserId};
use std::sync::Arc;

/// Notification policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationPolicy {
    /// Also tell the recipient of the first message that a room was created.
    /// Off by default: only the creating sender is notified.
    pub notify_recipient_on_room_created: bool,
}

impl NotificationPolicy {
    /// Sessions that receive a presence change of `subject`.
    ///
    /// Every connected user except the subject itself. Fan-out is global,
    /// O(connected users) per change.
    pub fn presence_recipients<'a>(
        &self,
        subject: UserId,
        connected: impl IntoIterator<Item = &'a UserId>,
    ) -> Vec<UserId> {
        connected
            .into_iter()
            .copied()
            .filter(|user| *user != subject)
            .collect()
    }

    /// Users told about a newly created room.
    #[must_use]
    pub fn room_created_recipients(&self, room: &ChatRoom) -> Vec<UserId> {
        let mut recipients = vec![room.current_user];
        if self.notify_recipient_on_room_created && room.target_user != room.current_user {
            recipients.push(room.target_user);
        }
        recipients
    }
}

/// Build a shared presence notice.
#[must_use]
pub fn presence_notice(user: UserId, state: PresenceState) -> Arc<OutboundFrame> {
    Arc::new(OutboundFrame::status(user, state))
}

/// Build a shared room-created notice.
#[must_use]
pub fn room_created_notice(room: &ChatRoom) -> Arc<OutboundFrame> {
    Arc::new(OutboundFrame::room_created(
        room.current_user,
        room.target_user,
        room.id,
    ))
}
