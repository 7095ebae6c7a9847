//! The connection hub.
//!
//! The hub is the single authority for "who is connected". One actor task
//! owns the registry (user id -> current session) and makes every routing
//! decision; everything else talks to it through a cloneable [`HubHandle`].
//!
//! ```text
//! ┌──────────────┐  HubCommand   ┌──────────────┐  try_send   ┌──────────────┐
//! │ ClientSession│──────────────▶│   HubActor   │────────────▶│ peer's queue │
//! └──────────────┘   (mpsc)      └──────────────┘  (bounded)  └──────────────┘
//! ```
//!
//! Enqueueing never blocks the hub. A session whose queue is full is evicted:
//! its entry is removed, its queue closed and its session released, and the
//! frame is not retried.

use crate::message::{ChatMessage, ChatRoom};
use crate::presence::{presence_notice, room_created_notice, NotificationPolicy};
use parley_protocol::{OutboundFrame, PresenceState, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Identifies one connection of a user.
pub type SessionId = u64;

/// A session's outbound queue, as held by the hub.
pub type OutboundQueue = mpsc::Sender<Arc<OutboundFrame>>;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub actor has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub's command inbox.
    pub command_capacity: usize,
    /// Who gets presence and room notices.
    pub notifications: NotificationPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            notifications: NotificationPolicy::default(),
        }
    }
}

/// What a session hands to the hub when it registers.
///
/// The queue sender and the release sender move into the registry. Once the
/// hub drops the entry the session's loops see `release` closed and stop.
#[derive(Debug)]
pub struct SessionHandle {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub queue: OutboundQueue,
    pub release: watch::Sender<()>,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Users currently registered.
    pub connected: usize,
    /// Registrations since start.
    pub registered_total: u64,
    /// Registrations that replaced a live session of the same user.
    pub replaced: u64,
    /// Sessions evicted for a full or closed queue.
    pub evictions: u64,
    /// Chat messages queued to a recipient.
    pub dispatched: u64,
    /// Chat messages whose recipient was not connected.
    pub undeliverable: u64,
}

enum HubCommand {
    Register(SessionHandle),
    Unregister {
        user_id: UserId,
        session_id: SessionId,
    },
    Dispatch(ChatMessage),
    RoomCreated(ChatRoom),
    BroadcastPresence {
        user_id: UserId,
        state: PresenceState,
    },
    IsConnected {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Spawn the hub actor and return a handle to it.
///
/// The actor stops once every handle has been dropped.
#[must_use]
pub fn spawn_hub(config: HubConfig) -> HubHandle {
    info!("Starting hub with config: {:?}", config);

    let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
    let actor = HubActor::new(commands_rx, config.notifications);
    tokio::spawn(actor.run());

    HubHandle {
        commands: commands_tx,
    }
}

/// Capability to route through the hub.
///
/// Sessions hold one of these instead of a reference to the registry.
/// Commands from one handle are applied in the order they were sent.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Insert or replace the registry entry for the session's user.
    ///
    /// A live session of the same user is superseded: its queue is closed
    /// and its later unregister is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn register(&self, session: SessionHandle) -> Result<(), HubError> {
        self.send(HubCommand::Register(session)).await
    }

    /// Remove the entry if `session_id` is still the user's current session,
    /// close its queue, and announce the user offline.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn unregister(&self, user_id: UserId, session_id: SessionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister {
            user_id,
            session_id,
        })
        .await
    }

    /// Queue a persisted message to its recipient, if connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn dispatch(&self, message: ChatMessage) -> Result<(), HubError> {
        self.send(HubCommand::Dispatch(message)).await
    }

    /// Tell the policy's recipients that `room` was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn notify_room_created(&self, room: ChatRoom) -> Result<(), HubError> {
        self.send(HubCommand::RoomCreated(room)).await
    }

    /// Fan a presence change out to every other connected user.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn broadcast_presence(
        &self,
        user_id: UserId,
        state: PresenceState,
    ) -> Result<(), HubError> {
        self.send(HubCommand::BroadcastPresence { user_id, state })
            .await
    }

    /// Point-in-time liveness check.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn is_connected(&self, user_id: UserId) -> Result<bool, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::IsConnected { user_id, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Get hub statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// Registry entry.
struct Registration {
    session_id: SessionId,
    queue: OutboundQueue,
    /// Never sent on. Dropping it ends the session.
    _release: watch::Sender<()>,
}

/// Result of one enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    Offline,
    Evicted,
}

/// Owner of the registry.
struct HubActor {
    commands: mpsc::Receiver<HubCommand>,
    clients: HashMap<UserId, Registration>,
    policy: NotificationPolicy,
    stats: HubStats,
    /// Users removed while handling the current command, still to be
    /// announced offline.
    departed: VecDeque<UserId>,
}

impl HubActor {
    fn new(commands: mpsc::Receiver<HubCommand>, policy: NotificationPolicy) -> Self {
        Self {
            commands,
            clients: HashMap::new(),
            policy,
            stats: HubStats::default(),
            departed: VecDeque::new(),
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            self.announce_departures();
        }
        debug!(connected = self.clients.len(), "Hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(session) => self.register(session),
            HubCommand::Unregister {
                user_id,
                session_id,
            } => self.unregister(user_id, session_id),
            HubCommand::Dispatch(message) => self.dispatch(message),
            HubCommand::RoomCreated(room) => self.room_created(&room),
            HubCommand::BroadcastPresence { user_id, state } => {
                self.broadcast_presence(user_id, state);
            }
            HubCommand::IsConnected { user_id, reply } => {
                let _ = reply.send(self.clients.contains_key(&user_id));
            }
            HubCommand::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.connected = self.clients.len();
                let _ = reply.send(stats);
            }
        }
    }

    fn register(&mut self, session: SessionHandle) {
        let user = session.user_id;
        let entry = Registration {
            session_id: session.session_id,
            queue: session.queue,
            _release: session.release,
        };
        self.stats.registered_total += 1;

        // Dropping the previous entry closes its queue and releases it.
        if let Some(previous) = self.clients.insert(user, entry) {
            self.stats.replaced += 1;
            debug!(
                user = %user,
                old_session = previous.session_id,
                new_session = session.session_id,
                "Replaced existing session"
            );
        } else {
            debug!(user = %user, session = session.session_id, "Registered");
        }
    }

    fn unregister(&mut self, user: UserId, session_id: SessionId) {
        match self.clients.get(&user) {
            Some(current) if current.session_id == session_id => {
                self.clients.remove(&user);
                self.departed.push_back(user);
                debug!(user = %user, session = session_id, "Unregistered");
            }
            _ => {
                trace!(user = %user, session = session_id, "Unregister of superseded session ignored");
            }
        }
    }

    fn dispatch(&mut self, message: ChatMessage) {
        let recipient = message.recipient;
        let frame = Arc::new(OutboundFrame::from(message.to_frame()));

        match self.deliver(recipient, frame) {
            Delivery::Queued => {
                self.stats.dispatched += 1;
                trace!(recipient = %recipient, message = %message.id, "Dispatched");
            }
            Delivery::Offline => {
                self.stats.undeliverable += 1;
                trace!(recipient = %recipient, message = %message.id, "Recipient offline");
            }
            Delivery::Evicted => {
                warn!(recipient = %recipient, message = %message.id, "Message dropped with evicted recipient");
            }
        }
    }

    fn room_created(&mut self, room: &ChatRoom) {
        let frame = room_created_notice(room);
        for user in self.policy.room_created_recipients(room) {
            self.deliver(user, frame.clone());
        }
    }

    fn broadcast_presence(&mut self, subject: UserId, state: PresenceState) {
        let frame = presence_notice(subject, state);
        let recipients = self.policy.presence_recipients(subject, self.clients.keys());

        trace!(user = %subject, state = state.as_str(), recipients = recipients.len(), "Presence fan-out");
        for user in recipients {
            self.deliver(user, frame.clone());
        }
    }

    /// Non-blocking enqueue. A full or closed queue evicts its session.
    fn deliver(&mut self, user: UserId, frame: Arc<OutboundFrame>) -> Delivery {
        let Some(entry) = self.clients.get(&user) else {
            return Delivery::Offline;
        };

        match entry.queue.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.evict(user, "outbound queue full");
                Delivery::Evicted
            }
            Err(TrySendError::Closed(_)) => {
                self.evict(user, "outbound queue closed");
                Delivery::Evicted
            }
        }
    }

    fn evict(&mut self, user: UserId, reason: &'static str) {
        if let Some(entry) = self.clients.remove(&user) {
            self.stats.evictions += 1;
            self.departed.push_back(user);
            warn!(user = %user, session = entry.session_id, reason, "Evicted session");
        }
    }

    /// Announce removed users offline. Evictions caused by these broadcasts
    /// are queued and announced in turn.
    fn announce_departures(&mut self) {
        while let Some(user) = self.departed.pop_front() {
            if self.clients.contains_key(&user) {
                continue;
            }
            self.broadcast_presence(user, PresenceState::Offline);
        }
    }
}
