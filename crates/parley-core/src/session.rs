//! Client sessions.
//!
//! One session per live connection. A session runs two tasks:
//!
//! - the **read loop** decodes inbound frames, sends them through the room
//!   resolver and asks the hub to dispatch them;
//! - the **write loop** drains the session's outbound queue onto the
//!   transport and sends keepalive pings.
//!
//! The hub holds the only sender of the outbound queue and the session's
//! release signal. When the hub drops its entry (unregister, replacement or
//! eviction) both loops stop, even if the write loop is stuck on a peer that
//! no longer reads.

use crate::hub::{HubError, HubHandle, SessionHandle, SessionId};
use crate::message::Envelope;
use crate::resolver::RoomResolver;
use parley_protocol::{decode_inbound, encode, OutboundFrame, PresenceState, UserId, MAX_FRAME_SIZE};
use parley_transport::{Connection, FrameReader, FrameWriter, Inbound};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the outbound queue. A full queue gets the session evicted.
    pub outbound_capacity: usize,
    /// Largest inbound frame accepted.
    pub max_message_size: usize,
    /// Interval between keepalive pings.
    pub heartbeat_interval: Duration,
    /// Tear down after this long without any inbound traffic.
    pub idle_timeout: Duration,
    /// How long teardown waits for the write loop to flush and close.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_message_size: MAX_FRAME_SIZE,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            close_grace: Duration::from_secs(5),
        }
    }
}

/// Shared collaborators of every session.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub resolver: Arc<RoomResolver>,
    pub config: SessionConfig,
}

/// Start a session for an accepted connection.
///
/// Announces the user online, registers the session with the hub and spawns
/// both loops. The returned handle completes once teardown has finished.
///
/// # Errors
///
/// Returns an error if the hub has stopped; no loops are started then.
pub async fn start(
    ctx: SessionContext,
    user_id: UserId,
    conn: Box<dyn Connection>,
) -> Result<JoinHandle<()>, HubError> {
    let session_id = next_session_id();
    let remote = conn.remote_addr();
    let (reader, writer) = conn.split();
    let (queue, outbound) = mpsc::channel(ctx.config.outbound_capacity.max(1));
    let (release, released) = watch::channel(());

    ctx.hub
        .broadcast_presence(user_id, PresenceState::Online)
        .await?;
    ctx.hub
        .register(SessionHandle {
            user_id,
            session_id,
            queue,
            release,
        })
        .await?;

    debug!(
        user = %user_id,
        session = session_id,
        remote = remote.as_deref().unwrap_or("unknown"),
        "Session started"
    );

    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound,
        released.clone(),
        ctx.config.heartbeat_interval,
        user_id,
        session_id,
    ));

    Ok(tokio::spawn(read_loop(
        ctx,
        user_id,
        session_id,
        reader,
        writer_task,
        released,
    )))
}

async fn write_loop(
    mut writer: Box<dyn FrameWriter>,
    mut outbound: mpsc::Receiver<Arc<OutboundFrame>>,
    mut released: watch::Receiver<()>,
    heartbeat: Duration,
    user: UserId,
    session: SessionId,
) {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            next = outbound.recv() => {
                let Some(frame) = next else {
                    trace!(user = %user, session, "Outbound queue closed");
                    break;
                };
                let text = match encode(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(user = %user, session, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                tokio::select! {
                    biased;

                    sent = writer.send_text(text) => if let Err(e) = sent {
                        debug!(user = %user, session, error = %e, "Write failed");
                        break;
                    },
                    _ = released.changed() => {
                        debug!(user = %user, session, "Released with a write pending");
                        return;
                    }
                }
            }

            _ = ticker.tick() => {
                tokio::select! {
                    biased;

                    sent = writer.ping() => if let Err(e) = sent {
                        debug!(user = %user, session, error = %e, "Ping failed");
                        break;
                    },
                    _ = released.changed() => {
                        debug!(user = %user, session, "Released with a ping pending");
                        return;
                    }
                }
            }
        }
    }

    if let Err(e) = writer.close().await {
        trace!(user = %user, session, error = %e, "Close failed");
    }
}

async fn read_loop(
    ctx: SessionContext,
    user: UserId,
    session: SessionId,
    mut reader: Box<dyn FrameReader>,
    mut writer_task: JoinHandle<()>,
    mut released: watch::Receiver<()>,
) {
    let idle = ctx.config.idle_timeout;
    let mut writer_done = false;

    loop {
        tokio::select! {
            biased;

            // The hub only drops the sender, never sends on it.
            _ = released.changed() => {
                debug!(user = %user, session, "Released by hub");
                break;
            }

            _ = &mut writer_task => {
                writer_done = true;
                debug!(user = %user, session, "Write loop ended");
                break;
            }

            next = timeout(idle, reader.recv()) => match next {
                Err(_) => {
                    debug!(user = %user, session, ?idle, "Idle timeout");
                    break;
                }
                Ok(Ok(Some(Inbound::Data(data)))) => {
                    if let Err(e) = handle_data(&ctx, user, session, &data).await {
                        warn!(user = %user, session, error = %e, "Hub unavailable");
                        break;
                    }
                }
                Ok(Ok(Some(Inbound::Heartbeat))) => {
                    trace!(user = %user, session, "Heartbeat");
                }
                Ok(Ok(None)) => {
                    debug!(user = %user, session, "Connection closed by peer");
                    break;
                }
                Ok(Err(e)) => {
                    debug!(user = %user, session, error = %e, "Read failed");
                    break;
                }
            }
        }
    }

    // Runs once, on every exit path.
    if let Err(e) = ctx.hub.unregister(user, session).await {
        debug!(user = %user, session, error = %e, "Unregister skipped");
    }
    drop(reader);

    if !writer_done && timeout(ctx.config.close_grace, &mut writer_task).await.is_err() {
        warn!(user = %user, session, "Write loop did not finish, aborting");
        writer_task.abort();
    }

    debug!(user = %user, session, "Session ended");
}

/// Handle one inbound payload. Only a stopped hub is an error; everything
/// else drops the frame and keeps the connection.
async fn handle_data(
    ctx: &SessionContext,
    user: UserId,
    session: SessionId,
    data: &[u8],
) -> Result<(), HubError> {
    let frame = match decode_inbound(data, ctx.config.max_message_size) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(user = %user, session, error = %e, "Dropping undecodable frame");
            return Ok(());
        }
    };

    if frame.sender_id != user {
        warn!(
            user = %user,
            session,
            claimed = %frame.sender_id,
            "Dropping frame with foreign sender"
        );
        return Ok(());
    }

    let resolution = match ctx.resolver.resolve_and_persist(Envelope::stamp(frame)).await {
        Ok(resolution) => resolution,
        Err(e) => {
            error!(user = %user, session, error = %e, "Dropping message");
            return Ok(());
        }
    };

    if let Some(room) = resolution.created_room {
        ctx.hub.notify_room_created(room).await?;
    }
    ctx.hub.dispatch(resolution.message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{spawn_hub, HubConfig};
    use crate::message::{ChatMessage, ChatRoom};
    use crate::store::{ChatStore, InMemoryStore, StoreError};
    use async_trait::async_trait;
    use parley_protocol::codec::decode_outbound;
    use parley_protocol::{Notice, RoomId};
    use parley_transport::memory::{duplex, MemoryConnection, MemoryPeer, ServerEvent};
    use parley_transport::TransportError;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        ctx: SessionContext,
        store: Arc<InMemoryStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(SessionConfig::default())
        }

        fn with_config(config: SessionConfig) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let ctx = SessionContext {
                hub: spawn_hub(HubConfig::default()),
                resolver: Arc::new(RoomResolver::new(store.clone())),
                config,
            };
            Self { ctx, store }
        }

        async fn connect(&self, user: UserId) -> (MemoryPeer, JoinHandle<()>) {
            let (conn, peer) = duplex();
            let handle = start(self.ctx.clone(), user, Box::new(conn)).await.unwrap();
            (peer, handle)
        }
    }

    async fn next_frame(peer: &mut MemoryPeer) -> OutboundFrame {
        let text = timeout(WAIT, peer.recv_text())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed");
        decode_outbound(&text).unwrap()
    }

    fn chat_json(sender: UserId, recipient: UserId, content: &str) -> String {
        format!(r#"{{"content":"{content}","senderID":"{sender}","recipientID":"{recipient}"}}"#)
    }

    fn status(user: UserId, state: PresenceState) -> OutboundFrame {
        OutboundFrame::status(user, state)
    }

    /// Wait until `room` holds `count` messages.
    async fn wait_for_history(store: &InMemoryStore, room: RoomId, count: usize) -> Vec<ChatMessage> {
        timeout(WAIT, async {
            loop {
                let history = store.messages(room).await.unwrap();
                if history.len() >= count {
                    return history;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("history never filled")
    }

    #[tokio::test]
    async fn test_first_message_creates_room_and_delivers() {
        let harness = Harness::new();
        let (u1, u2) = (UserId::new_v4(), UserId::new_v4());

        let (mut p2, _) = harness.connect(u2).await;
        let (mut p1, _) = harness.connect(u1).await;
        assert_eq!(next_frame(&mut p2).await, status(u1, PresenceState::Online));

        p1.send_text(chat_json(u1, u2, "hi")).unwrap();

        let OutboundFrame::Notice(Notice::ChatRoomCreated {
            sender_id,
            recipient_id,
            chat_room_id,
        }) = next_frame(&mut p1).await
        else {
            panic!("expected a room-created notice");
        };
        assert_eq!((sender_id, recipient_id), (u1, u2));

        let OutboundFrame::Message(message) = next_frame(&mut p2).await else {
            panic!("expected the chat message");
        };
        assert_eq!(message.content, "hi");
        assert_eq!(message.sender_id, u1);
        assert_eq!(message.chat_room_id, chat_room_id);

        let history = harness.store.messages(chat_room_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, message.id);

        // Exactly one delivery, and no echo to the sender.
        assert!(p2.try_recv_text().is_none());
        assert!(p1.try_recv_text().is_none());
    }

    #[tokio::test]
    async fn test_offline_recipient_still_persisted() {
        let harness = Harness::new();
        let (u1, u2) = (UserId::new_v4(), UserId::new_v4());
        let (mut p1, _) = harness.connect(u1).await;

        p1.send_text(chat_json(u1, u2, "first")).unwrap();
        p1.send_text(chat_json(u1, u2, "second")).unwrap();

        let OutboundFrame::Notice(Notice::ChatRoomCreated { chat_room_id, .. }) =
            next_frame(&mut p1).await
        else {
            panic!("expected a room-created notice");
        };

        let history = wait_for_history(&harness.store, chat_room_id, 2).await;
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);

        let stats = harness.ctx.hub.stats().await.unwrap();
        assert_eq!(stats.undeliverable, 2);
        assert_eq!(stats.dispatched, 0);
    }

    #[tokio::test]
    async fn test_presence_fan_out() {
        let harness = Harness::new();
        let (u1, u2, u3) = (UserId::new_v4(), UserId::new_v4(), UserId::new_v4());

        let (mut p1, _) = harness.connect(u1).await;
        let (mut p2, _) = harness.connect(u2).await;
        assert_eq!(next_frame(&mut p1).await, status(u2, PresenceState::Online));

        let (mut p3, s3) = harness.connect(u3).await;
        assert_eq!(next_frame(&mut p1).await, status(u3, PresenceState::Online));
        assert_eq!(next_frame(&mut p2).await, status(u3, PresenceState::Online));

        p3.close();
        timeout(WAIT, s3).await.unwrap().unwrap();
        assert_eq!(next_frame(&mut p1).await, status(u3, PresenceState::Offline));
        assert_eq!(next_frame(&mut p2).await, status(u3, PresenceState::Offline));
        assert!(!harness.ctx.hub.is_connected(u3).await.unwrap());

        // The subject never hears about itself.
        assert_eq!(timeout(WAIT, p3.recv_text()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bad_frames_keep_connection() {
        let harness = Harness::new();
        let (u1, stranger) = (UserId::new_v4(), UserId::new_v4());
        let (mut p1, _) = harness.connect(u1).await;

        p1.send_text("not json").unwrap();
        p1.send_text(r#"{"content":"missing ids"}"#).unwrap();
        p1.send_text(chat_json(stranger, u1, "spoofed")).unwrap();
        // Self-addressed message as a marker.
        p1.send_text(chat_json(u1, u1, "note to self")).unwrap();

        let OutboundFrame::Notice(Notice::ChatRoomCreated {
            sender_id,
            recipient_id,
            ..
        }) = next_frame(&mut p1).await
        else {
            panic!("expected a room-created notice");
        };
        assert_eq!((sender_id, recipient_id), (u1, u1));

        let OutboundFrame::Message(message) = next_frame(&mut p1).await else {
            panic!("expected the self-addressed message");
        };
        assert_eq!(message.content, "note to self");
        assert_eq!(harness.store.room_count(), 1);
        assert!(harness.ctx.hub.is_connected(u1).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_frame_dropped() {
        let harness = Harness::with_config(SessionConfig {
            max_message_size: 128,
            ..SessionConfig::default()
        });
        let u1 = UserId::new_v4();
        let (mut p1, _) = harness.connect(u1).await;

        p1.send_text(chat_json(u1, u1, &"x".repeat(256))).unwrap();
        p1.send_text(chat_json(u1, u1, "ok")).unwrap();

        assert_eq!(next_frame(&mut p1).await.kind(), "chatRoomCreated");
        let OutboundFrame::Message(message) = next_frame(&mut p1).await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "ok");
    }

    /// Rooms work, message writes fail.
    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl ChatStore for ReadOnlyStore {
        async fn find_room(&self, a: UserId, b: UserId) -> Result<Option<RoomId>, StoreError> {
            self.0.find_room(a, b).await
        }
        async fn create_room(&self, room: &ChatRoom) -> Result<(), StoreError> {
            self.0.create_room(room).await
        }
        async fn rooms_for_user(&self, user: UserId) -> Result<Vec<ChatRoom>, StoreError> {
            self.0.rooms_for_user(user).await
        }
        async fn save_message(&self, _: &ChatMessage) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }
        async fn messages(&self, room: RoomId) -> Result<Vec<ChatMessage>, StoreError> {
            self.0.messages(room).await
        }
        async fn last_message(&self, room: RoomId) -> Result<Option<ChatMessage>, StoreError> {
            self.0.last_message(room).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_drops_message() {
        let ctx = SessionContext {
            hub: spawn_hub(HubConfig::default()),
            resolver: Arc::new(RoomResolver::new(Arc::new(ReadOnlyStore(InMemoryStore::new())))),
            config: SessionConfig::default(),
        };
        let (u1, u2) = (UserId::new_v4(), UserId::new_v4());

        let (c2, mut p2) = duplex();
        start(ctx.clone(), u2, Box::new(c2)).await.unwrap();
        let (c1, p1) = duplex();
        start(ctx.clone(), u1, Box::new(c1)).await.unwrap();
        assert_eq!(next_frame(&mut p2).await, status(u1, PresenceState::Online));

        p1.send_text(chat_json(u1, u2, "lost")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(p2.try_recv_text().is_none());
        assert!(ctx.hub.is_connected(u1).await.unwrap());
        assert_eq!(ctx.hub.stats().await.unwrap().dispatched, 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_tears_down() {
        let harness = Harness::with_config(SessionConfig {
            heartbeat_interval: Duration::from_secs(3600),
            idle_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        });
        let u1 = UserId::new_v4();
        let (mut p1, session) = harness.connect(u1).await;

        assert_eq!(timeout(WAIT, p1.recv()).await.unwrap(), Some(ServerEvent::Close));
        timeout(WAIT, session).await.unwrap().unwrap();
        assert!(!harness.ctx.hub.is_connected(u1).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_pings_and_keeps_alive() {
        let harness = Harness::with_config(SessionConfig {
            heartbeat_interval: Duration::from_millis(20),
            idle_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        });
        let u1 = UserId::new_v4();
        let (mut p1, _) = harness.connect(u1).await;

        // Answering each ping keeps the session past the idle timeout.
        for _ in 0..15 {
            assert_eq!(timeout(WAIT, p1.recv()).await.unwrap(), Some(ServerEvent::Ping));
            p1.send_heartbeat().unwrap();
        }
        assert!(harness.ctx.hub.is_connected(u1).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let harness = Harness::new();
        let (u1, u2) = (UserId::new_v4(), UserId::new_v4());

        let (mut p2, _) = harness.connect(u2).await;
        let (mut old, old_session) = harness.connect(u1).await;
        let (mut new, _) = harness.connect(u1).await;

        // The superseded connection is closed and its session ends.
        assert_eq!(timeout(WAIT, old.recv_text()).await.unwrap(), None);
        timeout(WAIT, old_session).await.unwrap().unwrap();
        assert!(harness.ctx.hub.is_connected(u1).await.unwrap());

        assert_eq!(next_frame(&mut p2).await, status(u1, PresenceState::Online));
        assert_eq!(next_frame(&mut p2).await, status(u1, PresenceState::Online));

        p2.send_text(chat_json(u2, u1, "which one?")).unwrap();
        // No offline notice for u1 slipped in before the room notice.
        assert_eq!(next_frame(&mut p2).await.kind(), "chatRoomCreated");

        let OutboundFrame::Message(message) = next_frame(&mut new).await else {
            panic!("expected the message on the new connection");
        };
        assert_eq!(message.content, "which one?");
    }

    /// Reads like a memory connection, but no write ever completes.
    struct StuckConnection(MemoryConnection);

    struct StuckWriter;

    impl Connection for StuckConnection {
        fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
            let (reader, _writer) = Box::new(self.0).split();
            (reader, Box::new(StuckWriter))
        }
    }

    #[async_trait]
    impl FrameWriter for StuckWriter {
        async fn send_text(&mut self, _: String) -> Result<(), TransportError> {
            std::future::pending().await
        }
        async fn ping(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }
        async fn close(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_eviction_ends_stuck_session() {
        let harness = Harness::new();
        let (u1, u2) = (UserId::new_v4(), UserId::new_v4());
        let (mut p1, _) = harness.connect(u1).await;

        let stuck_ctx = SessionContext {
            config: SessionConfig {
                outbound_capacity: 1,
                close_grace: Duration::from_millis(100),
                ..SessionConfig::default()
            },
            ..harness.ctx.clone()
        };
        let (conn, p2) = duplex();
        let s2 = start(stuck_ctx, u2, Box::new(StuckConnection(conn))).await.unwrap();
        assert_eq!(next_frame(&mut p1).await, status(u2, PresenceState::Online));

        // One frame blocks the writer, one fills the queue, one evicts.
        for n in 0..3 {
            p1.send_text(chat_json(u1, u2, &format!("flood {n}"))).unwrap();
        }

        let OutboundFrame::Notice(Notice::ChatRoomCreated { chat_room_id, .. }) =
            next_frame(&mut p1).await
        else {
            panic!("expected a room-created notice");
        };
        assert_eq!(next_frame(&mut p1).await, status(u2, PresenceState::Offline));

        // The evicted session ends and stops reading.
        timeout(WAIT, s2).await.unwrap().unwrap();
        assert!(p2.send_text(chat_json(u2, u1, "still here?")).is_err());

        let stats = harness.ctx.hub.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert!(!harness.ctx.hub.is_connected(u2).await.unwrap());

        let history = wait_for_history(&harness.store, chat_room_id, 3).await;
        assert!(history.iter().all(|m| m.sender == u1));
        assert!(p1.try_recv_text().is_none());
    }

    #[tokio::test]
    async fn test_peer_hang_up_unregisters() {
        let harness = Harness::new();
        let u1 = UserId::new_v4();
        let (mut p1, session) = harness.connect(u1).await;

        p1.hang_up();
        timeout(WAIT, session).await.unwrap().unwrap();
        assert!(!harness.ctx.hub.is_connected(u1).await.unwrap());
    }
}
