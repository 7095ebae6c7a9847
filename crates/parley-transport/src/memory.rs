//! In-memory duplex transport.
//!
//! [`duplex`] returns a server-side [`MemoryConnection`] and the client-side
//! [`MemoryPeer`] that drives it. Used to run sessions without a socket.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{Connection, FrameReader, FrameWriter, Inbound, TransportError};

/// Traffic from the peer to the server side.
#[derive(Debug, Clone, PartialEq)]
enum PeerEvent {
    Data(Bytes),
    Heartbeat,
    Close,
}

/// Traffic from the server side to the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A text frame.
    Text(String),
    /// A keepalive ping.
    Ping,
    /// The server closed the connection.
    Close,
}

/// Create a connected pair.
#[must_use]
pub fn duplex() -> (MemoryConnection, MemoryPeer) {
    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();

    (
        MemoryConnection {
            inbound: peer_rx,
            outbound: server_tx,
        },
        MemoryPeer {
            outbound: Some(peer_tx),
            inbound: server_rx,
        },
    )
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection for MemoryConnection {
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (
            Box::new(MemoryReader {
                inbound: self.inbound,
            }),
            Box::new(MemoryWriter {
                outbound: self.outbound,
                is_open: true,
            }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerEvent::Data(data)) => Ok(Some(Inbound::Data(data))),
            Some(PeerEvent::Heartbeat) => Ok(Some(Inbound::Heartbeat)),
            Some(PeerEvent::Close) | None => Ok(None),
        }
    }
}

struct MemoryWriter {
    outbound: mpsc::UnboundedSender<ServerEvent>,
    is_open: bool,
}

impl MemoryWriter {
    fn push(&self, event: ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(event)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(ServerEvent::Text(text))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.push(ServerEvent::Ping)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        // A vanished peer has nothing left to notify.
        let _ = self.outbound.send(ServerEvent::Close);
        self.is_open = false;
        Ok(())
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<PeerEvent>>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl MemoryPeer {
    fn push(&self, event: PeerEvent) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(event)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server side.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the peer hung up.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.push(PeerEvent::Data(Bytes::from(text.into())))
    }

    /// Send a keepalive (as if answering a ping).
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the peer hung up.
    pub fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.push(PeerEvent::Heartbeat)
    }

    /// Send a close frame and stop sending.
    pub fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(PeerEvent::Close);
        }
    }

    /// Drop the sending side without a close frame, like a reset socket.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }

    /// Receive the next server event.
    ///
    /// Returns `None` once the server side is dropped.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    /// Receive the next text frame, skipping pings.
    ///
    /// Returns `None` once the server closes or is dropped.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.inbound.recv().await? {
                ServerEvent::Text(text) => return Some(text),
                ServerEvent::Ping => continue,
                ServerEvent::Close => return None,
            }
        }
    }

    /// Receive a text frame if one is already queued.
    pub fn try_recv_text(&mut self) -> Option<String> {
        loop {
            match self.inbound.try_recv().ok()? {
                ServerEvent::Text(text) => return Some(text),
                ServerEvent::Ping => continue,
                ServerEvent::Close => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_to_server() {
        let (conn, peer) = duplex();
        let (mut reader, _writer) = Box::new(conn).split();

        peer.send_text("hello").unwrap();
        peer.send_heartbeat().unwrap();

        assert_eq!(
            reader.recv().await.unwrap(),
            Some(Inbound::Data(Bytes::from("hello")))
        );
        assert_eq!(reader.recv().await.unwrap(), Some(Inbound::Heartbeat));
    }

    #[tokio::test]
    async fn test_server_to_peer() {
        let (conn, mut peer) = duplex();
        let (_reader, mut writer) = Box::new(conn).split();

        writer.ping().await.unwrap();
        writer.send_text("world".into()).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(peer.recv_text().await, Some("world".to_string()));
        assert_eq!(peer.recv().await, Some(ServerEvent::Close));
        assert!(writer.send_text("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_close_ends_reader() {
        let (conn, mut peer) = duplex();
        let (mut reader, _writer) = Box::new(conn).split();

        peer.close();
        assert_eq!(reader.recv().await.unwrap(), None);
        assert!(peer.send_text("after close").is_err());
    }

    #[tokio::test]
    async fn test_hang_up_ends_reader() {
        let (conn, mut peer) = duplex();
        let (mut reader, _writer) = Box::new(conn).split();

        peer.hang_up();
        assert_eq!(reader.recv().await.unwrap(), None);
    }
}
