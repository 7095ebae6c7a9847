//! Transport abstraction traits for Parley.
//!
//! A connection is split once into a reading half and a writing half so the
//! session can drive its read loop and its write loop concurrently.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something read from a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A complete application payload.
    Data(Bytes),
    /// Transport-level keepalive traffic (ping or pong). Carries no payload
    /// but proves the peer is alive.
    Heartbeat,
}

/// The reading half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next inbound item.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The writing half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one text payload.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a transport-level keepalive ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted connection, before it is split.
pub trait Connection: Send {
    /// Split into independently owned reading and writing halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
